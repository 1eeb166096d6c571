//! # Zion
//!
//! Peer-to-peer mesh networking core for browser-hosted multiplayer worlds.
//!
//! Every player is a node in a flood-relayed mesh: messages fan out to all
//! neighbours, get de-duplicated by fingerprint and relayed onward. Peers
//! find each other through a per-world lobby and gossip, rebind after
//! losing signaling, and worlds can federate with each other.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use zion::prelude::*;
//!
//! # async fn run() -> Result<(), ZionError> {
//! zion::init_tracing();
//! let mut node = ZionNode::builder("alice")
//!     .world("alpha")
//!     .start(MemorySignaling::new())
//!     .await?;
//! node.handle().publish("chat", serde_json::json!({ "message": "hi" })).await;
//! while let Some(event) = node.next_event().await {
//!     // ...
//! #   let _ = event;
//! }
//! # Ok(())
//! # }
//! ```

mod error;
mod node;

pub use error::ZionError;
pub use node::{ZionNode, ZionNodeBuilder};

pub use zion_mesh as mesh;
pub use zion_protocol as protocol;
pub use zion_transport as transport;

use tracing_subscriber::EnvFilter;

/// Installs a `tracing` subscriber filtered by `RUST_LOG`, `info` if unset.
///
/// Does nothing if a global subscriber is already installed.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

pub mod prelude {
    pub use crate::{ZionError, ZionNode, ZionNodeBuilder};
    pub use zion_mesh::{
        FederationEvent, FederationStatus, Mesh, MeshConfig, MeshError, MeshEvent, MeshEvents,
        MeshHandle, MeshState, ReconnectConfig, WorldInfo,
    };
    pub use zion_protocol::{Body, Envelope, PeerId, Position};
    pub use zion_transport::{MemorySignaling, WebSocketSignaling};
}
