//! Peer mesh for Zion worlds.
//!
//! Each node runs as an isolated Tokio task (actor model) that owns its
//! links, its duplicate-suppression cache and its lobby and federation
//! state. Messages are flooded: every node relays every novel envelope to
//! every neighbour except the one it came from, and the dedup cache stops
//! the flood.
//!
//! # Key types
//!
//! - [`Mesh`]: spawns a node
//! - [`MeshHandle`]: send commands to a running node
//! - [`MeshEvent`]: what the node reports back
//! - [`MeshState`]: lifecycle state machine
//! - [`MeshConfig`]: cadences, limits and backoff

mod actor;
mod config;
mod dedup;
mod error;
mod event;
mod federation;
mod handle;
mod lobby;
mod reconnect;
mod table;

pub use config::{MeshConfig, MeshState, ReconnectConfig};
pub use dedup::DedupCache;
pub use error::MeshError;
pub use event::{FederationEvent, MeshEvent, MeshEvents};
pub use federation::{FederationRecord, FederationStatus, WorldInfo};
pub use handle::{Mesh, MeshHandle};
pub use reconnect::ReconnectPolicy;
