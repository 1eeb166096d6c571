//! Wire protocol for the Zion mesh.
//!
//! This crate defines what peers say to each other:
//!
//! - **Types** ([`Envelope`], [`Body`] and the control payloads): the
//!   messages that travel on the wire.
//! - **Fingerprints** ([`Fingerprint`]): identity of a logical message,
//!   used by the mesh to suppress duplicates.
//! - **Identity** ([`identity`]): session and rendezvous peer ids.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): envelopes to bytes and
//!   back.
//! - **Errors** ([`ProtocolError`]).
//!
//! The protocol layer knows nothing about connections. It sits between
//! the transport (bytes) and the mesh (routing):
//!
//! ```text
//! Transport (bytes) → Protocol (Envelope) → Mesh (dedup, relay, lobby, federation)
//! ```

mod codec;
mod error;
mod fingerprint;
pub mod identity;
mod types;

pub use codec::{Codec, JsonCodec};
pub use error::ProtocolError;
pub use fingerprint::Fingerprint;
pub use types::{
    Body, Envelope, FEDERATION_PROTOCOL_VERSION, FederationAnnounce, FederationHandshake,
    Heartbeat, LobbyAnnounce, PeerListRequest, Position, ReturnHome, Route, WarpFork, kinds,
};
pub use zion_transport::PeerId;
