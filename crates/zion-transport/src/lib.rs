//! Transport abstraction layer for the Zion mesh.
//!
//! A node claims a [`PeerId`] on a signaling substrate ([`Signaling::bind`]),
//! accepts inbound links through the resulting [`Transport`], and dials
//! other identities with [`Signaling::dial`]. Every link is a reliable,
//! ordered, bidirectional [`Connection`].
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`
//!
//! The in-memory hub ([`MemorySignaling`]) is always available.

mod error;
mod memory;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::{ErrorKind, TransportError};
pub use memory::{MemoryConnection, MemorySignaling, MemoryTransport};
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketSignaling, WebSocketTransport};

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};

/// Identity of a node on the signaling substrate.
///
/// Opaque to the transport. Serializes as a plain string.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Wraps a raw identity string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Opaque identifier for a single link.
///
/// Two links to the same peer (e.g. after a simultaneous dial) have
/// different ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Claims identities and dials other peers.
///
/// Implementations are shared between the mesh actor and its background
/// dial tasks, so they must be cheap to use through an `Arc`.
pub trait Signaling: Send + Sync + 'static {
    /// The link type produced by dial and accept.
    type Connection: Connection;
    /// The listener produced by a successful bind.
    type Transport: Transport<Connection = Self::Connection>;

    /// Claims `id` and starts listening for inbound links.
    fn bind(
        &self,
        id: &PeerId,
    ) -> impl Future<Output = Result<Self::Transport, TransportError>> + Send;

    /// Opens a link from `from` to `to`.
    ///
    /// Fails with [`TransportError::PeerUnreachable`] when nobody holds `to`.
    fn dial(
        &self,
        from: &PeerId,
        to: &PeerId,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;
}

/// Accepts new incoming links for one bound identity.
pub trait Transport: Send + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;

    /// Waits for and accepts the next incoming connection.
    ///
    /// An error of kind [`ErrorKind::Network`] means the local signaling
    /// link is gone and the identity must be bound again.
    fn accept(
        &mut self,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;

    /// The identity this transport was bound to.
    fn local_id(&self) -> &PeerId;
}

/// A single link that can send and receive bytes.
pub trait Connection: Send + Sync + 'static {
    /// Sends data to the remote peer.
    fn send(
        &self,
        data: &[u8],
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receives the next message from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    fn recv(
        &self,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, TransportError>> + Send;

    /// Closes the connection.
    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;

    /// The identity at the other end of the link.
    fn remote(&self) -> &PeerId;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_new_and_into_inner() {
        let id = ConnectionId::new(42);
        assert_eq!(id.into_inner(), 42);
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::new(7);
        assert_eq!(id.to_string(), "conn-7");
    }

    #[test]
    fn test_peer_id_display_is_raw_string() {
        let id = PeerId::new("zion-alice-1000");
        assert_eq!(id.to_string(), "zion-alice-1000");
        assert_eq!(id.as_str(), "zion-alice-1000");
    }

    #[test]
    fn test_peer_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&PeerId::new("bob")).unwrap();
        assert_eq!(json, "\"bob\"");
        let back: PeerId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, PeerId::from("bob"));
    }

    #[test]
    fn test_peer_id_orders_lexicographically() {
        assert!(PeerId::from("alice") < PeerId::from("bob"));
    }
}
