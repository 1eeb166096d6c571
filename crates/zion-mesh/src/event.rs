//! Events the mesh reports to its application.

use tokio::sync::mpsc;
use zion_protocol::{Envelope, PeerId, Position};

use crate::federation::WorldInfo;

/// Everything the application hears from a [`MeshHandle`](crate::MeshHandle).
#[derive(Debug, Clone, PartialEq)]
pub enum MeshEvent {
    /// A novel application envelope. Delivered once per logical message,
    /// never for our own broadcasts, never for control types.
    Message(Envelope),
    /// A link to a new neighbour opened.
    PeerConnected(PeerId),
    /// The link to a neighbour closed.
    PeerDisconnected(PeerId),
    Federation(FederationEvent),
    /// The signaling link dropped and retry number `attempt` (1-based) is
    /// about to start.
    Reconnecting { attempt: u32 },
    /// The local identity was bound again.
    Reconnected,
}

/// Federation activity, forwarded to the host application.
#[derive(Debug, Clone, PartialEq)]
pub enum FederationEvent {
    /// Another world announced itself.
    WorldDiscovered(WorldInfo),
    /// A world handshaked with us; it is now federated.
    FederationEstablished(WorldInfo),
    /// `from`'s player is moving to `target_world`.
    CrossWorldWarp {
        from: PeerId,
        target_world: String,
        position: Position,
    },
    /// `from`'s player came back home.
    PlayerReturned { from: PeerId, position: Position },
}

/// Receiving side of the mesh's event stream.
pub type MeshEvents = mpsc::UnboundedReceiver<MeshEvent>;
