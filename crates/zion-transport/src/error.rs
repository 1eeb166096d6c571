use crate::PeerId;

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No signaling substrate is available on this host.
    #[error("signaling unavailable: {0}")]
    Unavailable(String),

    /// Nobody answered at the target identity. Expected while discovering
    /// rendezvous ids that no node has claimed yet.
    #[error("peer {0} unreachable")]
    PeerUnreachable(PeerId),

    /// Another node already holds this identity on the substrate.
    #[error("peer id {0} already claimed")]
    IdTaken(PeerId),

    /// The local signaling link dropped.
    #[error("signaling link lost: {0}")]
    Network(String),

    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Binding or accepting connections failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// The transport was shut down.
    #[error("transport shut down")]
    Shutdown,
}

/// How the mesh reacts to a [`TransportError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Networking is disabled for this session. Logged once.
    Unavailable,
    /// Benign; never retried.
    PeerUnreachable,
    /// The local signaling link is gone; reconnection required.
    Network,
    /// A single link is closed or half-open; only that peer is dropped.
    SendFailure,
}

impl TransportError {
    /// Classifies this error for the mesh's recovery policy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unavailable(_) => ErrorKind::Unavailable,
            Self::PeerUnreachable(_) => ErrorKind::PeerUnreachable,
            Self::IdTaken(_)
            | Self::Network(_)
            | Self::AcceptFailed(_)
            | Self::Shutdown => ErrorKind::Network,
            Self::ConnectionClosed(_)
            | Self::SendFailed(_)
            | Self::ReceiveFailed(_) => ErrorKind::SendFailure,
        }
    }
}
