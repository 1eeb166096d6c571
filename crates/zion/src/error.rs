//! Unified error type for the Zion networking core.

use zion_mesh::MeshError;
use zion_protocol::ProtocolError;
use zion_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `zion` meta-crate, you deal with this single error type
/// instead of importing errors from each sub-crate.
#[derive(Debug, thiserror::Error)]
pub enum ZionError {
    /// A transport-level error (bind, dial, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid message).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A mesh-level error (closed, not in a lobby, no federation).
    #[error(transparent)]
    Mesh(#[from] MeshError),

    /// Federation was requested without a world to speak for.
    #[error("federation needs a world id")]
    MissingWorld,
}
