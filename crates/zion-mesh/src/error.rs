//! Error types for the mesh layer.
//!
//! Transport failures never show up here: the mesh absorbs them (drops a
//! peer, starts reconnecting). These are the errors an application can
//! actually act on.

/// Errors returned by [`MeshHandle`](crate::MeshHandle) operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MeshError {
    /// The mesh actor is gone (`disconnect()` was called).
    #[error("mesh is closed")]
    Closed,

    /// The operation needs `join_lobby` first.
    #[error("not in a lobby")]
    NotInLobby,

    /// The operation needs `init_federation` first.
    #[error("federation not initialized")]
    FederationNotInitialized,
}
