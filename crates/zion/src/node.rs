//! `ZionNode` builder.
//!
//! This is the entry point for putting a player on the mesh. It ties the
//! layers together: session identity, mesh actor, lobby and federation.

use zion_mesh::{Mesh, MeshConfig, MeshEvent, MeshEvents, MeshHandle};
use zion_protocol::identity::{now_ms, session_peer_id, world_id_from_url};
use zion_protocol::PeerId;
use zion_transport::Signaling;

use crate::ZionError;

/// Builder for configuring and starting a mesh node.
///
/// # Example
///
/// ```rust,ignore
/// use zion::prelude::*;
///
/// let node = ZionNode::builder("alice")
///     .world_url("https://alpha.example/")
///     .zone("spawn")
///     .start(MemorySignaling::new())
///     .await?;
/// node.handle().publish("chat", json!({ "message": "hi" })).await;
/// ```
pub struct ZionNodeBuilder {
    player_name: String,
    peer_id: Option<PeerId>,
    world_id: Option<String>,
    zone: String,
    federation: Option<(String, String)>,
    config: MeshConfig,
}

impl ZionNodeBuilder {
    /// Creates a new builder with default settings.
    pub fn new(player_name: impl Into<String>) -> Self {
        Self {
            player_name: player_name.into(),
            peer_id: None,
            world_id: None,
            zone: "spawn".to_string(),
            federation: None,
            config: MeshConfig::default(),
        }
    }

    /// Uses a fixed identity instead of a fresh session id.
    pub fn peer_id(mut self, id: impl Into<PeerId>) -> Self {
        self.peer_id = Some(id.into());
        self
    }

    /// Joins `world_id`'s lobby once started.
    pub fn world(mut self, world_id: impl Into<String>) -> Self {
        self.world_id = Some(world_id.into());
        self
    }

    /// Same as [`world`](Self::world), deriving the id from a public URL.
    pub fn world_url(self, url: &str) -> Self {
        self.world(world_id_from_url(url))
    }

    /// Sets the zone reported in lobby announces.
    pub fn zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = zone.into();
        self
    }

    /// Speaks for the world in federation, under `world_name` and
    /// reachable at `endpoint`.
    pub fn federation(mut self, world_name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        self.federation = Some((world_name.into(), endpoint.into()));
        self
    }

    /// Sets the mesh configuration.
    pub fn config(mut self, config: MeshConfig) -> Self {
        self.config = config;
        self
    }

    /// Starts the mesh on `signaling`, then joins the lobby and sets up
    /// federation if configured.
    ///
    /// Must be called inside a Tokio runtime.
    pub async fn start<S: Signaling>(self, signaling: S) -> Result<ZionNode, ZionError> {
        if self.federation.is_some() && self.world_id.is_none() {
            return Err(ZionError::MissingWorld);
        }

        let peer_id = self
            .peer_id
            .unwrap_or_else(|| session_peer_id(&self.player_name, now_ms()));
        let (handle, events) = Mesh::init(signaling, peer_id, self.config);
        let state = handle.state().await;
        tracing::info!(peer = %handle.self_id(), %state, "node started");

        if let Some(world_id) = &self.world_id {
            handle
                .join_lobby(world_id.as_str(), self.player_name.as_str(), self.zone.as_str())
                .await?;
            if let Some((world_name, endpoint)) = self.federation {
                handle
                    .init_federation(world_id.as_str(), world_name, endpoint)
                    .await?;
            }
        }

        Ok(ZionNode {
            handle,
            events,
            world_id: self.world_id,
        })
    }
}

/// A running mesh node: the handle plus its event stream.
pub struct ZionNode {
    handle: MeshHandle,
    events: MeshEvents,
    world_id: Option<String>,
}

impl ZionNode {
    /// Creates a new builder for `player_name`.
    pub fn builder(player_name: impl Into<String>) -> ZionNodeBuilder {
        ZionNodeBuilder::new(player_name)
    }

    pub fn handle(&self) -> &MeshHandle {
        &self.handle
    }

    pub fn peer_id(&self) -> &PeerId {
        self.handle.self_id()
    }

    /// The world whose lobby this node joined, if any.
    pub fn world_id(&self) -> Option<&str> {
        self.world_id.as_deref()
    }

    /// Waits for the next mesh event. `None` once the mesh has stopped.
    pub async fn next_event(&mut self) -> Option<MeshEvent> {
        self.events.recv().await
    }

    /// Returns the next event if one is already queued.
    pub fn try_next_event(&mut self) -> Option<MeshEvent> {
        self.events.try_recv().ok()
    }

    /// Splits the node for callers that drive events on another task.
    pub fn into_parts(self) -> (MeshHandle, MeshEvents) {
        (self.handle, self.events)
    }

    /// Leaves the mesh and stops the node.
    pub async fn shutdown(self) {
        self.handle.disconnect().await;
    }
}
