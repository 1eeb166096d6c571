//! Public entry point: [`Mesh::init`] and the [`MeshHandle`] it returns.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use zion_protocol::{Envelope, PeerId, Position};
use zion_transport::Signaling;

use crate::actor::{Command, MeshActor};
use crate::federation::{FederationRecord, WorldInfo};
use crate::{MeshConfig, MeshError, MeshEvents, MeshState};

/// Starts mesh nodes.
pub struct Mesh;

impl Mesh {
    /// Spawns the mesh actor for `self_id` on `signaling`.
    ///
    /// The actor binds the identity before it processes any command, so
    /// the first query on the returned handle already sees the outcome.
    /// Must be called inside a Tokio runtime.
    pub fn init<S: Signaling>(
        signaling: S,
        self_id: impl Into<PeerId>,
        config: MeshConfig,
    ) -> (MeshHandle, MeshEvents) {
        let config = config.validated();
        let self_id = self_id.into();
        let (tx, rx) = mpsc::channel(config.command_channel_size);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let actor = MeshActor::new(Arc::new(signaling), self_id.clone(), config, rx, event_tx);
        tokio::spawn(actor.run());

        (
            MeshHandle {
                self_id,
                sender: tx,
            },
            event_rx,
        )
    }
}

/// Handle to a running mesh actor.
///
/// Cheap to clone. Sends (`broadcast`, `connect_to_peer`, ...) never fail
/// observably: once the mesh is closed they are no-ops. Queries return
/// [`MeshError::Closed`] instead.
#[derive(Clone)]
pub struct MeshHandle {
    self_id: PeerId,
    sender: mpsc::Sender<Command>,
}

impl MeshHandle {
    /// The identity this node bound.
    pub fn self_id(&self) -> &PeerId {
        &self.self_id
    }

    async fn send(&self, cmd: Command) {
        let _ = self.sender.send(cmd).await;
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, MeshError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(make(reply_tx))
            .await
            .map_err(|_| MeshError::Closed)?;
        reply_rx.await.map_err(|_| MeshError::Closed)
    }

    // -- messaging ----------------------------------------------------------

    /// Floods `envelope` to every neighbour.
    pub async fn broadcast(&self, envelope: Envelope) {
        self.send(Command::Broadcast(envelope)).await;
    }

    /// Builds an application envelope from this node and broadcasts it.
    pub async fn publish(&self, kind: impl Into<String>, payload: Value) {
        let envelope = Envelope::app(self.self_id.clone(), kind, payload);
        self.broadcast(envelope).await;
    }

    /// Sends `envelope` to one direct neighbour only. Dropped if `peer` is
    /// not connected.
    pub async fn send_to(&self, peer: impl Into<PeerId>, envelope: Envelope) {
        self.send(Command::SendTo {
            peer: peer.into(),
            envelope,
        })
        .await;
    }

    /// Dials `peer` in the background. Idempotent.
    pub async fn connect_to_peer(&self, peer: impl Into<PeerId>) {
        self.send(Command::Connect(peer.into())).await;
    }

    // -- lobby --------------------------------------------------------------

    /// Joins `world_id`'s lobby: dials its rendezvous ids, announces right
    /// away and then on the announce and heartbeat cadences.
    pub async fn join_lobby(
        &self,
        world_id: impl Into<String>,
        player_name: impl Into<String>,
        zone: impl Into<String>,
    ) -> Result<(), MeshError> {
        let (world_id, player_name, zone) = (world_id.into(), player_name.into(), zone.into());
        self.request(|reply| Command::JoinLobby {
            world_id,
            player_name,
            zone,
            reply,
        })
        .await
    }

    /// Stops announcing and forgets lobby state. Open links stay open.
    pub async fn leave_lobby(&self) -> Result<(), MeshError> {
        self.request(|reply| Command::LeaveLobby { reply }).await?
    }

    /// Asks every peer in the mesh to announce again.
    pub async fn request_peer_list(&self) -> Result<(), MeshError> {
        self.request(|reply| Command::RequestPeerList { reply }).await?
    }

    /// Changes the zone reported in later announces and heartbeats.
    pub async fn set_zone(&self, zone: impl Into<String>) -> Result<(), MeshError> {
        let zone = zone.into();
        self.request(|reply| Command::SetZone { zone, reply }).await?
    }

    /// Every peer id seen in lobby announces since joining.
    pub async fn known_peers(&self) -> Result<Vec<PeerId>, MeshError> {
        self.request(|reply| Command::KnownPeers { reply }).await?
    }

    /// When `peer`'s last heartbeat arrived, if it ever did.
    pub async fn last_seen(&self, peer: impl Into<PeerId>) -> Result<Option<Instant>, MeshError> {
        let peer = peer.into();
        self.request(|reply| Command::LastSeen { peer, reply }).await?
    }

    // -- federation ---------------------------------------------------------

    /// Sets this node up to speak for `world_id` and starts the periodic
    /// federation announce.
    pub async fn init_federation(
        &self,
        world_id: impl Into<String>,
        world_name: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Result<(), MeshError> {
        let (world_id, world_name, endpoint) =
            (world_id.into(), world_name.into(), endpoint.into());
        self.request(|reply| Command::InitFederation {
            world_id,
            world_name,
            endpoint,
            reply,
        })
        .await
    }

    /// Broadcasts a `federation_announce` now.
    pub async fn announce_federation(&self) -> Result<(), MeshError> {
        self.request(|reply| Command::AnnounceFederation { reply })
            .await?
    }

    /// Asks `target_world` to federate with us. `info` describes the
    /// target; without it, what an earlier announce said is used.
    ///
    /// This only records `HandshakeSent` locally. We count as federated
    /// with the target once it handshakes us back.
    pub async fn federation_handshake(
        &self,
        target_world: impl Into<String>,
        info: Option<WorldInfo>,
    ) -> Result<(), MeshError> {
        let target_world = target_world.into();
        self.request(|reply| Command::FederationHandshake {
            target_world,
            info,
            reply,
        })
        .await?
    }

    /// Announces that our player is moving to `target_world`.
    pub async fn warp_fork(&self, target_world: impl Into<String>, position: Position) {
        self.send(Command::WarpFork {
            target_world: target_world.into(),
            position,
        })
        .await;
    }

    /// Announces that our player is back.
    pub async fn return_home(&self, position: Position) {
        self.send(Command::ReturnHome { position }).await;
    }

    pub async fn is_federated_with(&self, world_id: impl Into<String>) -> Result<bool, MeshError> {
        let world_id = world_id.into();
        self.request(|reply| Command::IsFederatedWith { world_id, reply })
            .await
    }

    pub async fn federated_worlds(&self) -> Result<Vec<FederationRecord>, MeshError> {
        self.request(|reply| Command::FederatedWorlds { reply }).await
    }

    pub async fn discovered_worlds(&self) -> Result<Vec<WorldInfo>, MeshError> {
        self.request(|reply| Command::DiscoveredWorlds { reply }).await
    }

    // -- state --------------------------------------------------------------

    /// Directly connected neighbours, in id order.
    pub async fn peers(&self) -> Result<Vec<PeerId>, MeshError> {
        self.request(|reply| Command::Peers { reply }).await
    }

    /// Current lifecycle state. `Disconnected` once the actor is gone.
    pub async fn state(&self) -> MeshState {
        self.request(|reply| Command::State { reply })
            .await
            .unwrap_or(MeshState::Disconnected)
    }

    /// Closes every link, releases the identity and stops the actor.
    /// Later calls on any clone of this handle are no-ops or return
    /// [`MeshError::Closed`].
    pub async fn disconnect(&self) {
        let _ = self.request(|reply| Command::Disconnect { reply }).await;
    }
}
