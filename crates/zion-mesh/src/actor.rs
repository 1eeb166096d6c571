//! Mesh actor: the one task that owns a node's mesh state.
//!
//! The connection table, dedup cache, lobby and federation state live
//! here and nowhere else. Handles talk to the actor over a command
//! channel; every link gets a reader task and a writer task that report
//! back over the inbound channel. Because only this task mutates state,
//! a message's dedup check-and-insert can never race with itself.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use zion_protocol::{Body, Codec, Envelope, JsonCodec, Position, Route, ReturnHome, WarpFork};
use zion_tick::{TickConfig, TickScheduler};
use zion_transport::{
    Connection, ConnectionId, ErrorKind, PeerId, Signaling, Transport, TransportError,
};

use crate::dedup::DedupCache;
use crate::federation::{Federation, FederationRecord, WorldInfo, presence_event};
use crate::lobby::Lobby;
use crate::reconnect::{ReconnectPolicy, supervise};
use crate::table::{ConnectionTable, Direction, Link, keep_new_link};
use crate::{FederationEvent, MeshConfig, MeshError, MeshEvent, MeshState};

/// Commands sent to the mesh actor through its channel.
///
/// The `oneshot::Sender` in some variants is a reply channel; the rest are
/// fire-and-forget.
pub(crate) enum Command {
    Broadcast(Envelope),
    SendTo {
        peer: PeerId,
        envelope: Envelope,
    },
    Connect(PeerId),
    JoinLobby {
        world_id: String,
        player_name: String,
        zone: String,
        reply: oneshot::Sender<()>,
    },
    LeaveLobby {
        reply: oneshot::Sender<Result<(), MeshError>>,
    },
    RequestPeerList {
        reply: oneshot::Sender<Result<(), MeshError>>,
    },
    SetZone {
        zone: String,
        reply: oneshot::Sender<Result<(), MeshError>>,
    },
    KnownPeers {
        reply: oneshot::Sender<Result<Vec<PeerId>, MeshError>>,
    },
    LastSeen {
        peer: PeerId,
        reply: oneshot::Sender<Result<Option<Instant>, MeshError>>,
    },
    InitFederation {
        world_id: String,
        world_name: String,
        endpoint: String,
        reply: oneshot::Sender<()>,
    },
    AnnounceFederation {
        reply: oneshot::Sender<Result<(), MeshError>>,
    },
    FederationHandshake {
        target_world: String,
        info: Option<WorldInfo>,
        reply: oneshot::Sender<Result<(), MeshError>>,
    },
    WarpFork {
        target_world: String,
        position: Position,
    },
    ReturnHome {
        position: Position,
    },
    IsFederatedWith {
        world_id: String,
        reply: oneshot::Sender<bool>,
    },
    FederatedWorlds {
        reply: oneshot::Sender<Vec<FederationRecord>>,
    },
    DiscoveredWorlds {
        reply: oneshot::Sender<Vec<WorldInfo>>,
    },
    Peers {
        reply: oneshot::Sender<Vec<PeerId>>,
    },
    State {
        reply: oneshot::Sender<MeshState>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
}

/// Reports from link, listener and reconnection tasks.
pub(crate) enum Inbound<S: Signaling> {
    LinkOpened {
        conn: S::Connection,
        direction: Direction,
    },
    DialFailed {
        peer: PeerId,
        error: TransportError,
    },
    Received {
        peer: PeerId,
        envelope: Envelope,
    },
    LinkClosed {
        peer: PeerId,
        conn_id: ConnectionId,
        error: Option<TransportError>,
    },
    ListenerFailed(TransportError),
    Rebound(S::Transport),
    ReconnectExhausted,
}

type InboundSender<S> = mpsc::UnboundedSender<Inbound<S>>;

/// Whether the actor loop keeps going after a command.
#[derive(PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

pub(crate) struct MeshActor<S: Signaling> {
    signaling: Arc<S>,
    self_id: PeerId,
    config: MeshConfig,
    state: MeshState,
    codec: JsonCodec,
    table: ConnectionTable,
    dedup: DedupCache,
    lobby: Option<Lobby>,
    federation: Option<Federation>,
    announce_tick: TickScheduler,
    heartbeat_tick: TickScheduler,
    federation_tick: TickScheduler,
    commands: mpsc::Receiver<Command>,
    inbound_tx: InboundSender<S>,
    inbound_rx: mpsc::UnboundedReceiver<Inbound<S>>,
    events: mpsc::UnboundedSender<MeshEvent>,
    /// The accept task. `None` while the local identity is not bound.
    listener: Option<AbortHandle>,
    /// The running reconnection episode, until its outcome is handled.
    reconnect: Option<JoinHandle<()>>,
}

impl<S: Signaling> MeshActor<S> {
    pub fn new(
        signaling: Arc<S>,
        self_id: PeerId,
        config: MeshConfig,
        commands: mpsc::Receiver<Command>,
        events: mpsc::UnboundedSender<MeshEvent>,
    ) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let announce_tick = TickScheduler::stopped(
            TickConfig::every(config.announce_interval).with_jitter(config.announce_jitter),
        );
        let heartbeat_tick = TickScheduler::stopped(TickConfig::every(config.heartbeat_interval));
        let federation_tick =
            TickScheduler::stopped(TickConfig::every(config.federation_announce_interval));

        Self {
            signaling,
            self_id,
            dedup: DedupCache::new(config.dedup_capacity),
            config,
            state: MeshState::Initializing,
            codec: JsonCodec,
            table: ConnectionTable::new(),
            lobby: None,
            federation: None,
            announce_tick,
            heartbeat_tick,
            federation_tick,
            commands,
            inbound_tx,
            inbound_rx,
            events,
            listener: None,
            reconnect: None,
        }
    }

    /// Binds the local identity, then processes commands, link reports
    /// and cadence ticks until `disconnect()` or until every handle is
    /// dropped.
    pub async fn run(mut self) {
        tracing::info!(peer = %self.self_id, "mesh actor started");
        self.bind().await;

        loop {
            tokio::select! {
                cmd = self.commands.recv() => {
                    let Some(cmd) = cmd else {
                        tracing::debug!(peer = %self.self_id, "all handles dropped");
                        break;
                    };
                    if self.handle_command(cmd) == Flow::Stop {
                        break;
                    }
                }
                Some(inbound) = self.inbound_rx.recv() => {
                    self.handle_inbound(inbound);
                }
                _ = self.announce_tick.wait_for_tick() => {
                    self.on_announce_tick();
                }
                _ = self.heartbeat_tick.wait_for_tick() => {
                    self.on_heartbeat_tick();
                }
                _ = self.federation_tick.wait_for_tick() => {
                    self.on_federation_tick();
                }
            }
        }

        self.shutdown();
        tracing::info!(peer = %self.self_id, "mesh actor stopped");
    }

    // -----------------------------------------------------------------------
    // Local identity
    // -----------------------------------------------------------------------

    async fn bind(&mut self) {
        self.state = MeshState::Initializing;
        match self.signaling.bind(&self.self_id).await {
            Ok(transport) => self.open(transport),
            Err(e) if e.kind() == ErrorKind::Unavailable => {
                tracing::warn!(
                    peer = %self.self_id,
                    error = %e,
                    "peer transport unavailable, running without networking"
                );
                self.state = MeshState::Offline;
            }
            Err(e) => {
                tracing::warn!(peer = %self.self_id, error = %e, "bind failed");
                self.start_reconnect();
            }
        }
    }

    fn open(&mut self, transport: S::Transport) {
        let task = tokio::spawn(accept_loop::<S>(transport, self.inbound_tx.clone()));
        self.listener = Some(task.abort_handle());
        self.state = MeshState::Open;
        tracing::info!(peer = %self.self_id, "mesh open");
    }

    /// The signaling link is gone: stop listening and re-bind.
    fn lose_signaling(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        if self.state == MeshState::Open {
            self.state = MeshState::Initializing;
        }
        self.start_reconnect();
    }

    fn start_reconnect(&mut self) {
        if self.reconnect.is_some() || !self.state.can_dial() {
            return;
        }
        let signaling = Arc::clone(&self.signaling);
        let id = self.self_id.clone();
        let policy = ReconnectPolicy::new(&self.config.reconnect);
        let events = self.events.clone();
        let inbound = self.inbound_tx.clone();

        self.reconnect = Some(tokio::spawn(async move {
            let outcome = match supervise(signaling, id, policy, events).await {
                Some(transport) => Inbound::Rebound(transport),
                None => Inbound::ReconnectExhausted,
            };
            let _ = inbound.send(outcome);
        }));
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    fn handle_command(&mut self, cmd: Command) -> Flow {
        match cmd {
            Command::Broadcast(envelope) => self.broadcast(envelope),
            Command::SendTo { peer, envelope } => self.send_to(&peer, envelope),
            Command::Connect(peer) => self.connect(peer),
            Command::JoinLobby {
                world_id,
                player_name,
                zone,
                reply,
            } => {
                self.join_lobby(world_id, player_name, zone);
                let _ = reply.send(());
            }
            Command::LeaveLobby { reply } => {
                let _ = reply.send(self.leave_lobby());
            }
            Command::RequestPeerList { reply } => {
                let result = match &self.lobby {
                    Some(lobby) => {
                        let body = lobby.peer_list_request();
                        self.broadcast_body(body);
                        Ok(())
                    }
                    None => Err(MeshError::NotInLobby),
                };
                let _ = reply.send(result);
            }
            Command::SetZone { zone, reply } => {
                let result = match self.lobby.as_mut() {
                    Some(lobby) => {
                        lobby.set_zone(zone);
                        Ok(())
                    }
                    None => Err(MeshError::NotInLobby),
                };
                let _ = reply.send(result);
            }
            Command::KnownPeers { reply } => {
                let result = self
                    .lobby
                    .as_ref()
                    .map(Lobby::known_peers)
                    .ok_or(MeshError::NotInLobby);
                let _ = reply.send(result);
            }
            Command::LastSeen { peer, reply } => {
                let result = self
                    .lobby
                    .as_ref()
                    .map(|lobby| lobby.last_seen(&peer))
                    .ok_or(MeshError::NotInLobby);
                let _ = reply.send(result);
            }
            Command::InitFederation {
                world_id,
                world_name,
                endpoint,
                reply,
            } => {
                tracing::info!(peer = %self.self_id, world = %world_id, "federation initialized");
                self.federation = Some(Federation::new(world_id, world_name, endpoint));
                self.federation_tick.start();
                let _ = reply.send(());
            }
            Command::AnnounceFederation { reply } => {
                let result = self.announce_federation();
                let _ = reply.send(result);
            }
            Command::FederationHandshake {
                target_world,
                info,
                reply,
            } => {
                let result = match self.federation.as_mut() {
                    Some(federation) => {
                        tracing::info!(
                            peer = %self.self_id,
                            from = federation.world_id(),
                            to = %target_world,
                            "sending federation handshake"
                        );
                        let body = federation.handshake(&self.self_id, &target_world, info);
                        self.broadcast_body(body);
                        Ok(())
                    }
                    None => Err(MeshError::FederationNotInitialized),
                };
                let _ = reply.send(result);
            }
            Command::WarpFork {
                target_world,
                position,
            } => self.broadcast_body(Body::WarpFork(WarpFork {
                target_world,
                position,
            })),
            Command::ReturnHome { position } => {
                self.broadcast_body(Body::ReturnHome(ReturnHome { position }))
            }
            Command::IsFederatedWith { world_id, reply } => {
                let federated = self
                    .federation
                    .as_ref()
                    .is_some_and(|f| f.is_federated_with(&world_id));
                let _ = reply.send(federated);
            }
            Command::FederatedWorlds { reply } => {
                let worlds = self
                    .federation
                    .as_ref()
                    .map(Federation::federated_worlds)
                    .unwrap_or_default();
                let _ = reply.send(worlds);
            }
            Command::DiscoveredWorlds { reply } => {
                let worlds = self
                    .federation
                    .as_ref()
                    .map(Federation::discovered_worlds)
                    .unwrap_or_default();
                let _ = reply.send(worlds);
            }
            Command::Peers { reply } => {
                let _ = reply.send(self.table.peers());
            }
            Command::State { reply } => {
                let _ = reply.send(self.state);
            }
            Command::Disconnect { reply } => {
                tracing::info!(peer = %self.self_id, "disconnecting");
                self.shutdown();
                let _ = reply.send(());
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    /// Records the fingerprint, then sends to every open link. Our own
    /// message coming back through a relay is therefore a duplicate.
    fn broadcast(&mut self, envelope: Envelope) {
        if !self.state.can_dial() {
            tracing::trace!(peer = %self.self_id, state = %self.state, "broadcast dropped");
            return;
        }
        self.dedup.insert(envelope.fingerprint());
        match self.codec.encode_envelope(&envelope) {
            Ok(bytes) => {
                let sent = self.table.fan_out(&bytes, None);
                tracing::trace!(peer = %self.self_id, kind = envelope.kind(), sent, "broadcast");
            }
            Err(e) => {
                tracing::warn!(peer = %self.self_id, kind = envelope.kind(), error = %e, "encode failed");
            }
        }
    }

    fn broadcast_body(&mut self, body: Body) {
        let envelope = Envelope::new(self.self_id.clone(), body);
        self.broadcast(envelope);
    }

    fn send_to(&mut self, peer: &PeerId, envelope: Envelope) {
        if !self.state.can_dial() {
            return;
        }
        self.dedup.insert(envelope.fingerprint());
        match self.codec.encode_envelope(&envelope) {
            Ok(bytes) => {
                if !self.table.send_to(peer, bytes) {
                    tracing::debug!(peer = %self.self_id, to = %peer, "send_to: not connected");
                }
            }
            Err(e) => {
                tracing::warn!(peer = %self.self_id, kind = envelope.kind(), error = %e, "encode failed");
            }
        }
    }

    /// Dials `peer` in the background unless it is us, already connected,
    /// or already being dialed.
    fn connect(&mut self, peer: PeerId) {
        if peer == self.self_id || !self.state.can_dial() || self.table.is_known(&peer) {
            return;
        }
        self.table.start_dial(&peer);
        tracing::debug!(peer = %self.self_id, to = %peer, "dialing");

        let signaling = Arc::clone(&self.signaling);
        let from = self.self_id.clone();
        let inbound = self.inbound_tx.clone();
        tokio::spawn(async move {
            let result = signaling.dial(&from, &peer).await;
            let report = match result {
                Ok(conn) => Inbound::LinkOpened {
                    conn,
                    direction: Direction::Dialed,
                },
                Err(error) => Inbound::DialFailed { peer, error },
            };
            let _ = inbound.send(report);
        });
    }

    // -----------------------------------------------------------------------
    // Link reports
    // -----------------------------------------------------------------------

    fn handle_inbound(&mut self, inbound: Inbound<S>) {
        match inbound {
            Inbound::LinkOpened { conn, direction } => self.on_link_opened(conn, direction),
            Inbound::DialFailed { peer, error } => {
                self.table.finish_dial(&peer);
                match error.kind() {
                    ErrorKind::PeerUnreachable => {
                        tracing::debug!(peer = %self.self_id, to = %peer, "peer unreachable");
                    }
                    _ => {
                        tracing::debug!(peer = %self.self_id, to = %peer, error = %error, "dial failed");
                    }
                }
            }
            Inbound::Received { peer, envelope } => self.receive(peer, envelope),
            Inbound::LinkClosed {
                peer,
                conn_id,
                error,
            } => self.on_link_closed(peer, conn_id, error),
            Inbound::ListenerFailed(error) => {
                tracing::warn!(peer = %self.self_id, error = %error, "signaling link lost");
                self.listener = None;
                self.lose_signaling();
            }
            Inbound::Rebound(transport) => {
                self.reconnect = None;
                self.open(transport);
                let _ = self.events.send(MeshEvent::Reconnected);
                if let Some(lobby) = &self.lobby {
                    for target in lobby.rendezvous_targets(self.config.seed_count) {
                        self.connect(target);
                    }
                }
            }
            Inbound::ReconnectExhausted => {
                self.reconnect = None;
            }
        }
    }

    fn on_link_opened(&mut self, conn: S::Connection, direction: Direction) {
        let peer = conn.remote().clone();
        if direction == Direction::Dialed {
            self.table.finish_dial(&peer);
        }

        if peer == self.self_id {
            close_in_background(conn);
            return;
        }
        if let Some(existing) = self.table.get(&peer) {
            if !keep_new_link(&self.self_id, &peer, existing.direction, direction) {
                tracing::debug!(peer = %self.self_id, remote = %peer, "duplicate link, keeping existing");
                close_in_background(conn);
                return;
            }
            tracing::debug!(peer = %self.self_id, remote = %peer, "duplicate link, replacing existing");
        }

        let link = self.spawn_link(conn, direction);
        if self.table.insert(peer.clone(), link).is_none() {
            tracing::info!(
                peer = %self.self_id,
                remote = %peer,
                ?direction,
                peers = self.table.len(),
                "peer connected"
            );
            let _ = self.events.send(MeshEvent::PeerConnected(peer));
        }
    }

    fn spawn_link(&self, conn: S::Connection, direction: Direction) -> Link {
        let conn = Arc::new(conn);
        let conn_id = conn.id();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(write_loop::<S>(
            Arc::clone(&conn),
            outbound_rx,
            self.inbound_tx.clone(),
        ));
        let reader = tokio::spawn(read_loop::<S>(conn, self.codec, self.inbound_tx.clone()));

        Link::new(conn_id, direction, outbound_tx, reader.abort_handle())
    }

    fn on_link_closed(
        &mut self,
        peer: PeerId,
        conn_id: ConnectionId,
        error: Option<TransportError>,
    ) {
        if self.table.remove(&peer, conn_id).is_none() {
            tracing::trace!(peer = %self.self_id, remote = %peer, %conn_id, "stale link closed");
            return;
        }

        match &error {
            None => tracing::info!(
                peer = %self.self_id,
                remote = %peer,
                peers = self.table.len(),
                "peer disconnected"
            ),
            Some(e) => tracing::info!(
                peer = %self.self_id,
                remote = %peer,
                error = %e,
                peers = self.table.len(),
                "peer link failed"
            ),
        }
        let _ = self.events.send(MeshEvent::PeerDisconnected(peer));

        if error.is_some_and(|e| e.kind() == ErrorKind::Network) {
            self.lose_signaling();
        }
    }

    // -----------------------------------------------------------------------
    // Receive path
    // -----------------------------------------------------------------------

    /// Dedup, relay, route.
    fn receive(&mut self, via: PeerId, envelope: Envelope) {
        let fingerprint = envelope.fingerprint();
        if !self.dedup.insert(fingerprint) {
            tracing::trace!(peer = %self.self_id, %via, %fingerprint, "duplicate dropped");
            return;
        }

        self.relay(&via, &envelope);

        let route = envelope.route();
        if route == Route::App {
            let _ = self.events.send(MeshEvent::Message(envelope));
            return;
        }
        let body = match envelope.body() {
            Ok(body) => body,
            Err(e) => {
                tracing::debug!(peer = %self.self_id, %via, error = %e, "ignoring unreadable control payload");
                return;
            }
        };
        match route {
            Route::Lobby => self.on_lobby_message(&body),
            Route::Federation => self.on_federation_message(&envelope.from, &body),
            Route::App => {}
        }
    }

    fn relay(&self, via: &PeerId, envelope: &Envelope) {
        if let Some(limit) = self.config.relay_hop_limit {
            if envelope.hops >= limit {
                tracing::trace!(peer = %self.self_id, hops = envelope.hops, "hop limit reached, not relaying");
                return;
            }
        }
        match self.codec.encode_envelope(&envelope.relayed()) {
            Ok(bytes) => {
                let relayed = self.table.fan_out(&bytes, Some(via));
                tracing::trace!(peer = %self.self_id, kind = envelope.kind(), relayed, "relayed");
            }
            Err(e) => {
                tracing::warn!(peer = %self.self_id, error = %e, "relay encode failed");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Lobby
    // -----------------------------------------------------------------------

    fn join_lobby(&mut self, world_id: String, player_name: String, zone: String) {
        let lobby = Lobby::new(self.self_id.clone(), world_id, player_name, zone);
        let targets = lobby.rendezvous_targets(self.config.seed_count);
        tracing::info!(
            peer = %self.self_id,
            world = lobby.world_id(),
            rendezvous = targets.len(),
            "joining lobby"
        );
        self.lobby = Some(lobby);

        for target in targets {
            self.connect(target);
        }
        self.announce_tick.start();
        self.heartbeat_tick.start();
        self.announce();
    }

    fn leave_lobby(&mut self) -> Result<(), MeshError> {
        let lobby = self.lobby.take().ok_or(MeshError::NotInLobby)?;
        self.announce_tick.stop();
        self.heartbeat_tick.stop();
        tracing::info!(peer = %self.self_id, world = lobby.world_id(), "left lobby");
        Ok(())
    }

    fn announce(&mut self) {
        let peers = self.table.peers();
        let Some(lobby) = self.lobby.as_mut() else {
            return;
        };
        let body = lobby.announce(peers);
        self.broadcast_body(body);
    }

    fn on_lobby_message(&mut self, body: &Body) {
        let Some(lobby) = self.lobby.as_mut() else {
            tracing::trace!(peer = %self.self_id, kind = body.kind(), "not in a lobby, ignoring");
            return;
        };

        match body {
            Body::LobbyAnnounce(announce) => {
                let open_slots = self.config.max_peers.saturating_sub(self.table.occupied());
                let table = &self.table;
                let to_dial = lobby.on_announce(announce, open_slots, |p| table.is_known(p));
                if !to_dial.is_empty() {
                    tracing::debug!(
                        peer = %self.self_id,
                        from = %announce.peer_id,
                        dialing = to_dial.len(),
                        "gossip"
                    );
                }
                for peer in to_dial {
                    self.connect(peer);
                }
            }
            Body::Heartbeat(heartbeat) => lobby.on_heartbeat(heartbeat),
            Body::PeerListRequest(_) => self.announce(),
            _ => {}
        }
    }

    fn on_announce_tick(&mut self) {
        if self.listener.is_none()
            && self.state == MeshState::Initializing
            && self.reconnect.is_none()
        {
            tracing::info!(peer = %self.self_id, "signaling still down, new reconnection episode");
            self.start_reconnect();
        }
        self.announce();
    }

    fn on_heartbeat_tick(&mut self) {
        let peer_count = self.table.len();
        let Some(lobby) = &self.lobby else {
            return;
        };
        let body = lobby.heartbeat(peer_count);
        self.broadcast_body(body);
    }

    // -----------------------------------------------------------------------
    // Federation
    // -----------------------------------------------------------------------

    fn announce_federation(&mut self) -> Result<(), MeshError> {
        let federation = self
            .federation
            .as_ref()
            .ok_or(MeshError::FederationNotInitialized)?;
        let body = federation.announce(&self.self_id, self.table.len() + 1);
        self.broadcast_body(body);
        Ok(())
    }

    fn on_federation_tick(&mut self) {
        let _ = self.announce_federation();
    }

    fn on_federation_message(&mut self, from: &PeerId, body: &Body) {
        let event = match body {
            Body::FederationAnnounce(announce) => self
                .federation
                .as_mut()
                .and_then(|f| f.on_announce(announce)),
            Body::FederationHandshake(handshake) => self
                .federation
                .as_mut()
                .and_then(|f| f.on_handshake(handshake)),
            body => presence_event(from, body),
        };
        let Some(event) = event else {
            return;
        };

        match &event {
            FederationEvent::FederationEstablished(world) => tracing::info!(
                peer = %self.self_id,
                world = %world.world_id,
                "federation established"
            ),
            FederationEvent::WorldDiscovered(world) => tracing::debug!(
                peer = %self.self_id,
                world = %world.world_id,
                players = world.player_count,
                "world discovered"
            ),
            _ => {}
        }
        let _ = self.events.send(MeshEvent::Federation(event));
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Closes every link, forgets lobby and federation state, releases
    /// the local identity and stops every cadence.
    fn shutdown(&mut self) {
        if self.state == MeshState::Disconnected {
            return;
        }
        for peer in self.table.peers() {
            let _ = self.events.send(MeshEvent::PeerDisconnected(peer));
        }
        self.table.clear();
        self.dedup.clear();
        self.lobby = None;
        self.federation = None;
        self.announce_tick.stop();
        self.heartbeat_tick.stop();
        self.federation_tick.stop();
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        if let Some(reconnect) = self.reconnect.take() {
            reconnect.abort();
        }
        self.state = MeshState::Disconnected;
    }
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

async fn accept_loop<S: Signaling>(mut transport: S::Transport, inbound: InboundSender<S>) {
    loop {
        match transport.accept().await {
            Ok(conn) => {
                let opened = Inbound::LinkOpened {
                    conn,
                    direction: Direction::Accepted,
                };
                if inbound.send(opened).is_err() {
                    return;
                }
            }
            Err(e) => {
                let _ = inbound.send(Inbound::ListenerFailed(e));
                return;
            }
        }
    }
}

/// Decodes frames off the link. Malformed frames are dropped; the link
/// stays up.
async fn read_loop<S: Signaling>(
    conn: Arc<S::Connection>,
    codec: JsonCodec,
    inbound: InboundSender<S>,
) {
    let peer = conn.remote().clone();
    let conn_id = conn.id();

    let error = loop {
        match conn.recv().await {
            Ok(Some(bytes)) => match codec.decode_envelope(&bytes) {
                Ok(envelope) => {
                    let report = Inbound::Received {
                        peer: peer.clone(),
                        envelope,
                    };
                    if inbound.send(report).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    tracing::debug!(remote = %peer, error = %e, "dropping malformed frame");
                }
            },
            Ok(None) => break None,
            Err(e) => break Some(e),
        }
    };

    let _ = inbound.send(Inbound::LinkClosed {
        peer,
        conn_id,
        error,
    });
}

/// Writes queued frames in order. Closes the connection once the actor
/// drops the link.
async fn write_loop<S: Signaling>(
    conn: Arc<S::Connection>,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    inbound: InboundSender<S>,
) {
    while let Some(bytes) = outbound.recv().await {
        if let Err(error) = conn.send(&bytes).await {
            let _ = inbound.send(Inbound::LinkClosed {
                peer: conn.remote().clone(),
                conn_id: conn.id(),
                error: Some(error),
            });
            break;
        }
    }
    let _ = conn.close().await;
}

fn close_in_background<C: Connection>(conn: C) {
    tokio::spawn(async move {
        let _ = conn.close().await;
    });
}
