//! Lobby and gossip discovery.
//!
//! A node joins a world's lobby by dialing the world's rendezvous ids (the
//! lobby id and a handful of seed ids). Whoever holds one of those ids
//! introduces us to the rest: every `_lobby_announce` carries the
//! announcer's current neighbours, and receivers dial the ones they do
//! not know yet. One good link is enough to eventually meet everybody.
//!
//! [`Lobby`] only decides; the mesh actor does the sending and dialing.

use std::collections::{BTreeSet, HashMap};

use tokio::time::Instant;
use zion_protocol::identity::{lobby_peer_id, seed_peer_ids};
use zion_protocol::{Body, Heartbeat, LobbyAnnounce, PeerId, PeerListRequest};

#[derive(Debug)]
pub(crate) struct Lobby {
    self_id: PeerId,
    world_id: String,
    player_name: String,
    zone: String,
    known_peers: BTreeSet<PeerId>,
    last_seen: HashMap<PeerId, Instant>,
    last_announce: Option<Instant>,
}

impl Lobby {
    pub fn new(
        self_id: PeerId,
        world_id: impl Into<String>,
        player_name: impl Into<String>,
        zone: impl Into<String>,
    ) -> Self {
        Self {
            self_id,
            world_id: world_id.into(),
            player_name: player_name.into(),
            zone: zone.into(),
            known_peers: BTreeSet::new(),
            last_seen: HashMap::new(),
            last_announce: None,
        }
    }

    pub fn world_id(&self) -> &str {
        &self.world_id
    }

    pub fn set_zone(&mut self, zone: impl Into<String>) {
        self.zone = zone.into();
    }

    pub fn known_peers(&self) -> Vec<PeerId> {
        self.known_peers.iter().cloned().collect()
    }

    pub fn last_seen(&self, peer: &PeerId) -> Option<Instant> {
        self.last_seen.get(peer).copied()
    }

    /// The lobby id followed by `seed_count` seed ids, minus our own id.
    pub fn rendezvous_targets(&self, seed_count: usize) -> Vec<PeerId> {
        std::iter::once(lobby_peer_id(&self.world_id))
            .chain(seed_peer_ids(&self.world_id, seed_count))
            .filter(|id| *id != self.self_id)
            .collect()
    }

    /// Builds `_lobby_announce` listing `connected`.
    pub fn announce(&mut self, connected: Vec<PeerId>) -> Body {
        self.last_announce = Some(Instant::now());
        Body::LobbyAnnounce(LobbyAnnounce {
            peer_id: self.self_id.clone(),
            player_name: self.player_name.clone(),
            zone: self.zone.clone(),
            peers: connected,
        })
    }

    pub fn heartbeat(&self, peer_count: usize) -> Body {
        Body::Heartbeat(Heartbeat {
            peer_id: self.self_id.clone(),
            zone: self.zone.clone(),
            peer_count,
        })
    }

    pub fn peer_list_request(&self) -> Body {
        Body::PeerListRequest(PeerListRequest {
            peer_id: self.self_id.clone(),
        })
    }

    /// Gossip step. Records every id in the announce and returns, in
    /// announce order, up to `open_slots` ids worth dialing: not
    /// ourselves and not already `known` to the connection table.
    pub fn on_announce(
        &mut self,
        announce: &LobbyAnnounce,
        open_slots: usize,
        known: impl Fn(&PeerId) -> bool,
    ) -> Vec<PeerId> {
        let mut to_dial = Vec::new();
        for id in std::iter::once(&announce.peer_id).chain(&announce.peers) {
            if *id == self.self_id {
                continue;
            }
            self.known_peers.insert(id.clone());
            if to_dial.len() < open_slots && !known(id) && !to_dial.contains(id) {
                to_dial.push(id.clone());
            }
        }
        to_dial
    }

    pub fn on_heartbeat(&mut self, heartbeat: &Heartbeat) {
        if heartbeat.peer_id != self.self_id {
            self.last_seen.insert(heartbeat.peer_id.clone(), Instant::now());
        }
    }
}
