//! Cross-world federation.
//!
//! Worlds advertise themselves with `federation_announce` and ask to
//! federate with `federation_handshake`. The protocol is one-way: the
//! world that *receives* a handshake addressed to it marks the sender as
//! active, while the sender only records `HandshakeSent` until the other
//! side handshakes back.
//!
//! Like the lobby, [`Federation`] only holds state and decides; the mesh
//! actor broadcasts what it returns.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use zion_protocol::{
    Body, FEDERATION_PROTOCOL_VERSION, FederationAnnounce, FederationHandshake, PeerId,
};

use crate::FederationEvent;

/// What we know about another world.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldInfo {
    pub world_id: String,
    pub world_name: String,
    pub endpoint: String,
    pub protocol_version: u32,
    pub player_count: usize,
    /// The peer that spoke for the world, if known.
    pub peer_id: Option<PeerId>,
}

impl WorldInfo {
    /// Info for a world we only know by id.
    pub fn new(world_id: impl Into<String>) -> Self {
        Self {
            world_id: world_id.into(),
            world_name: String::new(),
            endpoint: String::new(),
            protocol_version: FEDERATION_PROTOCOL_VERSION,
            player_count: 0,
            peer_id: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.world_name = name.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

impl From<&FederationAnnounce> for WorldInfo {
    fn from(a: &FederationAnnounce) -> Self {
        Self {
            world_id: a.world_id.clone(),
            world_name: a.world_name.clone(),
            endpoint: a.endpoint.clone(),
            protocol_version: a.protocol_version,
            player_count: a.player_count,
            peer_id: Some(a.peer_id.clone()),
        }
    }
}

impl From<&FederationHandshake> for WorldInfo {
    fn from(h: &FederationHandshake) -> Self {
        Self {
            world_id: h.from_world.clone(),
            world_name: h.world_name.clone(),
            endpoint: h.endpoint.clone(),
            protocol_version: h.protocol_version,
            player_count: 0,
            peer_id: Some(h.peer_id.clone()),
        }
    }
}

/// Where a federation relationship stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FederationStatus {
    /// We handshaked; the other world has not handshaked us.
    HandshakeSent,
    /// The other world handshaked us.
    Active,
}

/// One entry of the federated-worlds map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederationRecord {
    pub world: WorldInfo,
    pub status: FederationStatus,
}

#[derive(Debug)]
pub(crate) struct Federation {
    world_id: String,
    world_name: String,
    endpoint: String,
    federated: BTreeMap<String, FederationRecord>,
    discovered: BTreeMap<String, WorldInfo>,
}

impl Federation {
    pub fn new(
        world_id: impl Into<String>,
        world_name: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            world_id: world_id.into(),
            world_name: world_name.into(),
            endpoint: endpoint.into(),
            federated: BTreeMap::new(),
            discovered: BTreeMap::new(),
        }
    }

    pub fn world_id(&self) -> &str {
        &self.world_id
    }

    pub fn announce(&self, self_id: &PeerId, player_count: usize) -> Body {
        Body::FederationAnnounce(FederationAnnounce {
            world_id: self.world_id.clone(),
            world_name: self.world_name.clone(),
            endpoint: self.endpoint.clone(),
            protocol_version: FEDERATION_PROTOCOL_VERSION,
            player_count,
            peer_id: self_id.clone(),
        })
    }

    /// Records `HandshakeSent` for `target` and builds the handshake.
    ///
    /// Without explicit `info`, whatever an earlier announce told us about
    /// the target is used. An already active record is left active.
    pub fn handshake(
        &mut self,
        self_id: &PeerId,
        target_world: &str,
        info: Option<WorldInfo>,
    ) -> Body {
        let world = info
            .or_else(|| self.discovered.get(target_world).cloned())
            .unwrap_or_else(|| WorldInfo::new(target_world));

        self.federated
            .entry(target_world.to_owned())
            .and_modify(|record| record.world = world.clone())
            .or_insert(FederationRecord {
                world,
                status: FederationStatus::HandshakeSent,
            });

        Body::FederationHandshake(FederationHandshake {
            from_world: self.world_id.clone(),
            to_world: target_world.to_owned(),
            world_name: self.world_name.clone(),
            endpoint: self.endpoint.clone(),
            protocol_version: FEDERATION_PROTOCOL_VERSION,
            peer_id: self_id.clone(),
        })
    }

    /// Records another world's announce. Our own world's announces are
    /// ignored.
    pub fn on_announce(&mut self, announce: &FederationAnnounce) -> Option<FederationEvent> {
        if announce.world_id == self.world_id {
            return None;
        }
        let info = WorldInfo::from(announce);
        self.discovered.insert(info.world_id.clone(), info.clone());
        Some(FederationEvent::WorldDiscovered(info))
    }

    /// Activates the sender's record if the handshake is addressed to us.
    pub fn on_handshake(&mut self, handshake: &FederationHandshake) -> Option<FederationEvent> {
        if handshake.to_world != self.world_id || handshake.from_world == self.world_id {
            return None;
        }
        let info = WorldInfo::from(handshake);
        self.federated.insert(
            info.world_id.clone(),
            FederationRecord {
                world: info.clone(),
                status: FederationStatus::Active,
            },
        );
        Some(FederationEvent::FederationEstablished(info))
    }

    pub fn is_federated_with(&self, world_id: &str) -> bool {
        self.federated
            .get(world_id)
            .is_some_and(|r| r.status == FederationStatus::Active)
    }

    pub fn federated_worlds(&self) -> Vec<FederationRecord> {
        self.federated.values().cloned().collect()
    }

    pub fn discovered_worlds(&self) -> Vec<WorldInfo> {
        self.discovered.values().cloned().collect()
    }
}

/// `warp_fork` / `return_home` as application events. These need no
/// federation state.
pub(crate) fn presence_event(from: &PeerId, body: &Body) -> Option<FederationEvent> {
    match body {
        Body::WarpFork(w) => Some(FederationEvent::CrossWorldWarp {
            from: from.clone(),
            target_world: w.target_world.clone(),
            position: w.position,
        }),
        Body::ReturnHome(r) => Some(FederationEvent::PlayerReturned {
            from: from.clone(),
            position: r.position,
        }),
        _ => None,
    }
}
