//! Core protocol types for the mesh wire format.
//!
//! Every frame on a link is one JSON [`Envelope`]:
//!
//! ```text
//! { "type": "chat", "from": "zion-alice-1000", "timestamp": 1700000000000,
//!   "nonce": "9f2c41d07ab3e865", "payload": { "message": "hi" } }
//! ```
//!
//! The envelope keeps `payload` as raw JSON. [`Body`] is the typed view of
//! the `type` + `payload` pair: one variant per control message the mesh
//! consumes itself, and [`Body::App`] for everything that belongs to the
//! application.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use zion_transport::PeerId;

use crate::{Fingerprint, ProtocolError, identity};

/// Reserved `type` strings consumed inside the mesh.
///
/// Envelopes of these types never reach the application's message stream.
pub mod kinds {
    pub const LOBBY_ANNOUNCE: &str = "_lobby_announce";
    pub const HEARTBEAT: &str = "_heartbeat";
    pub const PEER_LIST_REQUEST: &str = "_peer_list_request";
    pub const FEDERATION_ANNOUNCE: &str = "federation_announce";
    pub const FEDERATION_HANDSHAKE: &str = "federation_handshake";
    pub const WARP_FORK: &str = "warp_fork";
    pub const RETURN_HOME: &str = "return_home";

    /// Every reserved type, in no particular order.
    pub const RESERVED: [&str; 7] = [
        LOBBY_ANNOUNCE,
        HEARTBEAT,
        PEER_LIST_REQUEST,
        FEDERATION_ANNOUNCE,
        FEDERATION_HANDSHAKE,
        WARP_FORK,
        RETURN_HOME,
    ];
}

/// Federation protocol version carried in announces and handshakes.
pub const FEDERATION_PROTOCOL_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// One logical message on the mesh, exactly as it travels on the wire.
///
/// `(type, from, timestamp, nonce)` identifies the message; see
/// [`Envelope::fingerprint`]. The sender must vary `timestamp` or `nonce`
/// per logical event. `hops` counts relays and is not part of the
/// identity.
///
/// The payload is kept as raw JSON so relayed copies carry every field
/// the sender wrote, including ones this node does not understand. Use
/// [`Envelope::body`] for the typed view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub from: PeerId,
    /// Milliseconds since the Unix epoch at send time.
    pub timestamp: u64,
    pub nonce: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub hops: u32,
}

impl Envelope {
    /// Creates an envelope stamped with the current time and a fresh
    /// random nonce.
    pub fn new(from: impl Into<PeerId>, body: Body) -> Self {
        let (kind, payload) = body.into_parts();
        Self {
            kind,
            from: from.into(),
            timestamp: identity::now_ms(),
            nonce: generate_nonce(),
            payload,
            hops: 0,
        }
    }

    /// Creates an application envelope.
    ///
    /// `kind` should not be one of the reserved [`kinds`]; if it is, the
    /// receiving side will try to parse the payload as that control
    /// message.
    pub fn app(from: impl Into<PeerId>, kind: impl Into<String>, payload: Value) -> Self {
        Self::new(
            from,
            Body::App {
                kind: kind.into(),
                payload,
            },
        )
    }

    /// The wire `type` string.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Where the mesh hands this envelope after dedup and relay.
    pub fn route(&self) -> Route {
        Route::of(&self.kind)
    }

    /// Parses the typed body.
    ///
    /// Fails with [`ProtocolError::InvalidMessage`] when a reserved type
    /// carries a payload that does not fit its control message.
    pub fn body(&self) -> Result<Body, ProtocolError> {
        Body::from_parts(&self.kind, self.payload.clone())
    }

    /// Identity of this logical message. Payload and hop count are
    /// excluded, so every relayed copy fingerprints identically.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::compute(&self.kind, &self.from, self.timestamp, &self.nonce)
    }

    /// The copy sent on to neighbours: same identity and payload, one
    /// more hop.
    pub fn relayed(&self) -> Self {
        Self {
            hops: self.hops.saturating_add(1),
            ..self.clone()
        }
    }
}

/// 16 lowercase hex characters from 8 random bytes.
fn generate_nonce() -> String {
    let bytes: [u8; 8] = rand::random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

// ---------------------------------------------------------------------------
// Body
// ---------------------------------------------------------------------------

/// Where the mesh sends an envelope after dedup and relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Lobby,
    Federation,
    App,
}

impl Route {
    /// Route for a wire `type` string.
    pub fn of(kind: &str) -> Self {
        match kind {
            kinds::LOBBY_ANNOUNCE | kinds::HEARTBEAT | kinds::PEER_LIST_REQUEST => Route::Lobby,
            kinds::FEDERATION_ANNOUNCE
            | kinds::FEDERATION_HANDSHAKE
            | kinds::WARP_FORK
            | kinds::RETURN_HOME => Route::Federation,
            _ => Route::App,
        }
    }
}

/// Typed view of an envelope's `type` + `payload`.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    LobbyAnnounce(LobbyAnnounce),
    Heartbeat(Heartbeat),
    PeerListRequest(PeerListRequest),
    FederationAnnounce(FederationAnnounce),
    FederationHandshake(FederationHandshake),
    WarpFork(WarpFork),
    ReturnHome(ReturnHome),
    /// Any non-reserved type. The payload is opaque to the mesh.
    App { kind: String, payload: Value },
}

impl Body {
    /// Parses a wire `type` + `payload` pair.
    pub fn from_parts(kind: &str, payload: Value) -> Result<Self, ProtocolError> {
        let body = match kind {
            kinds::LOBBY_ANNOUNCE => Body::LobbyAnnounce(control(kind, payload)?),
            kinds::HEARTBEAT => Body::Heartbeat(control(kind, payload)?),
            kinds::PEER_LIST_REQUEST => Body::PeerListRequest(control(kind, payload)?),
            kinds::FEDERATION_ANNOUNCE => Body::FederationAnnounce(control(kind, payload)?),
            kinds::FEDERATION_HANDSHAKE => Body::FederationHandshake(control(kind, payload)?),
            kinds::WARP_FORK => Body::WarpFork(control(kind, payload)?),
            kinds::RETURN_HOME => Body::ReturnHome(control(kind, payload)?),
            _ => Body::App {
                kind: kind.to_owned(),
                payload,
            },
        };
        Ok(body)
    }

    /// Splits into the wire `type` + `payload` pair.
    pub fn into_parts(self) -> (String, Value) {
        let kind = self.kind().to_owned();
        let payload = match self {
            Body::LobbyAnnounce(p) => to_payload(&p),
            Body::Heartbeat(p) => to_payload(&p),
            Body::PeerListRequest(p) => to_payload(&p),
            Body::FederationAnnounce(p) => to_payload(&p),
            Body::FederationHandshake(p) => to_payload(&p),
            Body::WarpFork(p) => to_payload(&p),
            Body::ReturnHome(p) => to_payload(&p),
            Body::App { payload, .. } => payload,
        };
        (kind, payload)
    }

    /// The wire `type` string.
    pub fn kind(&self) -> &str {
        match self {
            Body::LobbyAnnounce(_) => kinds::LOBBY_ANNOUNCE,
            Body::Heartbeat(_) => kinds::HEARTBEAT,
            Body::PeerListRequest(_) => kinds::PEER_LIST_REQUEST,
            Body::FederationAnnounce(_) => kinds::FEDERATION_ANNOUNCE,
            Body::FederationHandshake(_) => kinds::FEDERATION_HANDSHAKE,
            Body::WarpFork(_) => kinds::WARP_FORK,
            Body::ReturnHome(_) => kinds::RETURN_HOME,
            Body::App { kind, .. } => kind,
        }
    }

    pub fn route(&self) -> Route {
        Route::of(self.kind())
    }

    /// True for the reserved control types.
    pub fn is_control(&self) -> bool {
        self.route() != Route::App
    }
}

fn control<T: DeserializeOwned>(kind: &str, payload: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(payload)
        .map_err(|e| ProtocolError::InvalidMessage(format!("{kind} payload: {e}")))
}

fn to_payload<T: Serialize>(value: &T) -> Value {
    // Plain derived structs always serialize to an object.
    serde_json::to_value(value).unwrap_or(Value::Null)
}

// ---------------------------------------------------------------------------
// Control payloads
// ---------------------------------------------------------------------------

/// `_lobby_announce`: who I am and who I'm connected to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyAnnounce {
    pub peer_id: PeerId,
    #[serde(default)]
    pub player_name: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub peers: Vec<PeerId>,
}

/// `_heartbeat`: liveness ping, consumed by the lobby.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    pub peer_id: PeerId,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub peer_count: usize,
}

/// `_peer_list_request`: asks every receiver to announce again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerListRequest {
    pub peer_id: PeerId,
}

/// `federation_announce`: a world advertising itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FederationAnnounce {
    pub world_id: String,
    #[serde(default)]
    pub world_name: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u32,
    #[serde(default)]
    pub player_count: usize,
    pub peer_id: PeerId,
}

/// `federation_handshake`: a request to federate with `to_world`.
///
/// The world ids are snake_case on the wire, the rest camelCase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederationHandshake {
    pub from_world: String,
    pub to_world: String,
    #[serde(rename = "worldName", default)]
    pub world_name: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(rename = "protocolVersion", default = "default_protocol_version")]
    pub protocol_version: u32,
    #[serde(rename = "peerId")]
    pub peer_id: PeerId,
}

/// `warp_fork`: the sender's player is moving to `target_world`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarpFork {
    pub target_world: String,
    #[serde(default)]
    pub position: Position,
}

/// `return_home`: the sender's player came back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnHome {
    #[serde(default)]
    pub position: Position,
}

/// A point in world space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

fn default_protocol_version() -> u32 {
    FEDERATION_PROTOCOL_VERSION
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
