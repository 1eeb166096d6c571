//! Mesh configuration and state machine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// MeshConfig
// ---------------------------------------------------------------------------

/// Configuration for one mesh node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshConfig {
    /// How many message fingerprints to remember for duplicate suppression.
    pub dedup_capacity: usize,

    /// Gossip stops dialing new peers once this many links are open.
    pub max_peers: usize,

    /// Number of seed rendezvous ids dialed on `join_lobby`.
    pub seed_count: usize,

    /// Cadence of `_lobby_announce` while in a lobby.
    pub announce_interval: Duration,

    /// Cadence of `_heartbeat` while in a lobby.
    pub heartbeat_interval: Duration,

    /// Cadence of `federation_announce` after `init_federation`.
    pub federation_announce_interval: Duration,

    /// Relays stop once an envelope has been forwarded this many times.
    /// `None` relays without limit; duplicates are still suppressed.
    pub relay_hop_limit: Option<u32>,

    /// Capacity of the handle → actor command channel.
    pub command_channel_size: usize,

    /// Random delay (0..max) added to the first announce after joining,
    /// so nodes that join together do not announce in lockstep.
    pub announce_jitter: Duration,

    /// Backoff for re-binding the local identity.
    pub reconnect: ReconnectConfig,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            dedup_capacity: 1000,
            max_peers: 20,
            seed_count: 5,
            announce_interval: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            federation_announce_interval: Duration::from_secs(60),
            relay_hop_limit: None,
            command_channel_size: 64,
            announce_jitter: Duration::from_millis(500),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl MeshConfig {
    /// Clamp values that would make the mesh misbehave.
    ///
    /// Called automatically by `Mesh::init`:
    /// - `dedup_capacity`, `command_channel_size` and
    ///   `reconnect.max_attempts` are at least 1.
    /// - `announce_jitter` is at most one announce interval.
    pub fn validated(mut self) -> Self {
        if self.dedup_capacity == 0 {
            tracing::warn!("dedup_capacity of 0 would disable duplicate suppression, using 1");
            self.dedup_capacity = 1;
        }
        self.command_channel_size = self.command_channel_size.max(1);
        self.reconnect.max_attempts = self.reconnect.max_attempts.max(1);
        self.announce_jitter = self.announce_jitter.min(self.announce_interval);
        self
    }
}

/// Backoff for the reconnection supervisor.
///
/// Retry `n` (0-based) waits `base_delay * 2^n`, then gives the bind
/// `grace` to complete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub grace: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            grace: Duration::from_secs(2),
        }
    }
}

// ---------------------------------------------------------------------------
// MeshState
// ---------------------------------------------------------------------------

/// The lifecycle state of a mesh node.
///
/// ```text
/// Initializing → Open → Disconnected
///      ↑          │
///      └──────────┘   (signaling link lost, supervisor re-binding)
/// Initializing → Offline          (no signaling substrate at all)
/// ```
///
/// - **Initializing**: binding the local identity, or re-binding it after
///   the signaling link dropped.
/// - **Open**: identity bound, accepting links.
/// - **Offline**: the transport reported itself unavailable. The node
///   keeps running but every send is a no-op.
/// - **Disconnected**: `disconnect()` was called. Terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeshState {
    Initializing,
    Open,
    Offline,
    Disconnected,
}

impl MeshState {
    /// Returns `true` if outbound dials are attempted in this state.
    pub fn can_dial(&self) -> bool {
        matches!(self, Self::Initializing | Self::Open)
    }
}

impl std::fmt::Display for MeshState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initializing => write!(f, "Initializing"),
            Self::Open => write!(f, "Open"),
            Self::Offline => write!(f, "Offline"),
            Self::Disconnected => write!(f, "Disconnected"),
        }
    }
}
