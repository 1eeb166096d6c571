//! Reconnection supervisor.
//!
//! When the local signaling link drops, the identity is bound again with
//! exponential backoff: retry `n` waits `base_delay * 2^n` and gives the
//! bind `grace` to finish. After `max_attempts` failures the episode ends;
//! the mesh starts a fresh one on its next announce tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use zion_transport::{PeerId, Signaling};

use crate::{MeshEvent, ReconnectConfig};

/// Backoff schedule for one reconnection episode.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    max_attempts: u32,
    base_delay: Duration,
    grace: Duration,
}

impl ReconnectPolicy {
    pub fn new(config: &ReconnectConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: config.base_delay,
            grace: config.grace,
        }
    }

    /// Delay before retry `attempt` (0-based), or `None` once the episode
    /// is exhausted.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        Some(self.base_delay.saturating_mul(factor))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(&ReconnectConfig::default())
    }
}

/// Runs one reconnection episode for `id`.
///
/// Emits [`MeshEvent::Reconnecting`] before every retry. Returns the new
/// transport, or `None` if every attempt failed.
pub(crate) async fn supervise<S: Signaling>(
    signaling: Arc<S>,
    id: PeerId,
    policy: ReconnectPolicy,
    events: mpsc::UnboundedSender<MeshEvent>,
) -> Option<S::Transport> {
    let mut attempt = 0;
    while let Some(delay) = policy.delay(attempt) {
        let _ = events.send(MeshEvent::Reconnecting {
            attempt: attempt + 1,
        });
        tracing::info!(
            peer = %id,
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            "reconnecting"
        );
        tokio::time::sleep(delay).await;

        match tokio::time::timeout(policy.grace(), signaling.bind(&id)).await {
            Ok(Ok(transport)) => return Some(transport),
            Ok(Err(e)) => {
                tracing::debug!(peer = %id, attempt = attempt + 1, error = %e, "re-bind failed");
            }
            Err(_) => {
                tracing::debug!(peer = %id, attempt = attempt + 1, "re-bind timed out");
            }
        }
        attempt += 1;
    }

    tracing::warn!(
        peer = %id,
        attempts = policy.max_attempts(),
        "reconnection attempts exhausted, waiting for next discovery tick"
    );
    None
}
