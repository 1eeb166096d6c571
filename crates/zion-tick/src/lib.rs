//! Fixed-period cadence scheduler for the Zion mesh.
//!
//! Lobby announces (10 s), heartbeats (30 s) and federation announces
//! (60 s) are all "do X every N seconds until told to stop". Each one is a
//! [`TickScheduler`] owned by the mesh actor.
//!
//! # Stopped mode
//!
//! When no period is configured, or the scheduler is stopped,
//! [`TickScheduler::wait_for_tick`] pends forever. This is the correct
//! behavior for a cadence that has not been started yet (e.g. the
//! announce loop before `join_lobby`).
//!
//! # Integration
//!
//! The scheduler is designed to sit inside an actor's `tokio::select!` loop:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         Some(cmd) = cmd_rx.recv() => { /* handle commands */ }
//!         _ = announce.wait_for_tick() => {
//!             self.broadcast_announce();
//!         }
//!     }
//! }
//! ```
//!
//! Because the scheduler is owned by the actor, dropping the actor stops
//! every cadence with it.

use std::time::Duration;

use rand::Rng;
use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Full configuration for one cadence.
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Time between ticks. `None` = never fires.
    pub period: Option<Duration>,
    /// Random jitter, up to and including this value, added to the *first* tick after creation or
    /// [`TickScheduler::start`], so nodes started at the same instant do
    /// not announce in lockstep.
    pub initial_jitter: Duration,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            period: None,
            initial_jitter: Duration::ZERO,
        }
    }
}

impl TickConfig {
    /// Shortest period accepted; anything below is clamped.
    pub const MIN_PERIOD: Duration = Duration::from_millis(10);

    /// A cadence firing every `period`.
    pub fn every(period: Duration) -> Self {
        Self {
            period: Some(period),
            ..Default::default()
        }
    }

    /// Sets the first-tick jitter.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.initial_jitter = jitter;
        self
    }

    /// Clamp and fix any out-of-range values so the config is safe to use.
    ///
    /// Called automatically by [`TickScheduler::new`]. A zero period would
    /// spin the actor, so periods are raised to [`Self::MIN_PERIOD`] and the
    /// jitter is capped at one period.
    pub fn validated(mut self) -> Self {
        if let Some(period) = self.period {
            if period < Self::MIN_PERIOD {
                warn!(
                    period_ms = period.as_millis() as u64,
                    min_ms = Self::MIN_PERIOD.as_millis() as u64,
                    "tick period below minimum, clamping"
                );
                self.period = Some(Self::MIN_PERIOD);
            }
        }
        if let Some(period) = self.period {
            self.initial_jitter = self.initial_jitter.min(period);
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Fixed-period tick scheduler.
///
/// A tick that fires late re-arms one period from when it fired, so a
/// slow actor never sees a burst of missed ticks.
pub struct TickScheduler {
    config: TickConfig,
    tick_count: u64,
    /// When the next tick should fire. `None` while stopped.
    next_tick: Option<Instant>,
}

impl TickScheduler {
    /// Create a running scheduler. The first tick fires one period (plus
    /// jitter) from now.
    pub fn new(config: TickConfig) -> Self {
        let mut scheduler = Self::stopped(config);
        scheduler.start();
        scheduler
    }

    /// Create a scheduler that does not fire until [`start`](Self::start).
    pub fn stopped(config: TickConfig) -> Self {
        Self {
            config: config.validated(),
            tick_count: 0,
            next_tick: None,
        }
    }

    /// Create a running scheduler for `period` with default settings.
    pub fn every(period: Duration) -> Self {
        Self::new(TickConfig::every(period))
    }

    /// (Re)arm the cadence: the next tick fires one period plus jitter
    /// from now. Does nothing without a period.
    pub fn start(&mut self) {
        let Some(period) = self.config.period else {
            debug!("tick scheduler has no period, staying stopped");
            return;
        };
        let max = self.config.initial_jitter.as_nanos() as u64;
        let jitter = Duration::from_nanos(rand::rng().random_range(0..=max));
        self.next_tick = Some(Instant::now() + period + jitter);
        debug!(
            period_ms = period.as_millis() as u64,
            jitter_ms = jitter.as_millis() as u64,
            "tick scheduler started"
        );
    }

    /// Stop the cadence. `wait_for_tick` pends until the next `start`.
    pub fn stop(&mut self) {
        if self.next_tick.take().is_some() {
            debug!(tick = self.tick_count, "tick scheduler stopped");
        }
    }

    /// Wait until the next tick is due. Returns the tick number,
    /// starting at 1.
    ///
    /// When stopped or without a period, this future pends forever;
    /// `tokio::select!` will still process other branches.
    pub async fn wait_for_tick(&mut self) -> u64 {
        let (next, period) = match (self.next_tick, self.config.period) {
            (Some(next), Some(period)) => (next, period),
            _ => std::future::pending().await,
        };

        time::sleep_until(next).await;

        let now = Instant::now();
        self.tick_count += 1;

        let late_by = now.saturating_duration_since(next);
        if late_by >= period {
            warn!(
                tick = self.tick_count,
                skipped = (late_by.as_nanos() / period.as_nanos()) as u64,
                late_ms = late_by.as_millis() as u64,
                "tick overrun, skipping ahead"
            );
        }
        self.next_tick = Some(now + period);

        trace!(tick = self.tick_count, "tick fired");
        self.tick_count
    }

    /// Whether a tick is scheduled (started and not stopped).
    pub fn is_running(&self) -> bool {
        self.next_tick.is_some() && self.config.period.is_some()
    }

    /// Ticks fired so far.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// The configured period, or `None` if the cadence never fires.
    pub fn period(&self) -> Option<Duration> {
        self.config.period
    }
}
