//! Round Engine
//!
//! Single consumer of feed frames. Frames are classified and applied one at a
//! time; announcements re-anchor the variant's timer, results attach to the
//! variant's state. The engine owns every timer and cancels them on teardown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, instrument, warn};

use crate::core::{compute_remaining, Clock, PeriodId};
use crate::network::protocol::{classify, Frame, Rejection};
use super::history::{HistorySeed, DEFAULT_HISTORY_CAPACITY};
use super::state::{AnnouncementOutcome, ResultOutcome, RoundAnnouncement, RoundResult, RoundStore};
use super::timer::{TimerSet, TimerSpec, TICK_PERIOD};
use super::variant::{VariantCatalogue, VariantCode};

/// Default bet lockout before the end of a round.
pub const DEFAULT_BET_LOCKOUT_SECS: u32 = 5;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Countdown refresh period.
    pub tick_period: Duration,
    /// Results kept per variant.
    pub history_capacity: usize,
    /// Seconds before the round end at which betting closes.
    pub bet_lockout_secs: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_period: TICK_PERIOD,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            bet_lockout_secs: DEFAULT_BET_LOCKOUT_SECS,
        }
    }
}

impl EngineConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            tick_period: defaults.tick_period,
            history_capacity: std::env::var("ROUND_SYNC_HISTORY_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.history_capacity),
            bet_lockout_secs: std::env::var("ROUND_SYNC_BET_LOCKOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.bet_lockout_secs),
        }
    }
}

/// What handling one frame did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Announcement frame.
    Announced(AnnouncementOutcome),
    /// Result frame.
    Resulted(ResultOutcome),
    /// Frame dropped without any state change.
    Dropped(Rejection),
}

/// Owns the round store and the per-variant timers.
pub struct RoundEngine {
    catalogue: Arc<VariantCatalogue>,
    clock: Arc<dyn Clock>,
    store: Arc<RoundStore>,
    timers: TimerSet,
    config: EngineConfig,
}

impl RoundEngine {
    /// Create an engine with empty state for every catalogue variant.
    pub fn new(catalogue: VariantCatalogue, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        let store = Arc::new(RoundStore::new(&catalogue, config.history_capacity));
        let timers = TimerSet::new(store.clone(), clock.clone(), config.tick_period);

        Self {
            catalogue: Arc::new(catalogue),
            clock,
            store,
            timers,
            config,
        }
    }

    /// Shared read access to round state.
    pub fn store(&self) -> Arc<RoundStore> {
        self.store.clone()
    }

    /// The variant catalogue.
    pub fn catalogue(&self) -> &VariantCatalogue {
        &self.catalogue
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Running timers.
    pub fn timers(&self) -> &TimerSet {
        &self.timers
    }

    /// Classify and apply one raw frame.
    pub fn handle_frame(&mut self, raw: &str) -> FrameOutcome {
        #[cfg(feature = "debug-tracing")]
        tracing::trace!(frame = raw, "Frame received");

        match classify(raw, &self.catalogue, self.clock.now()) {
            Frame::Announcement(announcement) => {
                FrameOutcome::Announced(self.apply_announcement(&announcement))
            }
            Frame::Result(result) => FrameOutcome::Resulted(self.apply_result(result)),
            Frame::Unrecognized(rejection) => {
                debug!(frame = raw.trim(), reason = %rejection, "Dropping frame");
                FrameOutcome::Dropped(rejection)
            }
        }
    }

    /// Track an announced round and (re)start its variant's countdown.
    pub fn apply_announcement(&mut self, announcement: &RoundAnnouncement) -> AnnouncementOutcome {
        let Some(variant) = self.catalogue.get(announcement.variant.as_str()) else {
            return AnnouncementOutcome::UnknownVariant;
        };
        let duration_secs = variant.duration_secs;

        let now = self.clock.now();
        let remaining = compute_remaining(announcement.anchor, duration_secs, now);
        let outcome = self.store.apply_announcement(announcement, remaining);

        if let Some(generation) = outcome.generation() {
            self.timers.restart(TimerSpec {
                variant: announcement.variant.clone(),
                anchor: announcement.anchor,
                duration_secs,
                generation,
            });

            let skew = (announcement.boundary_stamp - announcement.anchor).num_seconds();
            if skew != 0 {
                debug!(
                    variant = %announcement.variant,
                    period = %announcement.period_id,
                    skew_secs = skew,
                    "Boundary stamp differs from period id"
                );
            }
            info!(
                variant = %announcement.variant,
                period = %announcement.period_id,
                remaining,
                "Round anchored"
            );
        }
        outcome
    }

    /// Attach a result to its variant.
    pub fn apply_result(&mut self, result: RoundResult) -> ResultOutcome {
        let (variant, period, outcome_digit, color, size) = (
            result.variant.clone(),
            result.period_id.clone(),
            result.outcome,
            result.color,
            result.size,
        );

        let outcome = self.store.apply_result(result);
        match outcome {
            ResultOutcome::Attached => info!(
                variant = %variant,
                period = %period,
                outcome = %outcome_digit,
                %color,
                %size,
                "Round settled"
            ),
            ResultOutcome::Mismatched => {
                let late = self.is_previous_round(&variant, &period);
                debug!(variant = %variant, period = %period, late, "Result kept in history only");
            }
            ResultOutcome::UnknownVariant => {}
        }
        outcome
    }

    /// Whether `period` is the round right before the variant's tracked one.
    fn is_previous_round(&self, variant: &VariantCode, period: &PeriodId) -> bool {
        let Some(state) = self.store.snapshot(variant.as_str()) else {
            return false;
        };
        state
            .current_period
            .and_then(|current| current.predecessor(state.duration_secs).ok())
            .is_some_and(|previous| previous == *period)
    }

    /// Pre-populate a variant from fetched history.
    ///
    /// Settled rounds go into the history. A pending round is tracked as if
    /// it had been announced, unless a newer round is already tracked.
    /// Returns the number of new history entries.
    pub fn seed_history(&mut self, code: &str, seed: HistorySeed) -> usize {
        let Some(variant) = self.catalogue.get(code) else {
            warn!(variant = code, "History for unknown variant");
            return 0;
        };
        let variant = variant.code.clone();

        let results = seed
            .settled
            .into_iter()
            .map(|(period_id, outcome)| {
                let at = period_id.instant();
                RoundResult::new(period_id, variant.clone(), outcome, at)
            })
            .collect();
        let added = self.store.seed_history(code, results);

        if let Some(period_id) = seed.pending {
            let anchor = period_id.instant();
            self.apply_announcement(&RoundAnnouncement {
                period_id,
                variant: variant.clone(),
                anchor,
                boundary_stamp: anchor,
            });
        }

        debug!(variant = %variant, added, "History seeded");
        added
    }

    /// Consume frames until the channel closes or shutdown is signalled, then
    /// cancel every timer.
    #[instrument(skip_all)]
    pub async fn run(
        mut self,
        mut frames: mpsc::Receiver<String>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                frame = frames.recv() => match frame {
                    Some(raw) => {
                        self.handle_frame(&raw);
                    }
                    None => {
                        debug!("Frame channel closed");
                        break;
                    }
                },
                _ = shutdown.recv() => {
                    debug!("Shutdown signal received");
                    break;
                }
            }
        }

        self.shutdown();
    }

    /// Cancel every timer. State stays readable.
    pub fn shutdown(&mut self) {
        let count = self.timers.len();
        self.timers.cancel_all();
        info!(timers = count, "Round engine stopped");
    }
}
