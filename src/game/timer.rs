//! Per-Variant Timers
//!
//! Each variant with a tracked round has one task ticking at 1 Hz. Every tick
//! recomputes the remaining seconds from the anchor and the wall clock; the
//! countdown is never decremented in place, so stalls and throttled ticks
//! cannot drift away from the server's round boundary.
//!
//! [`TimerSet::restart`] aborts a variant's previous timer before spawning
//! the next one. Together with the generation check in
//! [`RoundStore::apply_tick`] this guarantees a single live writer per slot.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, trace};

use crate::core::{compute_remaining, Clock};
use super::state::{RoundStore, TickOutcome};
use super::variant::VariantCode;

/// Default tick period.
pub const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Parameters of one countdown.
#[derive(Debug, Clone)]
pub struct TimerSpec {
    /// Variant whose slot the timer writes.
    pub variant: VariantCode,
    /// End-of-round instant.
    pub anchor: DateTime<Utc>,
    /// Round length in seconds.
    pub duration_secs: u32,
    /// Slot generation the timer belongs to.
    pub generation: u64,
}

/// A running countdown. Dropping it aborts the task.
#[derive(Debug)]
pub struct VariantTimer {
    spec: TimerSpec,
    handle: JoinHandle<()>,
}

impl VariantTimer {
    /// Spawn a countdown task on the current tokio runtime.
    pub fn start(
        spec: TimerSpec,
        store: Arc<RoundStore>,
        clock: Arc<dyn Clock>,
        period: Duration,
    ) -> Self {
        let task_spec = spec.clone();
        let handle = tokio::spawn(async move {
            Self::run(task_spec, store, clock, period).await;
        });
        Self { spec, handle }
    }

    async fn run(spec: TimerSpec, store: Arc<RoundStore>, clock: Arc<dyn Clock>, period: Duration) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            let remaining = compute_remaining(spec.anchor, spec.duration_secs, clock.now());
            match store.apply_tick(spec.variant.as_str(), spec.generation, remaining) {
                TickOutcome::Updated | TickOutcome::Unchanged => {
                    trace!(variant = %spec.variant, remaining, "Tick");
                }
                TickOutcome::Superseded => {
                    debug!(
                        variant = %spec.variant,
                        generation = spec.generation,
                        "Timer superseded, stopping"
                    );
                    break;
                }
            }
        }
    }

    /// Countdown parameters.
    pub fn spec(&self) -> &TimerSpec {
        &self.spec
    }

    /// Whether the task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Abort the task.
    pub fn cancel(&self) {
        self.handle.abort();
    }
}

impl Drop for VariantTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// At most one live timer per variant.
pub struct TimerSet {
    store: Arc<RoundStore>,
    clock: Arc<dyn Clock>,
    period: Duration,
    timers: BTreeMap<VariantCode, VariantTimer>,
}

impl TimerSet {
    /// Create an empty set writing into `store`.
    pub fn new(store: Arc<RoundStore>, clock: Arc<dyn Clock>, period: Duration) -> Self {
        Self {
            store,
            clock,
            period,
            timers: BTreeMap::new(),
        }
    }

    /// Replace the variant's timer with a new one for `spec`.
    ///
    /// The old timer is aborted before the new one is spawned. Other
    /// variants' timers are not touched.
    pub fn restart(&mut self, spec: TimerSpec) {
        if let Some(previous) = self.timers.remove(&spec.variant) {
            previous.cancel();
            debug!(
                variant = %spec.variant,
                old_generation = previous.spec().generation,
                new_generation = spec.generation,
                "Replacing timer"
            );
        }

        let variant = spec.variant.clone();
        let timer = VariantTimer::start(spec, self.store.clone(), self.clock.clone(), self.period);
        self.timers.insert(variant, timer);
    }

    /// Abort every timer.
    pub fn cancel_all(&mut self) {
        for (_, timer) in std::mem::take(&mut self.timers) {
            timer.cancel();
        }
    }

    /// Spec of the variant's current timer.
    pub fn spec(&self, code: &str) -> Option<&TimerSpec> {
        self.timers.get(code).map(VariantTimer::spec)
    }

    /// Number of timers whose task is still running.
    pub fn active_count(&self) -> usize {
        self.timers.values().filter(|t| !t.is_finished()).count()
    }

    /// Number of installed timers.
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    /// True when no timer is installed.
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
