//! Clock Reconciliation
//!
//! Derives the seconds left in a round from its anchor instant and the local
//! wall clock. The value is recomputed from scratch on every call, so timer
//! stalls or throttling never accumulate drift.

use chrono::{DateTime, Utc};

/// Source of wall-clock time.
pub trait Clock: std::fmt::Debug + Send + Sync + 'static {
    /// Current UTC instant.
    fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[cfg(any(test, feature = "test-util"))]
#[derive(Debug)]
pub struct ManualClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

#[cfg(any(test, feature = "test-util"))]
impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: std::sync::Mutex::new(start) }
    }

    /// Move the clock to `instant`.
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.lock() = instant;
    }

    /// Move the clock forward.
    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.lock();
        *now += by;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DateTime<Utc>> {
        // A poisoned clock still holds a valid instant.
        self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(any(test, feature = "test-util"))]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.lock()
    }
}

/// Seconds left before `anchor`, wrapped into `[0, duration_secs)`.
///
/// `raw = floor((anchor - now) / 1s)`, then `raw mod duration` with a
/// non-negative remainder. Early frames (raw >= duration) and late frames or
/// negative skew (raw < 0) both land inside the round window instead of being
/// clamped. A zero duration yields zero.
pub fn compute_remaining(anchor: DateTime<Utc>, duration_secs: u32, now: DateTime<Utc>) -> u32 {
    if duration_secs == 0 {
        return 0;
    }
    let raw = (anchor - now).num_milliseconds().div_euclid(1000);
    // rem_euclid of a positive modulus is in [0, duration), which fits u32.
    raw.rem_euclid(i64::from(duration_secs)) as u32
}
