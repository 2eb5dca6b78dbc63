//! Round State Store
//!
//! One slot per variant holding the tracked period, the seconds left in it and
//! the latest result for it. Each slot is a `watch` channel: every mutation
//! replaces the whole record under the channel's lock, so readers always see
//! a consistent snapshot and can subscribe to changes.
//!
//! Two producers write a slot: the serialized frame handler (announcements
//! and results) and the variant's timer (ticks). Ticks carry the generation
//! they were started with and are discarded once a newer announcement has
//! re-anchored the slot.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use crate::core::{derive_color_and_size, Color, Outcome, PeriodId, Size};
use super::history::ResultHistory;
use super::variant::{VariantCatalogue, VariantCode};

/// A decoded round announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundAnnouncement {
    /// Round being announced.
    pub period_id: PeriodId,
    /// Variant the round belongs to.
    pub variant: VariantCode,
    /// End-of-round instant the countdown is computed against.
    pub anchor: DateTime<Utc>,
    /// Server wall-clock stamp carried by the frame, in UTC.
    pub boundary_stamp: DateTime<Utc>,
}

/// A settled round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoundResult {
    /// Round that settled.
    pub period_id: PeriodId,
    /// Variant the round belongs to.
    pub variant: VariantCode,
    /// Outcome digit.
    pub outcome: Outcome,
    /// Derived colour badge.
    pub color: Color,
    /// Derived size badge.
    pub size: Size,
    /// When the result was produced, or received if the frame had no stamp.
    pub result_at: DateTime<Utc>,
}

impl RoundResult {
    /// Build a result, deriving the badges from the outcome.
    pub fn new(
        period_id: PeriodId,
        variant: VariantCode,
        outcome: Outcome,
        result_at: DateTime<Utc>,
    ) -> Self {
        let (color, size) = derive_color_and_size(outcome);
        Self {
            period_id,
            variant,
            outcome,
            color,
            size,
            result_at,
        }
    }
}

/// Presentation state of one variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariantState {
    /// Variant code.
    pub variant: VariantCode,
    /// Round length in seconds.
    pub duration_secs: u32,
    /// Round currently counting down.
    pub current_period: Option<PeriodId>,
    /// Anchor of the running countdown.
    pub anchor: Option<DateTime<Utc>>,
    /// Seconds left, always below `duration_secs`.
    pub remaining_secs: u32,
    /// Result for `current_period`, if it has arrived.
    pub pending_result: Option<RoundResult>,
    /// Bumped on every announcement that re-anchors the countdown.
    pub generation: u64,
}

impl VariantState {
    fn empty(variant: VariantCode, duration_secs: u32) -> Self {
        Self {
            variant,
            duration_secs,
            current_period: None,
            anchor: None,
            remaining_secs: 0,
            pending_result: None,
            generation: 0,
        }
    }

    /// Whether bets for the current round are still accepted at `now`.
    ///
    /// Betting closes `lockout_secs` before the anchor and stays closed once
    /// the anchor has passed or the round's result is known. The wrapped
    /// countdown alone cannot tell an ended round from a fresh one.
    pub fn betting_open(&self, lockout_secs: u32, now: DateTime<Utc>) -> bool {
        let Some(anchor) = self.anchor else {
            return false;
        };
        let until_end = (anchor - now).num_milliseconds().div_euclid(1000);

        self.current_period.is_some()
            && self.pending_result.is_none()
            && until_end > i64::from(lockout_secs)
            && self.remaining_secs > lockout_secs
    }

    /// True once the tracked round's anchor has passed.
    pub fn round_ended(&self, now: DateTime<Utc>) -> bool {
        self.current_period.is_some() && self.anchor.is_some_and(|anchor| now >= anchor)
    }

    /// Remaining time as `MM:SS`.
    pub fn countdown_label(&self) -> String {
        format!("{:02}:{:02}", self.remaining_secs / 60, self.remaining_secs % 60)
    }
}

/// What an announcement did to its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnouncementOutcome {
    /// A new round is now tracked.
    Started {
        /// Generation the timer must carry.
        generation: u64,
    },
    /// The tracked round was announced again and re-anchored.
    Reanchored {
        /// Generation the timer must carry.
        generation: u64,
    },
    /// Older than the tracked round; ignored.
    Stale,
    /// Variant is not in the catalogue.
    UnknownVariant,
}

impl AnnouncementOutcome {
    /// Generation to start a timer with, if the announcement was applied.
    pub fn generation(self) -> Option<u64> {
        match self {
            Self::Started { generation } | Self::Reanchored { generation } => Some(generation),
            Self::Stale | Self::UnknownVariant => None,
        }
    }
}

/// What a result did to its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultOutcome {
    /// Attached as the pending result of the current round.
    Attached,
    /// Period does not match the tracked round; only recorded in history.
    Mismatched,
    /// Variant is not in the catalogue.
    UnknownVariant,
}

/// What a timer tick did to its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Remaining seconds changed.
    Updated,
    /// Same value as before; subscribers not woken.
    Unchanged,
    /// The slot was re-anchored by a newer announcement.
    Superseded,
}

struct VariantSlot {
    state: watch::Sender<VariantState>,
    history: watch::Sender<ResultHistory>,
}

/// Per-variant round state shared between the frame handler, the timers and
/// any number of readers.
pub struct RoundStore {
    slots: BTreeMap<VariantCode, VariantSlot>,
}

impl std::fmt::Debug for RoundStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoundStore")
            .field("variants", &self.slots.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl RoundStore {
    /// Create empty slots for every catalogue variant.
    pub fn new(catalogue: &VariantCatalogue, history_capacity: usize) -> Self {
        let slots = catalogue
            .iter()
            .map(|variant| {
                let (state, _) = watch::channel(VariantState::empty(
                    variant.code.clone(),
                    variant.duration_secs,
                ));
                let (history, _) = watch::channel(ResultHistory::new(history_capacity));
                (variant.code.clone(), VariantSlot { state, history })
            })
            .collect();

        Self { slots }
    }

    /// Copy of one variant's state.
    pub fn snapshot(&self, code: &str) -> Option<VariantState> {
        self.slots.get(code).map(|slot| slot.state.borrow().clone())
    }

    /// Copies of every variant's state, in code order.
    pub fn snapshots(&self) -> Vec<VariantState> {
        self.slots
            .values()
            .map(|slot| slot.state.borrow().clone())
            .collect()
    }

    /// Subscribe to one variant's state.
    pub fn subscribe(&self, code: &str) -> Option<watch::Receiver<VariantState>> {
        self.slots.get(code).map(|slot| slot.state.subscribe())
    }

    /// Copy of one variant's result history.
    pub fn history(&self, code: &str) -> Option<ResultHistory> {
        self.slots.get(code).map(|slot| slot.history.borrow().clone())
    }

    /// Subscribe to one variant's result history.
    pub fn subscribe_history(&self, code: &str) -> Option<watch::Receiver<ResultHistory>> {
        self.slots.get(code).map(|slot| slot.history.subscribe())
    }

    /// Variant codes in the store.
    pub fn variants(&self) -> impl Iterator<Item = &VariantCode> {
        self.slots.keys()
    }

    /// Track an announced round.
    ///
    /// A newer period replaces the tracked one and clears its result. The same
    /// period re-anchors the countdown and keeps the result. An older period
    /// is ignored.
    pub fn apply_announcement(
        &self,
        announcement: &RoundAnnouncement,
        remaining_secs: u32,
    ) -> AnnouncementOutcome {
        let Some(slot) = self.slots.get(announcement.variant.as_str()) else {
            return AnnouncementOutcome::UnknownVariant;
        };

        let mut outcome = AnnouncementOutcome::Stale;
        slot.state.send_if_modified(|state| {
            let same_period = match state.current_period.as_ref() {
                Some(current) if announcement.period_id < *current => return false,
                Some(current) => announcement.period_id == *current,
                None => false,
            };

            state.generation += 1;
            state.anchor = Some(announcement.anchor);
            state.remaining_secs = remaining_secs.min(state.duration_secs.saturating_sub(1));

            outcome = if same_period {
                AnnouncementOutcome::Reanchored { generation: state.generation }
            } else {
                state.current_period = Some(announcement.period_id.clone());
                state.pending_result = None;
                AnnouncementOutcome::Started { generation: state.generation }
            };
            true
        });

        if outcome == AnnouncementOutcome::Stale {
            debug!(
                variant = %announcement.variant,
                period = %announcement.period_id,
                "Ignoring announcement older than tracked round"
            );
        }
        outcome
    }

    /// Record a result and attach it to the current round if the periods match.
    ///
    /// Results for any other period leave `pending_result` untouched; they are
    /// still kept in the variant's history.
    pub fn apply_result(&self, result: RoundResult) -> ResultOutcome {
        let Some(slot) = self.slots.get(result.variant.as_str()) else {
            return ResultOutcome::UnknownVariant;
        };

        slot.history.send_if_modified(|history| history.record(result.clone()));

        let mut outcome = ResultOutcome::Mismatched;
        slot.state.send_if_modified(|state| {
            if state.current_period.as_ref() != Some(&result.period_id) {
                return false;
            }
            if state.pending_result.as_ref() == Some(&result) {
                outcome = ResultOutcome::Attached;
                return false;
            }
            state.pending_result = Some(result.clone());
            outcome = ResultOutcome::Attached;
            true
        });

        if outcome == ResultOutcome::Mismatched {
            debug!(
                variant = %result.variant,
                period = %result.period_id,
                "Result does not match tracked round"
            );
        }
        outcome
    }

    /// Write a recomputed countdown from the timer of `generation`.
    pub fn apply_tick(&self, code: &str, generation: u64, remaining_secs: u32) -> TickOutcome {
        let Some(slot) = self.slots.get(code) else {
            return TickOutcome::Superseded;
        };

        let mut outcome = TickOutcome::Unchanged;
        slot.state.send_if_modified(|state| {
            if state.generation != generation {
                outcome = TickOutcome::Superseded;
                return false;
            }
            if state.remaining_secs == remaining_secs {
                return false;
            }
            state.remaining_secs = remaining_secs;
            outcome = TickOutcome::Updated;
            true
        });
        outcome
    }

    /// Record settled results fetched out of band.
    ///
    /// Returns how many were new.
    pub fn seed_history(&self, code: &str, results: Vec<RoundResult>) -> usize {
        let Some(slot) = self.slots.get(code) else {
            return 0;
        };

        let mut added = 0;
        slot.history.send_if_modified(|history| {
            for result in results {
                if history.record(result) {
                    added += 1;
                }
            }
            added > 0
        });
        added
    }
}
