//! Result History
//!
//! Bounded list of settled results for one variant, newest period first.

use std::collections::VecDeque;

use serde::Serialize;

use crate::core::{Outcome, PeriodId};
use super::state::RoundResult;

/// Default number of results kept per variant.
pub const DEFAULT_HISTORY_CAPACITY: usize = 20;

/// Settled results ordered by period id, newest first, one entry per period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultHistory {
    capacity: usize,
    entries: VecDeque<RoundResult>,
}

impl ResultHistory {
    /// Create an empty history. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Insert a result. Returns false if its period is already recorded or it
    /// is older than everything kept in a full history.
    pub fn record(&mut self, result: RoundResult) -> bool {
        let position = self
            .entries
            .iter()
            .position(|existing| existing.period_id <= result.period_id);

        if let Some(idx) = position {
            if self.entries[idx].period_id == result.period_id {
                return false;
            }
        }

        let idx = position.unwrap_or(self.entries.len());
        if idx >= self.capacity {
            return false;
        }

        self.entries.insert(idx, result);
        self.entries.truncate(self.capacity);
        true
    }

    /// Most recent result.
    pub fn latest(&self) -> Option<&RoundResult> {
        self.entries.front()
    }

    /// Iterate newest first.
    pub fn iter(&self) -> impl Iterator<Item = &RoundResult> {
        self.entries.iter()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for ResultHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

/// Rounds fetched out of band for one variant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistorySeed {
    /// Settled rounds and their outcomes.
    pub settled: Vec<(PeriodId, Outcome)>,
    /// Round still running when the history was taken.
    pub pending: Option<PeriodId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::variant::VariantCode;
    use chrono::{TimeZone, Utc};

    fn result(period: &str, digit: u8) -> RoundResult {
        let period_id = PeriodId::parse(period).unwrap();
        let at = period_id.instant();
        RoundResult::new(period_id, VariantCode::new("30S"), Outcome::new(digit).unwrap(), at)
    }

    fn periods(history: &ResultHistory) -> Vec<String> {
        history.iter().map(|r| r.period_id.to_string()).collect()
    }

    #[test]
    fn test_newest_first_and_dedup() {
        let mut history = ResultHistory::new(5);
        assert!(history.record(result("20250701120030", 1)));
        assert!(history.record(result("20250701120100", 2)));
        // Late arrival for an older round slots in behind.
        assert!(history.record(result("20250701120000", 3)));
        assert!(!history.record(result("20250701120030", 9)));

        assert_eq!(
            periods(&history),
            vec!["20250701120100", "20250701120030", "20250701120000"]
        );
        assert_eq!(history.latest().unwrap().outcome.digit(), 2);
    }

    #[test]
    fn test_capacity() {
        let mut history = ResultHistory::new(2);
        let base = Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).unwrap();
        for i in 0..4 {
            let id = PeriodId::from_instant(base + chrono::Duration::seconds(30 * i)).unwrap();
            history.record(RoundResult::new(id, VariantCode::new("30S"), Outcome::new(0).unwrap(), base));
        }
        assert_eq!(history.len(), 2);
        assert_eq!(periods(&history), vec!["20250701120130", "20250701120100"]);

        // Too old to make the cut.
        assert!(!history.record(result("20250701115930", 4)));
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_zero_capacity_is_raised() {
        let history = ResultHistory::new(0);
        assert_eq!(history.capacity(), 1);
        assert!(history.is_empty());
    }
}
