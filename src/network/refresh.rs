//! History Refresh
//!
//! Background upkeep while the feed runs. Every variant's recent rounds are
//! re-fetched on a fixed interval, and a round whose countdown ran out with
//! no result frame gets a one-off lookup of its outcome. Both paths write
//! through the same store operations as live frames.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::broadcast;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::core::{Clock, PeriodId};
use crate::game::state::{ResultOutcome, RoundResult, RoundStore};
use crate::game::variant::VariantCode;
use super::history::HistoryClient;

/// History refresh configuration.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// How often every variant's history is re-fetched.
    pub interval: Duration,
    /// How often ended rounds are checked for a missing result.
    pub settle_check: Duration,
    /// Time after a round's end before its result is looked up.
    pub settle_grace: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            settle_check: Duration::from_secs(1),
            settle_grace: Duration::from_secs(2),
        }
    }
}

/// Keeps history current and recovers results lost on the feed.
#[derive(Debug)]
pub struct HistoryRefresher {
    client: HistoryClient,
    store: Arc<RoundStore>,
    clock: Arc<dyn Clock>,
    config: RefreshConfig,
    /// Last period looked up per variant; each round is looked up once.
    requested: BTreeMap<VariantCode, PeriodId>,
}

impl HistoryRefresher {
    /// Create a refresher for every variant in `store`.
    pub fn new(
        client: HistoryClient,
        store: Arc<RoundStore>,
        clock: Arc<dyn Clock>,
        config: RefreshConfig,
    ) -> Self {
        Self {
            client,
            store,
            clock,
            config,
            requested: BTreeMap::new(),
        }
    }

    /// Re-fetch every variant's history. Returns the number of new entries.
    ///
    /// A fetched result for the tracked round is attached as its pending
    /// result; everything else only goes into the history.
    pub async fn refresh(&self) -> usize {
        let codes: Vec<VariantCode> = self.store.variants().cloned().collect();
        let fetched = join_all(codes.iter().map(|code| self.client.fetch(code.as_str()))).await;

        let mut added = 0;
        for (code, result) in codes.iter().zip(fetched) {
            let seed = match result {
                Ok(seed) => seed,
                Err(e) => {
                    warn!(variant = %code, "History refresh failed: {}", e);
                    continue;
                }
            };

            // Only a tracked round still waiting for its result can attach.
            let current = self
                .store
                .snapshot(code.as_str())
                .filter(|state| state.pending_result.is_none())
                .and_then(|state| state.current_period);

            let mut settled = Vec::with_capacity(seed.settled.len());
            for (period_id, outcome) in seed.settled {
                let at = period_id.instant();
                let result = RoundResult::new(period_id, code.clone(), outcome, at);
                if current.as_ref() == Some(&result.period_id) {
                    if self.store.apply_result(result) == ResultOutcome::Attached {
                        info!(variant = %code, "Result recovered from history");
                    }
                } else {
                    settled.push(result);
                }
            }
            added += self.store.seed_history(code.as_str(), settled);
        }

        debug!(added, "History refreshed");
        added
    }

    /// Look up results for rounds that ended without one. Returns the number
    /// of results attached.
    pub async fn settle_overdue(&mut self) -> usize {
        let now = self.clock.now();
        let grace = chrono::Duration::from_std(self.config.settle_grace)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let mut attached = 0;

        for state in self.store.snapshots() {
            if state.pending_result.is_some() {
                continue;
            }
            let (Some(period), Some(anchor)) = (state.current_period, state.anchor) else {
                continue;
            };
            if now < anchor + grace || self.requested.get(&state.variant) == Some(&period) {
                continue;
            }
            self.requested.insert(state.variant.clone(), period.clone());

            match self.client.fetch_result(&period).await {
                Ok(Some(outcome)) => {
                    let result = RoundResult::new(period.clone(), state.variant.clone(), outcome, now);
                    if self.store.apply_result(result) == ResultOutcome::Attached {
                        info!(variant = %state.variant, period = %period, "Result recovered by lookup");
                        attached += 1;
                    }
                }
                Ok(None) => debug!(variant = %state.variant, period = %period, "Result not settled yet"),
                Err(e) => warn!(variant = %state.variant, period = %period, "Result lookup failed: {}", e),
            }
        }

        attached
    }

    /// Refresh and settle on their intervals until shutdown. The first
    /// refresh waits one full interval.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let mut refresh = interval_at(Instant::now() + self.config.interval, self.config.interval);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut settle = interval(self.config.settle_check);
        settle.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = refresh.tick() => {
                    tokio::select! {
                        _ = self.refresh() => {}
                        _ = shutdown.recv() => break,
                    }
                }
                _ = settle.tick() => {
                    tokio::select! {
                        _ = self.settle_overdue() => {}
                        _ = shutdown.recv() => break,
                    }
                }
                _ = shutdown.recv() => break,
            }
        }

        debug!("History refresher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use chrono::{DateTime, TimeZone, Utc};

    use crate::core::ManualClock;
    use crate::game::state::RoundAnnouncement;
    use crate::game::variant::VariantCatalogue;
    use crate::network::history::{test_server::serve_routes, HistoryConfig};

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 1, h, m, s).unwrap()
    }

    fn refresher(base: String, now: DateTime<Utc>) -> (HistoryRefresher, Arc<RoundStore>) {
        let store = Arc::new(RoundStore::new(&VariantCatalogue::standard(), 20));
        let client = HistoryClient::new(HistoryConfig {
            api_base: base,
            ..HistoryConfig::default()
        })
        .unwrap();
        let refresher = HistoryRefresher::new(
            client,
            store.clone(),
            Arc::new(ManualClock::new(now)),
            RefreshConfig::default(),
        );
        (refresher, store)
    }

    fn announce(store: &RoundStore, period: &str, variant: &str) {
        let period_id = PeriodId::parse(period).unwrap();
        let anchor = period_id.instant();
        store.apply_announcement(
            &RoundAnnouncement {
                period_id,
                variant: VariantCode::new(variant),
                anchor,
                boundary_stamp: anchor,
            },
            26,
        );
    }

    #[tokio::test]
    async fn test_settle_looks_up_ended_round_once() {
        let (base, hits) = serve_routes(vec![(
            "/results/20250701194956",
            r#"{"period":"20250701194956","number":3}"#,
        )])
        .await;
        let (mut refresher, store) = refresher(base, at(19, 49, 59));
        announce(&store, "20250701194956", "30S");

        assert_eq!(refresher.settle_overdue().await, 1);
        let state = store.snapshot("30S").unwrap();
        assert_eq!(state.pending_result.as_ref().unwrap().outcome.digit(), 3);
        assert_eq!(store.history("30S").unwrap().len(), 1);

        assert_eq!(refresher.settle_overdue().await, 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_settle_waits_for_grace() {
        let (base, hits) = serve_routes(vec![]).await;
        let (mut refresher, store) = refresher(base, at(19, 49, 57));
        announce(&store, "20250701194956", "30S");

        assert_eq!(refresher.settle_overdue().await, 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_settle_skips_rounds_with_result() {
        let (base, hits) = serve_routes(vec![]).await;
        let (mut refresher, store) = refresher(base, at(19, 50, 10));
        announce(&store, "20250701194956", "30S");
        let period_id = PeriodId::parse("20250701194956").unwrap();
        store.apply_result(RoundResult::new(
            period_id,
            VariantCode::new("30S"),
            crate::core::Outcome::new(8).unwrap(),
            at(19, 49, 57),
        ));

        assert_eq!(refresher.settle_overdue().await, 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_refresh_records_history_and_attaches_current() {
        let (base, hits) = serve_routes(vec![(
            "/results?type=30S",
            r#"[
                {"period":"20250701195026","number":-1},
                {"period":"20250701194956","number":7},
                {"period":"20250701194926","number":2}
            ]"#,
        )])
        .await;
        let (refresher, store) = refresher(base, at(19, 49, 58));
        announce(&store, "20250701194956", "30S");

        // The other three variants answer 404 and are skipped.
        assert_eq!(refresher.refresh().await, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 4);

        let state = store.snapshot("30S").unwrap();
        assert_eq!(state.pending_result.as_ref().unwrap().outcome.digit(), 7);
        let history = store.history("30S").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history.latest().unwrap().period_id.as_str(), "20250701194956");

        // Nothing new the second time.
        assert_eq!(refresher.refresh().await, 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (base, _hits) = serve_routes(vec![]).await;
        let (refresher, _store) = refresher(base, at(19, 49, 30));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let task = tokio::spawn(refresher.run(shutdown_rx));
        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }
}
