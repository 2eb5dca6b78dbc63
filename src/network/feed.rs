//! Round Feed
//!
//! Wires the pieces together: optional history seeding and refresh, the
//! connection supervisor and the round engine. The supervisor feeds the
//! engine through one frame channel and every task stops on one shutdown
//! broadcast.
//!
//! ```text
//! HistoryClient --seed--> RoundEngine <--frames-- ConnectionSupervisor
//!                             |                          |
//! HistoryRefresher ----> RoundStore                 Readiness
//!                             \_______ FeedHandle ______/
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::core::Clock;
use crate::game::engine::{EngineConfig, RoundEngine};
use crate::game::history::ResultHistory;
use crate::game::state::{RoundStore, VariantState};
use crate::game::variant::VariantCatalogue;
use super::history::{HistoryClient, HistoryConfig, HistoryError};
use super::refresh::{HistoryRefresher, RefreshConfig};
use super::supervisor::{ConnectionSupervisor, Readiness, SupervisorConfig, SupervisorError};

/// Frames buffered between the supervisor and the engine.
const FRAME_BUFFER: usize = 256;

/// Feed configuration.
#[derive(Debug, Clone, Default)]
pub struct FeedConfig {
    /// Variants to track.
    pub catalogue: VariantCatalogue,
    /// Feed connection.
    pub supervisor: SupervisorConfig,
    /// History seeding and refresh are skipped when `None`.
    pub history: Option<HistoryConfig>,
    /// Periodic history refresh and lost-result lookup.
    pub refresh: RefreshConfig,
    /// Round engine.
    pub engine: EngineConfig,
}

impl FeedConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            catalogue: VariantCatalogue::standard(),
            supervisor: SupervisorConfig::from_env(),
            history: HistoryConfig::from_env(),
            refresh: RefreshConfig::default(),
            engine: EngineConfig::from_env(),
        }
    }
}

/// Feed startup errors.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// History client could not be built.
    #[error("History client error: {0}")]
    History(#[from] HistoryError),
}

/// Cloneable read side of a running feed.
#[derive(Debug, Clone)]
pub struct FeedHandle {
    store: Arc<RoundStore>,
    readiness: Readiness,
    clock: Arc<dyn Clock>,
    bet_lockout_secs: u32,
}

impl FeedHandle {
    /// Current state of one variant.
    pub fn snapshot(&self, code: &str) -> Option<VariantState> {
        self.store.snapshot(code)
    }

    /// Current state of every variant.
    pub fn snapshots(&self) -> Vec<VariantState> {
        self.store.snapshots()
    }

    /// Watch one variant's state.
    pub fn subscribe(&self, code: &str) -> Option<watch::Receiver<VariantState>> {
        self.store.subscribe(code)
    }

    /// Recent results of one variant.
    pub fn history(&self, code: &str) -> Option<ResultHistory> {
        self.store.history(code)
    }

    /// Whether bets may currently be placed on a variant.
    pub fn betting_open(&self, code: &str) -> bool {
        let now = self.clock.now();
        self.store
            .snapshot(code)
            .is_some_and(|state| state.betting_open(self.bet_lockout_secs, now))
    }

    /// Whether the feed connection is open.
    pub fn is_ready(&self) -> bool {
        self.readiness.is_ready()
    }

    /// Wait for the feed connection.
    pub async fn wait_ready(&self, limit: Duration) -> Result<(), SupervisorError> {
        self.readiness.wait_ready(limit).await
    }

    /// Readiness flag, for callers that want to follow its changes.
    pub fn readiness(&self) -> Readiness {
        self.readiness.clone()
    }
}

/// A running feed.
pub struct RoundFeed {
    handle: FeedHandle,
    shutdown_tx: broadcast::Sender<()>,
    supervisor_task: JoinHandle<()>,
    engine_task: JoinHandle<()>,
    refresh_task: Option<JoinHandle<()>>,
}

impl RoundFeed {
    /// Seed history (if configured), then start the supervisor, the engine
    /// and the history refresher.
    ///
    /// A failed history fetch is logged and the variant starts empty.
    pub async fn start(config: FeedConfig, clock: Arc<dyn Clock>) -> Result<Self, FeedError> {
        let bet_lockout_secs = config.engine.bet_lockout_secs;
        let mut engine = RoundEngine::new(config.catalogue, clock.clone(), config.engine);

        let client = config.history.map(HistoryClient::new).transpose()?;
        if let Some(client) = &client {
            let codes: Vec<String> = engine
                .catalogue()
                .iter()
                .map(|v| v.code.to_string())
                .collect();
            let fetched = join_all(codes.iter().map(|code| client.fetch(code))).await;

            for (code, result) in codes.iter().zip(fetched) {
                match result {
                    Ok(seed) => {
                        engine.seed_history(code, seed);
                    }
                    Err(e) => warn!(variant = %code, "History fetch failed: {}", e),
                }
            }
        }

        let (frame_tx, frame_rx) = tokio::sync::mpsc::channel(FRAME_BUFFER);
        let (shutdown_tx, _) = broadcast::channel(1);

        let supervisor = ConnectionSupervisor::new(config.supervisor, frame_tx);
        let handle = FeedHandle {
            store: engine.store(),
            readiness: supervisor.readiness(),
            clock: clock.clone(),
            bet_lockout_secs,
        };

        let refresh_task = client.map(|client| {
            let refresher = HistoryRefresher::new(client, engine.store(), clock, config.refresh);
            tokio::spawn(refresher.run(shutdown_tx.subscribe()))
        });
        let supervisor_task = tokio::spawn(supervisor.run(shutdown_tx.subscribe()));
        let engine_task = tokio::spawn(engine.run(frame_rx, shutdown_tx.subscribe()));

        info!("Round feed started");

        Ok(Self {
            handle,
            shutdown_tx,
            supervisor_task,
            engine_task,
            refresh_task,
        })
    }

    /// Read side of the feed.
    pub fn handle(&self) -> FeedHandle {
        self.handle.clone()
    }

    /// Close the connection, cancel every timer and wait for every task.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());

        let tasks = [
            ("supervisor", Some(self.supervisor_task)),
            ("engine", Some(self.engine_task)),
            ("refresh", self.refresh_task),
        ];
        for (name, task) in tasks {
            let Some(task) = task else { continue };
            if let Err(e) = task.await {
                error!(task = name, "Task failed: {}", e);
            }
        }

        info!("Round feed stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ManualClock;
    use chrono::{TimeZone, Utc};
    use futures_util::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio::time::timeout;
    use tokio_tungstenite::{accept_async, tungstenite::Message};

    async fn feed_server(frames: Vec<&'static str>) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            for frame in frames {
                ws.send(Message::Text(frame.to_string())).await.unwrap();
            }
            while let Some(Ok(_)) = ws.next().await {}
        });
        addr
    }

    fn config(addr: std::net::SocketAddr) -> FeedConfig {
        FeedConfig {
            supervisor: SupervisorConfig {
                url: format!("ws://{}", addr),
                ..SupervisorConfig::default()
            },
            ..FeedConfig::default()
        }
    }

    #[tokio::test]
    async fn test_feed_end_to_end() {
        let addr = feed_server(vec![
            "20250701194956 30S 2025-07-01 19:49:56",
            "20250701194956 30S 7",
        ])
        .await;
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 7, 1, 19, 49, 30).unwrap()));

        let feed = RoundFeed::start(config(addr), clock).await.unwrap();
        let handle = feed.handle();
        handle.wait_ready(Duration::from_secs(5)).await.unwrap();

        let mut rx = handle.subscribe("30S").unwrap();
        let state = timeout(
            Duration::from_secs(5),
            rx.wait_for(|s| s.pending_result.is_some()),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();

        assert_eq!(state.current_period.as_ref().unwrap().as_str(), "20250701194956");
        assert_eq!(state.remaining_secs, 26);
        assert_eq!(state.pending_result.as_ref().unwrap().outcome.digit(), 7);
        assert_eq!(handle.history("30S").unwrap().len(), 1);
        assert!(!handle.betting_open("30S"));
        assert!(handle.snapshot("1M").unwrap().current_period.is_none());

        feed.shutdown().await;
        assert!(!handle.is_ready());
    }

    #[tokio::test]
    async fn test_history_failure_does_not_block_start() {
        let addr = feed_server(vec![]).await;
        let unreachable = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let config = FeedConfig {
            history: Some(HistoryConfig {
                api_base: format!("http://{}", unreachable),
                request_timeout: Duration::from_secs(2),
            }),
            ..config(addr)
        };
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 7, 1, 19, 49, 30).unwrap()));

        let feed = RoundFeed::start(config, clock).await.unwrap();
        let handle = feed.handle();
        handle.wait_ready(Duration::from_secs(5)).await.unwrap();
        assert!(handle.history("30S").unwrap().is_empty());

        feed.shutdown().await;
    }

    #[tokio::test]
    async fn test_history_seeded_and_refresher_stops() {
        let addr = feed_server(vec![]).await;
        let (api_base, hits) = crate::network::history::test_server::serve_routes(vec![(
            "/results?type=30S",
            r#"[{"period":"20250701194926","number":4}]"#,
        )])
        .await;
        let config = FeedConfig {
            history: Some(HistoryConfig {
                api_base,
                request_timeout: Duration::from_secs(2),
            }),
            ..config(addr)
        };
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 7, 1, 19, 49, 30).unwrap()));

        let feed = RoundFeed::start(config, clock).await.unwrap();
        let handle = feed.handle();
        assert_eq!(handle.history("30S").unwrap().len(), 1);
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 4);

        timeout(Duration::from_secs(5), feed.shutdown()).await.unwrap();
    }
}
