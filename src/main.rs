//! Round Sync Daemon
//!
//! Connects to the round feed, keeps every variant's countdown in step with
//! the server and logs a status line per variant until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use round_sync::{
    core::SystemClock,
    network::{FeedConfig, FeedHandle, RoundFeed, READINESS_TIMEOUT},
    VERSION,
};

/// How often the status line is logged.
const STATUS_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let config = FeedConfig::from_env();
    info!("Round Sync v{}", VERSION);
    info!("Feed: {}", config.supervisor.url);
    for variant in config.catalogue.iter() {
        info!("Variant {} ({}): {}s rounds", variant.code, variant.label, variant.duration_secs);
    }
    if config.history.is_none() {
        info!("ROUND_SYNC_API_URL not set, skipping history seeding");
    }

    let feed = RoundFeed::start(config, Arc::new(SystemClock))
        .await
        .context("Failed to start round feed")?;
    let handle = feed.handle();

    if let Err(e) = handle.wait_ready(READINESS_TIMEOUT).await {
        warn!("Feed not connected yet: {}", e);
    }

    let mut status = tokio::time::interval(STATUS_INTERVAL);
    loop {
        tokio::select! {
            _ = status.tick() => log_status(&handle),
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                info!("Shutting down");
                break;
            }
        }
    }

    feed.shutdown().await;
    Ok(())
}

fn log_status(handle: &FeedHandle) {
    let ready = handle.is_ready();
    for state in handle.snapshots() {
        let code = state.variant.as_str();
        let last = handle
            .history(code)
            .and_then(|h| h.latest().map(|r| format!("{} {} {}", r.outcome.digit(), r.color, r.size)));
        info!(
            variant = code,
            ready,
            period = state.current_period.as_ref().map(|p| p.as_str()).unwrap_or("-"),
            countdown = %state.countdown_label(),
            betting_open = handle.betting_open(code),
            last = last.as_deref().unwrap_or("-"),
            "Status"
        );
        if let Ok(json) = serde_json::to_string(&state) {
            debug!(variant = code, %json, "State");
        }
    }
}
