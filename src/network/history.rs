//! History Client
//!
//! Fetches recent rounds over HTTP so a freshly started feed shows settled
//! results before the first live frame arrives.
//!
//! `GET {api_base}/results?type={code}` returns a JSON array of
//! `{ "period": "20250701194956", "number": 7 }`. A `number` of `-1` marks
//! the round still in progress. `GET {api_base}/results/{period}` returns a
//! single row, used when a round ends without its result frame.

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::core::{Outcome, PeriodId};
use crate::game::history::HistorySeed;

/// Marker for a round that has not settled yet.
const PENDING_NUMBER: i16 = -1;

/// History client configuration.
#[derive(Debug, Clone)]
pub struct HistoryConfig {
    /// API base URL, without trailing slash.
    pub api_base: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            api_base: "http://127.0.0.1:8000".to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl HistoryConfig {
    /// Create config from the environment. `None` when no API URL is set.
    pub fn from_env() -> Option<Self> {
        let api_base = std::env::var("ROUND_SYNC_API_URL").ok()?;
        Some(Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            ..Self::default()
        })
    }
}

/// History fetch errors.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// Transport or decoding failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx response.
    #[error("Unexpected status {0}")]
    Status(reqwest::StatusCode),
}

/// One row of the history payload.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryRow {
    /// 14-digit period id.
    pub period: String,
    /// Outcome digit, or `-1` while pending.
    pub number: i16,
}

/// HTTP client for the results endpoint.
#[derive(Debug, Clone)]
pub struct HistoryClient {
    config: HistoryConfig,
    http: reqwest::Client,
}

impl HistoryClient {
    /// Build a client.
    pub fn new(config: HistoryConfig) -> Result<Self, HistoryError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { config, http })
    }

    /// Endpoint URL for a variant.
    pub fn results_url(&self) -> String {
        format!("{}/results", self.config.api_base)
    }

    /// Look up one round's outcome. `None` while it is still pending or
    /// unknown to the server.
    #[instrument(skip(self, period), fields(period = %period))]
    pub async fn fetch_result(&self, period: &PeriodId) -> Result<Option<Outcome>, HistoryError> {
        let url = format!("{}/{}", self.results_url(), period.as_str());
        let response = self.http.get(url).send().await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(HistoryError::Status(status));
        }

        let row: HistoryRow = response.json().await?;
        if row.period.trim() != period.as_str() {
            warn!(returned = %row.period, "Result lookup answered for another period");
            return Ok(None);
        }
        Ok(row_outcome(row.number))
    }

    /// Fetch and parse the recent rounds of one variant.
    #[instrument(skip(self))]
    pub async fn fetch(&self, code: &str) -> Result<HistorySeed, HistoryError> {
        let response = self
            .http
            .get(self.results_url())
            .query(&[("type", code)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(HistoryError::Status(status));
        }

        let rows: Vec<HistoryRow> = response.json().await?;
        let seed = seed_from_rows(rows);
        debug!(
            settled = seed.settled.len(),
            pending = ?seed.pending,
            "History fetched"
        );
        Ok(seed)
    }
}

/// Turn payload rows into a seed. Rows with a malformed period or an
/// out-of-range number are skipped.
pub fn seed_from_rows(rows: Vec<HistoryRow>) -> HistorySeed {
    let mut seed = HistorySeed::default();

    for row in rows {
        let Ok(period_id) = PeriodId::parse(row.period.trim()) else {
            warn!(period = %row.period, "Skipping history row with bad period");
            continue;
        };

        if row.number == PENDING_NUMBER {
            // Keep the newest pending round.
            if seed.pending.as_ref().map_or(true, |p| period_id > *p) {
                seed.pending = Some(period_id);
            }
            continue;
        }

        match row_outcome(row.number) {
            Some(outcome) => seed.settled.push((period_id, outcome)),
            None => warn!(number = row.number, "Skipping history row with bad number"),
        }
    }

    seed
}

fn row_outcome(number: i16) -> Option<Outcome> {
    u8::try_from(number).ok().and_then(Outcome::new)
}

#[cfg(test)]
pub(crate) mod test_server {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// HTTP responder answering exact request paths with JSON bodies and
    /// everything else with 404. Returns the base URL and a request counter.
    pub(crate) async fn serve_routes(routes: Vec<(&'static str, &'static str)>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = vec![0u8; 4096];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]).to_string();
                let path = request.split_whitespace().nth(1).unwrap_or_default().to_string();
                counter.fetch_add(1, Ordering::SeqCst);

                let (status, body) = routes
                    .iter()
                    .find(|(route, _)| *route == path)
                    .map(|(_, body)| ("200 OK", *body))
                    .unwrap_or(("404 Not Found", ""));
                let response = format!(
                    "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });

        (base, hits)
    }
}
