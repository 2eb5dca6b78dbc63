//! Connection Supervisor
//!
//! Owns the single WebSocket connection to the round feed. Every text frame
//! is forwarded to the engine's frame channel in arrival order. The `ready`
//! flag is true only while a connection is open; it drops to false on close,
//! error or idle timeout, and the supervisor reconnects with exponential
//! backoff until shut down.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// How long a UI should wait for readiness before reporting a connectivity
/// error instead of a spinner.
pub const READINESS_TIMEOUT: Duration = Duration::from_secs(8);

/// Supervisor configuration.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Feed URL (`ws://` or `wss://`).
    pub url: String,
    /// Reconnect when no frame arrives for this long.
    pub idle_timeout: Duration,
    /// First reconnect delay.
    pub backoff_initial: Duration,
    /// Longest reconnect delay.
    pub backoff_max: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8000/ws".to_string(),
            idle_timeout: Duration::from_secs(90),
            backoff_initial: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
        }
    }
}

impl SupervisorConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let secs = |name: &str| {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
        };

        Self {
            url: std::env::var("ROUND_SYNC_WS_URL").unwrap_or(defaults.url),
            idle_timeout: secs("ROUND_SYNC_IDLE_TIMEOUT_SECS").unwrap_or(defaults.idle_timeout),
            backoff_initial: defaults.backoff_initial,
            backoff_max: secs("ROUND_SYNC_BACKOFF_MAX_SECS").unwrap_or(defaults.backoff_max),
        }
    }
}

/// Supervisor errors.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// No frame arrived within the idle timeout.
    #[error("No frame for {0:?}")]
    Idle(Duration),

    /// Connection did not become ready in time.
    #[error("Connection not ready after {0:?}")]
    NotReady(Duration),

    /// Supervisor is gone; readiness can no longer change.
    #[error("Supervisor stopped")]
    Stopped,
}

/// Exponential reconnect delay with +/-10% jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    /// Create a backoff starting at `initial` and capped at `max`.
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Next delay to wait; doubles the base for the following call.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = (self.current * 2).min(self.max);
        let factor = rand::thread_rng().gen_range(0.9..=1.1);
        base.mul_f64(factor)
    }

    /// Go back to the initial delay after a successful connection.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Read side of the `ready` flag.
#[derive(Debug, Clone)]
pub struct Readiness {
    rx: watch::Receiver<bool>,
}

impl Readiness {
    /// Whether the feed connection is currently open.
    pub fn is_ready(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until the connection is open, or fail after `limit`.
    pub async fn wait_ready(&self, limit: Duration) -> Result<(), SupervisorError> {
        let mut rx = self.rx.clone();
        let waited = timeout(limit, async move {
            rx.wait_for(|ready| *ready).await.map(|_| ())
        })
        .await;

        match waited {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SupervisorError::Stopped),
            Err(_) => Err(SupervisorError::NotReady(limit)),
        }
    }

    /// Wait for the next readiness change and return the new value.
    pub async fn changed(&mut self) -> Result<bool, SupervisorError> {
        self.rx.changed().await.map_err(|_| SupervisorError::Stopped)?;
        Ok(*self.rx.borrow_and_update())
    }
}

/// How a connected session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// Server closed the connection.
    Closed,
    /// Engine dropped its frame receiver.
    ConsumerGone,
    /// Shutdown was requested.
    Shutdown,
}

/// Keeps one feed connection alive and forwards its frames.
pub struct ConnectionSupervisor {
    config: SupervisorConfig,
    frames: mpsc::Sender<String>,
    ready: watch::Sender<bool>,
}

impl ConnectionSupervisor {
    /// Create a supervisor forwarding text frames to `frames`.
    pub fn new(config: SupervisorConfig, frames: mpsc::Sender<String>) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            config,
            frames,
            ready,
        }
    }

    /// Readiness flag for consumers.
    pub fn readiness(&self) -> Readiness {
        Readiness {
            rx: self.ready.subscribe(),
        }
    }

    /// Connect, forward frames and reconnect until shutdown or until the
    /// frame consumer goes away.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut backoff = Backoff::new(self.config.backoff_initial, self.config.backoff_max);

        loop {
            let attempt = Uuid::new_v4();
            let span = info_span!("connection", %attempt, url = %self.config.url);

            let result = self
                .session(&mut backoff, &mut shutdown)
                .instrument(span)
                .await;
            self.set_ready(false);

            match result {
                Ok(SessionEnd::Shutdown) => break,
                Ok(SessionEnd::ConsumerGone) => {
                    debug!("Frame consumer gone, stopping supervisor");
                    break;
                }
                Ok(SessionEnd::Closed) => warn!(%attempt, "Feed connection closed"),
                Err(e) => warn!(%attempt, "Feed connection lost: {}", e),
            }

            let delay = backoff.next_delay();
            debug!(?delay, "Reconnecting");
            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown.recv() => break,
            }
        }

        self.set_ready(false);
        info!("Connection supervisor stopped");
    }

    /// One connection attempt and, if it succeeds, its read loop.
    async fn session(
        &self,
        backoff: &mut Backoff,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<SessionEnd, SupervisorError> {
        let ws_stream = tokio::select! {
            connected = connect_async(self.config.url.as_str()) => connected?.0,
            _ = shutdown.recv() => return Ok(SessionEnd::Shutdown),
        };

        info!("Feed connected");
        backoff.reset();
        self.set_ready(true);

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let idle = self.config.idle_timeout;

        loop {
            tokio::select! {
                msg = timeout(idle, ws_receiver.next()) => {
                    match msg {
                        Err(_) => return Err(SupervisorError::Idle(idle)),
                        Ok(Some(Ok(Message::Text(text)))) => {
                            if self.frames.send(text).await.is_err() {
                                let _ = ws_sender.send(Message::Close(None)).await;
                                return Ok(SessionEnd::ConsumerGone);
                            }
                        }
                        Ok(Some(Ok(Message::Binary(data)))) => {
                            debug!(len = data.len(), "Ignoring binary frame");
                        }
                        Ok(Some(Ok(Message::Close(frame)))) => {
                            debug!(?frame, "Close frame received");
                            return Ok(SessionEnd::Closed);
                        }
                        // Pings are answered by tungstenite itself.
                        Ok(Some(Ok(_))) => {}
                        Ok(Some(Err(e))) => {
                            error!("WebSocket error: {}", e);
                            return Err(e.into());
                        }
                        Ok(None) => return Ok(SessionEnd::Closed),
                    }
                }
                _ = shutdown.recv() => {
                    let _ = ws_sender.send(Message::Close(None)).await;
                    return Ok(SessionEnd::Shutdown);
                }
            }
        }
    }

    fn set_ready(&self, ready: bool) {
        let previous = self.ready.send_replace(ready);
        if previous != ready {
            debug!(ready, "Readiness changed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    fn test_config(addr: std::net::SocketAddr) -> SupervisorConfig {
        SupervisorConfig {
            url: format!("ws://{}", addr),
            idle_timeout: Duration::from_secs(30),
            backoff_initial: Duration::from_millis(10),
            backoff_max: Duration::from_millis(50),
        }
    }

    async fn recv_frame(rx: &mut mpsc::Receiver<String>) -> String {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("frame in time")
            .expect("channel open")
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(400));
        let delays: Vec<Duration> = (0..5).map(|_| backoff.next_delay()).collect();

        let within = |d: Duration, base_ms: u64| {
            d >= Duration::from_millis(base_ms * 9 / 10) && d <= Duration::from_millis(base_ms * 11 / 10)
        };
        assert!(within(delays[0], 100));
        assert!(within(delays[1], 200));
        assert!(within(delays[2], 400));
        assert!(within(delays[3], 400));
        assert!(within(delays[4], 400));

        backoff.reset();
        assert!(within(backoff.next_delay(), 100));
    }

    #[test]
    fn test_config_default() {
        let config = SupervisorConfig::default();
        assert_eq!(config.idle_timeout, Duration::from_secs(90));
        assert_eq!(config.backoff_max, Duration::from_secs(30));
        assert_eq!(READINESS_TIMEOUT, Duration::from_secs(8));
    }

    #[tokio::test]
    async fn test_forwards_frames_and_tracks_readiness() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (close_tx, close_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            ws.send(Message::Text("20250701194956 30S 2025-07-01 19:49:56".into()))
                .await
                .unwrap();
            ws.send(Message::Text("20250701194956 30S 7".into())).await.unwrap();
            let _ = close_rx.await;
            ws.close(None).await.unwrap();
            // Keep the listener alive so no reconnect succeeds.
            listener
        });

        let (frame_tx, mut frame_rx) = mpsc::channel(8);
        let supervisor = ConnectionSupervisor::new(test_config(addr), frame_tx);
        let mut readiness = supervisor.readiness();
        assert!(!readiness.is_ready());

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(supervisor.run(shutdown_rx));

        readiness.wait_ready(READINESS_TIMEOUT).await.unwrap();
        assert_eq!(recv_frame(&mut frame_rx).await, "20250701194956 30S 2025-07-01 19:49:56");
        assert_eq!(recv_frame(&mut frame_rx).await, "20250701194956 30S 7");

        close_tx.send(()).unwrap();
        while readiness.is_ready() {
            readiness.changed().await.unwrap();
        }
        assert!(!readiness.is_ready());

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
        drop(server);
    }

    #[tokio::test]
    async fn test_reconnects_after_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            // First connection is dropped straight away.
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            ws.close(None).await.unwrap();

            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            ws.send(Message::Text("second".into())).await.unwrap();
            // Hold the connection open.
            while let Some(Ok(_)) = ws.next().await {}
        });

        let (frame_tx, mut frame_rx) = mpsc::channel(8);
        let supervisor = ConnectionSupervisor::new(test_config(addr), frame_tx);
        let readiness = supervisor.readiness();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(supervisor.run(shutdown_rx));

        assert_eq!(recv_frame(&mut frame_rx).await, "second");
        assert!(readiness.is_ready());

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
        assert!(!readiness.is_ready());
    }

    #[tokio::test]
    async fn test_idle_connection_is_dropped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                // Accept and stay silent.
                held.push(accept_async(stream).await.unwrap());
            }
        });

        let (frame_tx, _frame_rx) = mpsc::channel(8);
        let config = SupervisorConfig {
            idle_timeout: Duration::from_millis(100),
            ..test_config(addr)
        };
        let supervisor = ConnectionSupervisor::new(config, frame_tx);
        let mut readiness = supervisor.readiness();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(supervisor.run(shutdown_rx));

        readiness.wait_ready(READINESS_TIMEOUT).await.unwrap();
        // Silence trips the idle timeout and readiness drops.
        let dropped = timeout(Duration::from_secs(5), async {
            loop {
                if !readiness.changed().await.unwrap() {
                    break;
                }
            }
        })
        .await;
        assert!(dropped.is_ok());

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_ready_times_out() {
        // Reserve a port, then free it so nothing is listening.
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let (frame_tx, _frame_rx) = mpsc::channel(8);
        let supervisor = ConnectionSupervisor::new(test_config(addr), frame_tx);
        let readiness = supervisor.readiness();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(supervisor.run(shutdown_rx));

        let result = readiness.wait_ready(Duration::from_millis(200)).await;
        assert!(matches!(result, Err(SupervisorError::NotReady(_))));

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_ready_follows_readiness() {
        let (frame_tx, _frame_rx) = mpsc::channel(8);
        let supervisor = ConnectionSupervisor::new(SupervisorConfig::default(), frame_tx);
        let readiness = supervisor.readiness();

        let waiter = {
            let readiness = readiness.clone();
            tokio::spawn(async move { readiness.wait_ready(Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        supervisor.set_ready(true);
        assert!(waiter.await.unwrap().is_ok());

        // Already open: resolves at once, and can be awaited again.
        assert!(readiness.wait_ready(Duration::from_millis(50)).await.is_ok());
        assert!(readiness.wait_ready(Duration::from_millis(50)).await.is_ok());

        supervisor.set_ready(false);
        drop(supervisor);
        let result = readiness.wait_ready(Duration::from_secs(5)).await;
        assert!(matches!(result, Err(SupervisorError::Stopped)));
    }

    #[tokio::test]
    async fn test_stops_when_consumer_gone() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let _ = ws.send(Message::Text("orphan".into())).await;
            while let Some(Ok(_)) = ws.next().await {}
        });

        let (frame_tx, frame_rx) = mpsc::channel(8);
        drop(frame_rx);
        let supervisor = ConnectionSupervisor::new(test_config(addr), frame_tx);
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

        timeout(Duration::from_secs(5), supervisor.run(shutdown_rx))
            .await
            .expect("supervisor exits");
    }
}
