//! # Upstream Stream Client
//!
//! Owns the single long-lived streaming connection to the upstream event
//! source and the whole ingestion pipeline behind it: read loop, frame
//! decoding, dedup, normalization, fan-out to sink and hub, and the
//! exponential-backoff reconnect cycle.
//!
//! The service object here is constructed explicitly and wired with its
//! collaborators by the process entry point; there is no module-level
//! singleton and no auto-start.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::core::hub::BroadcastHub;
use crate::core::status::{ConnectionState, StatusReporter, StatusSnapshot};
use crate::events::{normalize, DedupCache, EventIdentity, RawFrame};
use crate::persist::EventSink;
use crate::wire::FrameDecoder;

/// First reconnect delay after a failure.
pub const BACKOFF_FLOOR: Duration = Duration::from_secs(5);
/// Reconnect delays double up to this ceiling.
pub const BACKOFF_CEILING: Duration = Duration::from_secs(60);

/// Everything the stream client needs to reach the upstream source.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Upstream streaming endpoint URL.
    pub endpoint: String,
    /// Bearer credential for the upstream API.
    pub api_token: String,
    /// Identifier of the security system whose events we want.
    pub system_id: String,
    pub backoff_floor: Duration,
    pub backoff_ceiling: Duration,
}

impl StreamConfig {
    pub fn new(endpoint: &str, api_token: &str, system_id: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            api_token: api_token.to_string(),
            system_id: system_id.to_string(),
            backoff_floor: BACKOFF_FLOOR,
            backoff_ceiling: BACKOFF_CEILING,
        }
    }

    /// Checks the configuration completely before any connection attempt.
    /// This is the one failure the subsystem surfaces synchronously.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::MissingEndpoint);
        }
        if self.api_token.trim().is_empty() {
            return Err(ConfigError::MissingToken);
        }
        if self.system_id.trim().is_empty() {
            return Err(ConfigError::MissingSystemId);
        }
        let parsed =
            Url::parse(&self.endpoint).map_err(|e| ConfigError::BadEndpoint(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::BadEndpoint(format!(
                "unsupported scheme '{}'",
                parsed.scheme()
            )));
        }
        Ok(())
    }
}

/// Configuration problems that make `start()` fail fast. Never retried
/// automatically.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("upstream endpoint URL is not configured")]
    MissingEndpoint,
    #[error("upstream API token is not configured")]
    MissingToken,
    #[error("target system id is not configured")]
    MissingSystemId,
    #[error("invalid upstream endpoint URL: {0}")]
    BadEndpoint(String),
}

/// How one streaming session ended.
enum SessionEnd {
    Eof,
    Error(String),
    Cancelled,
}

/// The service control surface: `start`, `stop`, `status`.
///
/// Cheap to clone; all clones share the same underlying client.
#[derive(Clone)]
pub struct EventStreamService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    config: StreamConfig,
    hub: Arc<BroadcastHub>,
    sink: Arc<dyn EventSink>,
    dedup: DedupCache,
    status: StatusReporter,
    state: Mutex<ConnectionState>,
    // The running flag, cancellation token, and task handle transition
    // together or not at all; one lock guards all three so a concurrent
    // stop() can never observe a half-started service.
    lifecycle: Mutex<Lifecycle>,
}

#[derive(Default)]
struct Lifecycle {
    running: bool,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl EventStreamService {
    /// Builds a stopped service around its collaborators.
    pub fn new(config: StreamConfig, hub: Arc<BroadcastHub>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                config,
                hub,
                sink,
                dedup: DedupCache::default(),
                status: StatusReporter::new(),
                state: Mutex::new(ConnectionState::Disconnected),
                lifecycle: Mutex::new(Lifecycle::default()),
            }),
        }
    }

    /// Validates configuration and spawns the read loop. Idempotent:
    /// calling it on a running service is a no-op, not an error.
    pub fn start(&self) -> Result<(), ConfigError> {
        self.inner.config.validate()?;

        {
            let mut life = self.inner.lifecycle.lock().expect("lifecycle lock poisoned");
            if life.running {
                log::debug!("start() called while already running, ignoring");
                return Ok(());
            }
            life.running = true;

            let token = CancellationToken::new();
            life.cancel = token.clone();

            let inner = Arc::clone(&self.inner);
            life.task = Some(tokio::spawn(async move { inner.read_loop(token).await }));
            self.inner.status.mark_started();
        }

        log::info!("upstream stream client started: {}", self.inner.config.endpoint);
        Ok(())
    }

    /// Terminates the read loop (even mid-read), cancels any pending
    /// reconnect, and clears the dedup cache. No frames are processed
    /// after this returns. Safe to call at any time.
    pub async fn stop(&self) {
        let handle = {
            let mut life = self.inner.lifecycle.lock().expect("lifecycle lock poisoned");
            if !life.running {
                return;
            }
            life.running = false;
            life.cancel.cancel();
            life.task.take()
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        self.inner.dedup.clear();
        self.inner.set_state(ConnectionState::Stopped);
        self.inner.status.mark_stopped();
        log::info!("upstream stream client stopped");
    }

    /// Recomputes the status snapshot on demand.
    pub fn status(&self) -> StatusSnapshot {
        self.inner.status.snapshot(self.is_running())
    }

    /// Current connection lifecycle state.
    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.state.lock().expect("state lock poisoned")
    }

    pub fn is_running(&self) -> bool {
        self.inner.lifecycle.lock().expect("lifecycle lock poisoned").running
    }
}

impl ServiceInner {
    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().expect("state lock poisoned") = state;
    }

    /// Connect / stream / reconnect-with-backoff until cancelled.
    async fn read_loop(&self, cancel: CancellationToken) {
        let client = reqwest::Client::new();
        let mut delay = self.config.backoff_floor;
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            self.set_state(ConnectionState::Connecting);
            log::info!("connecting to upstream event stream: {}", self.config.endpoint);

            match self.open_stream(&client).await {
                Ok(response) => {
                    log::info!("upstream connected");
                    self.set_state(ConnectionState::Streaming);
                    self.status.record_connected();
                    // Any successful connect resets the backoff schedule.
                    delay = self.config.backoff_floor;
                    attempt = 0;

                    match self.pump(response, &cancel).await {
                        SessionEnd::Cancelled => break,
                        SessionEnd::Eof => {
                            log::warn!("upstream closed the stream");
                            self.status.record_disconnected("upstream closed the stream");
                        }
                        SessionEnd::Error(detail) => {
                            log::error!("upstream stream error: {detail}");
                            self.status.record_error(&detail);
                        }
                    }
                }
                Err(detail) => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    log::error!("upstream connect failed: {detail}");
                    self.status.record_error(&detail);
                }
            }

            attempt += 1;
            self.status.record_reconnect();
            self.set_state(ConnectionState::Reconnecting { attempt, delay });
            log::warn!("reconnecting in {}s (attempt {attempt})", delay.as_secs_f32());

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            delay = next_delay(delay, self.config.backoff_ceiling);
        }
    }

    /// Opens the streaming request. A non-success status is a connection
    /// failure, not a data error.
    async fn open_stream(&self, client: &reqwest::Client) -> Result<reqwest::Response, String> {
        let url = format!(
            "{}?systemId={}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.system_id
        );
        let response = client
            .get(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .bearer_auth(&self.config.api_token)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            return Err(format!("upstream returned status {}", response.status()));
        }
        Ok(response)
    }

    /// Pulls byte chunks until EOF, error, or cancellation.
    async fn pump(&self, response: reqwest::Response, cancel: &CancellationToken) -> SessionEnd {
        let mut decoder = FrameDecoder::new();
        let mut stream = response.bytes_stream();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return SessionEnd::Cancelled,
                chunk = stream.next() => match chunk {
                    Some(Ok(bytes)) => {
                        let batch = decoder.push(&bytes);
                        for error in &batch.dropped {
                            log::warn!("dropping undecodable frame: {error}");
                            self.status.record_decode_error();
                        }
                        for frame in batch.frames {
                            self.dispatch(frame).await;
                        }
                    }
                    Some(Err(e)) => return SessionEnd::Error(e.to_string()),
                    None => return SessionEnd::Eof,
                }
            }
        }
    }

    /// Dedup, normalize, and hand the event to both consumers. Events
    /// reach sink and hub in admission order; a persistence failure never
    /// stops the live broadcast.
    async fn dispatch(&self, frame: RawFrame) {
        let identity = EventIdentity::from_frame(&frame);
        if !self.dedup.admit(identity) {
            log::debug!("duplicate event suppressed");
            return;
        }

        let event = Arc::new(normalize(&frame));
        if let Err(e) = self.sink.store(&event, &frame).await {
            log::warn!("persistence failed, event still broadcast: {e}");
        }
        self.hub.publish(Arc::clone(&event));
        self.status.record_event();
    }
}

/// The backoff schedule: double up to the ceiling.
pub fn next_delay(current: Duration, ceiling: Duration) -> Duration {
    (current * 2).min(ceiling)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemorySink;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    const RESPONSE_HEAD: &[u8] =
        b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n";

    fn test_config(addr: std::net::SocketAddr) -> StreamConfig {
        StreamConfig {
            endpoint: format!("http://{addr}/stream"),
            api_token: "test-token".to_string(),
            system_id: "sys-1".to_string(),
            backoff_floor: Duration::from_millis(50),
            backoff_ceiling: Duration::from_millis(200),
        }
    }

    async fn read_request(sock: &mut TcpStream) {
        let mut buf = [0u8; 1024];
        let mut seen: Vec<u8> = Vec::new();
        loop {
            let n = sock.read(&mut buf).await.expect("read request");
            if n == 0 {
                return;
            }
            seen.extend_from_slice(&buf[..n]);
            if seen.windows(4).any(|w| w == b"\r\n\r\n") {
                return;
            }
        }
    }

    async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {what}");
    }

    #[test]
    fn test_backoff_is_monotone_and_capped() {
        let mut delay = BACKOFF_FLOOR;
        let mut previous = delay;
        for _ in 0..10 {
            delay = next_delay(delay, BACKOFF_CEILING);
            assert!(delay >= previous);
            assert!(delay <= BACKOFF_CEILING);
            previous = delay;
        }
        assert_eq!(delay, BACKOFF_CEILING);
    }

    #[test]
    fn test_config_validation_fails_fast() {
        let mut config = StreamConfig::new("https://events.example.com/stream", "tok", "sys-1");
        assert!(config.validate().is_ok());

        config.api_token = String::new();
        assert!(matches!(config.validate(), Err(ConfigError::MissingToken)));

        config.api_token = "tok".to_string();
        config.endpoint = "ftp://events.example.com".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::BadEndpoint(_))));

        config.endpoint = String::new();
        assert!(matches!(config.validate(), Err(ConfigError::MissingEndpoint)));
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_stop_is_clean() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept connections and hold them open without sending anything.
        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else { return };
                tokio::spawn(async move {
                    read_request(&mut sock).await;
                    let _ = sock.write_all(RESPONSE_HEAD).await;
                    tokio::time::sleep(Duration::from_secs(30)).await;
                });
            }
        });

        let hub = Arc::new(BroadcastHub::new());
        let sink = Arc::new(MemorySink::default());
        let service = EventStreamService::new(test_config(addr), hub, sink);

        service.start().expect("first start");
        assert!(service.is_running());
        service.start().expect("second start is a no-op");

        service.stop().await;
        assert!(!service.is_running());
        assert_eq!(service.connection_state(), ConnectionState::Stopped);

        // Stopping again is also a no-op.
        service.stop().await;
    }

    #[tokio::test]
    async fn test_reconnects_after_clean_eof() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            // First session: three frames, then a clean close.
            let (mut sock, _) = listener.accept().await.unwrap();
            read_request(&mut sock).await;
            sock.write_all(RESPONSE_HEAD).await.unwrap();
            for n in 0..3 {
                let frame = format!(
                    "data: {{\"deviceId\":\"dev-{n}\",\"type\":\"motion\",\"eventId\":\"e{n}\"}}\n\n"
                );
                sock.write_all(frame.as_bytes()).await.unwrap();
            }
            drop(sock);

            // Second session: connect succeeds, stream stays open and idle.
            let (mut sock, _) = listener.accept().await.unwrap();
            read_request(&mut sock).await;
            sock.write_all(RESPONSE_HEAD).await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let hub = Arc::new(BroadcastHub::new());
        let sink = Arc::new(MemorySink::default());
        let service = EventStreamService::new(
            test_config(addr),
            Arc::clone(&hub),
            Arc::clone(&sink) as Arc<dyn EventSink>,
        );
        let (_id, mut rx) = hub.register();

        service.start().expect("start");

        let probe = service.clone();
        wait_until("three events processed", || {
            probe.status().total_events_processed == 3
        })
        .await;
        let probe = service.clone();
        wait_until("automatic reconnect", || {
            probe.status().reconnect_attempts == 1
        })
        .await;
        let probe = service.clone();
        wait_until("second session streaming", || {
            probe.connection_state() == ConnectionState::Streaming
        })
        .await;

        // Persisted and broadcast, in admission order.
        let stored = sink.events();
        assert_eq!(stored.len(), 3);
        assert_eq!(stored[0].device_id, "dev-0");
        assert_eq!(stored[2].device_id, "dev-2");

        let ack = rx.recv().await.unwrap();
        assert!(matches!(*ack, crate::core::hub::PushFrame::Connected { .. }));
        for n in 0..3 {
            let frame = rx.recv().await.unwrap();
            match &*frame {
                crate::core::hub::PushFrame::Event(event) => {
                    assert_eq!(event.device_id, format!("dev-{n}"));
                }
                other => panic!("expected event frame, got {other:?}"),
            }
        }

        service.stop().await;
    }

    #[tokio::test]
    async fn test_duplicate_frames_yield_one_event() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            read_request(&mut sock).await;
            sock.write_all(RESPONSE_HEAD).await.unwrap();
            let frame = "data: {\"deviceId\":\"dev-1\",\"timestamp\":\"2024-01-01T00:00:00Z\",\
                         \"type\":\"motion\",\"eventId\":\"abc\"}\n\n";
            // Same logical event delivered twice.
            sock.write_all(frame.as_bytes()).await.unwrap();
            sock.write_all(frame.as_bytes()).await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let hub = Arc::new(BroadcastHub::new());
        let sink = Arc::new(MemorySink::default());
        let service = EventStreamService::new(
            test_config(addr),
            hub,
            Arc::clone(&sink) as Arc<dyn EventSink>,
        );

        service.start().expect("start");
        let probe = service.clone();
        wait_until("the first event", || probe.status().total_events_processed >= 1).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(service.status().total_events_processed, 1);
        assert_eq!(sink.events().len(), 1);

        service.stop().await;
    }

    #[tokio::test]
    async fn test_no_retry_fires_after_stop() {
        // Reserve a port, then release it: every connect is refused and
        // the client cycles through the reconnect schedule.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let hub = Arc::new(BroadcastHub::new());
        let service =
            EventStreamService::new(test_config(addr), hub, Arc::new(MemorySink::default()));

        service.start().expect("start");
        let probe = service.clone();
        wait_until("a few reconnect attempts", || {
            probe.status().reconnect_attempts >= 2
        })
        .await;

        service.stop().await;
        assert!(!service.is_running());
        assert_eq!(service.connection_state(), ConnectionState::Stopped);

        // Long enough for several backoff periods to elapse; the counter
        // must not move once stop() has returned.
        let attempts = service.status().reconnect_attempts;
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(service.status().reconnect_attempts, attempts);
    }

    #[tokio::test]
    async fn test_backoff_resets_to_floor_after_successful_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            // Two sessions that connect cleanly and immediately EOF, so
            // the second reconnect is scheduled after a fresh success.
            for _ in 0..2 {
                let (mut sock, _) = listener.accept().await.unwrap();
                read_request(&mut sock).await;
                sock.write_all(RESPONSE_HEAD).await.unwrap();
                drop(sock);
            }
            // Third session stays open so the cycle settles.
            let (mut sock, _) = listener.accept().await.unwrap();
            read_request(&mut sock).await;
            sock.write_all(RESPONSE_HEAD).await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let floor = Duration::from_millis(200);
        let config = StreamConfig {
            backoff_floor: floor,
            backoff_ceiling: Duration::from_millis(800),
            ..test_config(addr)
        };
        let hub = Arc::new(BroadcastHub::new());
        let service = EventStreamService::new(config, hub, Arc::new(MemorySink::default()));

        service.start().expect("start");

        // After the first EOF the scheduled delay is the floor; had the
        // second session not reset the schedule, the delay observed after
        // the second EOF would be doubled.
        let probe = service.clone();
        let mut observed = None;
        wait_until("reconnect scheduled after the second session", || {
            if probe.status().reconnect_attempts == 2 {
                if let ConnectionState::Reconnecting { attempt, delay } = probe.connection_state()
                {
                    observed = Some((attempt, delay));
                    return true;
                }
            }
            false
        })
        .await;
        assert_eq!(observed, Some((1, floor)));

        service.stop().await;
    }
}
