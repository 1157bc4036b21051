//! # Status Reporter
//!
//! Pure aggregation of pipeline side effects into an immutable snapshot.
//! The reporter never mutates the stream client or the hub; they call in,
//! the dashboard reads out.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Bound on the connection-history ring.
const HISTORY_LIMIT: usize = 20;

/// Lifecycle of the single upstream connection. Owned exclusively by the
/// stream client; nothing else transitions it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Streaming,
    Reconnecting { attempt: u32, delay: Duration },
    Stopped,
}

/// One timestamped connection-history entry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub at: DateTime<Utc>,
    /// "connected", "disconnected", or "error".
    pub kind: String,
    pub detail: String,
}

/// Immutable point-in-time view of the subsystem, recomputed on demand
/// and never persisted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub is_running: bool,
    pub reconnect_attempts: u64,
    pub total_events_processed: u64,
    /// Frames the decoder had to drop as undecodable.
    pub dropped_frames: u64,
    pub uptime_seconds: i64,
    pub last_event_time: Option<DateTime<Utc>>,
    pub time_since_last_event_seconds: Option<i64>,
    pub last_error: Option<String>,
    pub connection_history: Vec<HistoryEntry>,
}

#[derive(Default)]
struct Inner {
    started_at: Option<DateTime<Utc>>,
    last_event: Option<DateTime<Utc>>,
    events: u64,
    dropped: u64,
    reconnects: u64,
    last_error: Option<String>,
    history: VecDeque<HistoryEntry>,
}

/// Collects counters and history from the ingestion path.
#[derive(Default)]
pub struct StatusReporter {
    inner: Mutex<Inner>,
}

impl StatusReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the service as started; uptime counts from here.
    pub fn mark_started(&self) {
        let mut inner = self.inner.lock().expect("status lock poisoned");
        inner.started_at = Some(Utc::now());
    }

    pub fn mark_stopped(&self) {
        let mut inner = self.inner.lock().expect("status lock poisoned");
        inner.started_at = None;
    }

    /// Records one processed (admitted and published) event.
    pub fn record_event(&self) {
        let mut inner = self.inner.lock().expect("status lock poisoned");
        inner.events += 1;
        inner.last_event = Some(Utc::now());
    }

    /// Records one frame the decoder dropped.
    pub fn record_decode_error(&self) {
        let mut inner = self.inner.lock().expect("status lock poisoned");
        inner.dropped += 1;
    }

    /// Records a successful upstream connect.
    pub fn record_connected(&self) {
        let mut inner = self.inner.lock().expect("status lock poisoned");
        push_history(&mut inner.history, "connected", "upstream stream established");
    }

    /// Records a clean upstream disconnect (EOF).
    pub fn record_disconnected(&self, detail: &str) {
        let mut inner = self.inner.lock().expect("status lock poisoned");
        push_history(&mut inner.history, "disconnected", detail);
    }

    /// Records a connection-level error; becomes `lastError`.
    pub fn record_error(&self, detail: &str) {
        let mut inner = self.inner.lock().expect("status lock poisoned");
        inner.last_error = Some(detail.to_string());
        push_history(&mut inner.history, "error", detail);
    }

    /// Counts one scheduled reconnect attempt.
    pub fn record_reconnect(&self) {
        let mut inner = self.inner.lock().expect("status lock poisoned");
        inner.reconnects += 1;
    }

    /// Builds the immutable snapshot. `is_running` comes from the stream
    /// client, which owns that flag.
    pub fn snapshot(&self, is_running: bool) -> StatusSnapshot {
        let inner = self.inner.lock().expect("status lock poisoned");
        let now = Utc::now();

        StatusSnapshot {
            is_running,
            reconnect_attempts: inner.reconnects,
            total_events_processed: inner.events,
            dropped_frames: inner.dropped,
            uptime_seconds: inner
                .started_at
                .map(|t| (now - t).num_seconds())
                .unwrap_or(0),
            last_event_time: inner.last_event,
            time_since_last_event_seconds: inner.last_event.map(|t| (now - t).num_seconds()),
            last_error: inner.last_error.clone(),
            connection_history: inner.history.iter().cloned().collect(),
        }
    }
}

fn push_history(history: &mut VecDeque<HistoryEntry>, kind: &str, detail: &str) {
    if history.len() == HISTORY_LIMIT {
        history.pop_front();
    }
    history.push_back(HistoryEntry {
        at: Utc::now(),
        kind: kind.to_string(),
        detail: detail.to_string(),
    });
}
