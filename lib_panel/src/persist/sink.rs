//! # Event Sink
//!
//! One insert operation, called from the ingestion path. The canonical
//! event and the raw frame it came from are stored side-by-side so later
//! debugging can compare what the upstream sent against what we made of it.

use std::sync::Mutex;

use futures_util::future::BoxFuture;
use thiserror::Error;

use crate::events::{CanonicalEvent, RawFrame};

/// Failures of the durable store. Logged and swallowed by the caller;
/// never retried synchronously, never fatal to ingestion.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to connect to database: {0}")]
    Connection(String),
    #[error("insert failed: {0}")]
    Insert(String),
}

/// A durable store for canonical events.
pub trait EventSink: Send + Sync {
    /// Stores one event together with its originating raw frame.
    fn store<'a>(
        &'a self,
        event: &'a CanonicalEvent,
        raw: &'a RawFrame,
    ) -> BoxFuture<'a, Result<(), SinkError>>;
}

/// Sink used when no database is configured: accepts and discards.
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn store<'a>(
        &'a self,
        _event: &'a CanonicalEvent,
        _raw: &'a RawFrame,
    ) -> BoxFuture<'a, Result<(), SinkError>> {
        Box::pin(async { Ok(()) })
    }
}

/// In-memory sink for tests and diagnostics.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<CanonicalEvent>>,
}

impl MemorySink {
    /// Copies out everything stored so far, in storage order.
    pub fn events(&self) -> Vec<CanonicalEvent> {
        self.events.lock().expect("sink lock poisoned").clone()
    }
}

impl EventSink for MemorySink {
    fn store<'a>(
        &'a self,
        event: &'a CanonicalEvent,
        _raw: &'a RawFrame,
    ) -> BoxFuture<'a, Result<(), SinkError>> {
        Box::pin(async move {
            self.events.lock().expect("sink lock poisoned").push(event.clone());
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::normalize;

    #[tokio::test]
    async fn test_memory_sink_stores_in_order() {
        let sink = MemorySink::default();
        let raw = RawFrame::default();

        let mut first = normalize(&raw);
        first.device_id = "dev-1".to_string();
        let mut second = normalize(&raw);
        second.device_id = "dev-2".to_string();

        sink.store(&first, &raw).await.unwrap();
        sink.store(&second, &raw).await.unwrap();

        let stored = sink.events();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].device_id, "dev-1");
        assert_eq!(stored[1].device_id, "dev-2");
    }
}
