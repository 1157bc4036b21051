//! # Broadcast Hub
//!
//! In-process registry of live output channels. Each publish pushes an
//! `Arc` of the same frame to every registered subscriber, so fan-out is
//! zero-copy. Subscriber queues are bounded: a failed push means the
//! consumer is gone or has stopped draining, and that subscriber is
//! unregistered on the spot with nobody else affected. A heartbeat frame
//! goes out on a fixed interval so idle connections can detect liveness.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;

use crate::events::CanonicalEvent;

/// How often idle subscribers hear from us.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Per-subscriber queue bound. A consumer this far behind is not going to
/// catch up; letting its backlog grow would hold every frame in memory.
pub const SUBSCRIBER_QUEUE_LIMIT: usize = 256;

/// Opaque handle identifying one registered subscriber.
pub type SubscriberId = usize;

/// One unit of the outbound live-view protocol.
#[derive(Debug, Clone)]
pub enum PushFrame {
    /// Connect acknowledgment, sent immediately on registration.
    Connected { message: String, timestamp: DateTime<Utc> },
    /// One broadcast event, serialized as the raw canonical record.
    Event(Arc<CanonicalEvent>),
    /// Periodic liveness signal.
    Heartbeat { timestamp: DateTime<Utc> },
}

impl PushFrame {
    /// Serializes the frame to the JSON the live-view transport writes.
    pub fn to_json(&self) -> String {
        match self {
            PushFrame::Connected { message, timestamp } => json!({
                "type": "connected",
                "message": message,
                "timestamp": timestamp,
            })
            .to_string(),
            PushFrame::Event(event) => {
                serde_json::to_string(event.as_ref()).unwrap_or_else(|_| "{}".to_string())
            }
            PushFrame::Heartbeat { timestamp } => json!({
                "type": "heartbeat",
                "timestamp": timestamp,
            })
            .to_string(),
        }
    }
}

struct SubscriberHandle {
    id: SubscriberId,
    registered_at: DateTime<Utc>,
    sender: mpsc::Sender<Arc<PushFrame>>,
}

/// Registry of live subscribers. Registration, unregistration, and publish
/// are all safe to call concurrently; the lock lives inside.
#[derive(Default)]
pub struct BroadcastHub {
    subscribers: Mutex<Vec<SubscriberHandle>>,
    next_id: AtomicUsize,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber and returns its id plus the receiving
    /// end of its channel. The connect-ack frame is already queued on it.
    pub fn register(&self) -> (SubscriberId, mpsc::Receiver<Arc<PushFrame>>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_LIMIT);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        // A fresh channel always has room for the ack.
        let _ = tx.try_send(Arc::new(PushFrame::Connected {
            message: "live event stream established".to_string(),
            timestamp: Utc::now(),
        }));

        let mut subscribers = self.subscribers.lock().expect("hub lock poisoned");
        subscribers.push(SubscriberHandle { id, registered_at: Utc::now(), sender: tx });
        log::info!("subscriber {} registered ({} live)", id, subscribers.len());

        (id, rx)
    }

    /// Removes a subscriber explicitly (consumer-initiated disconnect).
    pub fn unregister(&self, id: SubscriberId) {
        let mut subscribers = self.subscribers.lock().expect("hub lock poisoned");
        subscribers.retain(|s| s.id != id);
        log::info!("subscriber {} unregistered ({} live)", id, subscribers.len());
    }

    /// Pushes one event to every live subscriber. Returns how many
    /// subscribers remain after dead ones were dropped.
    pub fn publish(&self, event: Arc<CanonicalEvent>) -> usize {
        self.push_frame(Arc::new(PushFrame::Event(event)))
    }

    /// Pushes one heartbeat frame to every live subscriber.
    pub fn heartbeat(&self) -> usize {
        self.push_frame(Arc::new(PushFrame::Heartbeat { timestamp: Utc::now() }))
    }

    fn push_frame(&self, frame: Arc<PushFrame>) -> usize {
        let mut subscribers = self.subscribers.lock().expect("hub lock poisoned");
        // One bounded write attempt per subscriber, then out; everyone
        // else is unaffected.
        subscribers.retain(|s| match s.sender.try_send(Arc::clone(&frame)) {
            Ok(_) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let lived = (Utc::now() - s.registered_at).num_seconds();
                log::warn!(
                    "subscriber {} stalled with a full queue after {}s, removing",
                    s.id,
                    lived
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                let lived = (Utc::now() - s.registered_at).num_seconds();
                log::info!("subscriber {} gone after {}s, removing", s.id, lived);
                false
            }
        });
        subscribers.len()
    }

    /// Number of currently registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("hub lock poisoned").len()
    }

    /// Emits heartbeats on a fixed period until shutdown is signalled.
    pub async fn run_heartbeat(
        self: Arc<Self>,
        period: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut tick = interval(period);
        tick.tick().await; // the first tick fires immediately
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    log::info!("heartbeat task received shutdown signal");
                    break;
                }
                _ = tick.tick() => {
                    let live = self.heartbeat();
                    log::trace!("heartbeat sent to {} subscribers", live);
                }
            }
        }
    }
}
