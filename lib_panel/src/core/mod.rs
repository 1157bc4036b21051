//! # Core Engine Module
//!
//! The stateful heart of the subsystem. Everything here is asynchronous,
//! thread-safe, and built for a single-writer ingestion path with many
//! concurrent readers.
//!
//! ## Core Components:
//!
//! - **`ingest`**: The upstream stream client. Owns the one long-lived
//!   streaming connection, the read loop, error classification, and the
//!   exponential-backoff reconnect cycle. Exposes the service control
//!   surface (`start`/`stop`/`status`).
//!
//! - **`hub`**: The broadcast hub. Registers live viewer channels, pushes
//!   every normalized event (and periodic heartbeats) to all of them, and
//!   drops dead subscribers without affecting the rest.
//!
//! - **`status`**: The status reporter. Aggregates uptime, reconnect
//!   count, event counters, last error, and a bounded connection history
//!   into an on-demand immutable snapshot.

/// The upstream stream client and service control surface.
pub mod ingest;
/// The multi-subscriber broadcast hub with heartbeats.
pub mod hub;
/// Read-only status aggregation.
pub mod status;

// --- Public API Re-exports ---
pub use hub::{BroadcastHub, PushFrame, SubscriberId, HEARTBEAT_INTERVAL, SUBSCRIBER_QUEUE_LIMIT};
pub use ingest::{ConfigError, EventStreamService, StreamConfig};
pub use status::{ConnectionState, StatusReporter, StatusSnapshot};
