//! # PanelStream Engine
//!
//! The event ingestion and live-broadcast subsystem behind the PanelStream
//! security dashboard. The dashboard UI itself (PIN entry, arm/disarm,
//! settings) lives elsewhere and only ever touches this crate through the
//! service control surface (`start`/`stop`/`status`) and the broadcast
//! output stream.
//!
//! ## Pipeline
//!
//! Upstream bytes flow through a single-writer pipeline:
//!
//! ```text
//! upstream chunks -> wire::FrameDecoder -> events::DedupCache
//!                 -> events::normalize  -> { persist::EventSink, core::BroadcastHub }
//! ```
//!
//! The `core::EventStreamService` owns the connection lifecycle (connect,
//! read loop, exponential-backoff reconnect, clean shutdown) while the
//! `core::BroadcastHub` fans each normalized event out to every registered
//! viewer. Persistence and broadcast fail independently; neither can stall
//! ingestion.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// Chunk-safe decoder for the upstream push-protocol wire format.
pub mod wire;
/// Event data model, normalization, and deduplication.
pub mod events;
/// Connection lifecycle, broadcast hub, and status reporting.
pub mod core;
/// Durable event storage behind the `EventSink` trait.
pub mod persist;

// --- Public API Re-exports ---
pub use crate::core::{
    BroadcastHub, ConnectionState, EventStreamService, PushFrame, StatusReporter, StatusSnapshot,
    StreamConfig,
};
pub use events::{normalize, CanonicalEvent, DedupCache, EventIdentity, RawFrame};
pub use persist::{EventSink, MemorySink, NullSink, PostgresSink, SinkError};
pub use wire::{DecodeBatch, DecodeError, FrameDecoder};
