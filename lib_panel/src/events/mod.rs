//! # Events Module
//!
//! The event data model plus the two pure stages of the ingestion pipeline:
//! normalization of heterogeneous upstream payloads into one
//! [`CanonicalEvent`] shape, and time-windowed deduplication of
//! at-least-once upstream delivery.

/// Raw and canonical event types.
pub mod model;
/// Payload normalization, image precedence, and alarm-zone classification.
pub mod normalizer;
/// Bounded, time-windowed duplicate suppression.
pub mod dedup;

// --- Public API Re-exports ---
pub use dedup::DedupCache;
pub use model::{CanonicalEvent, EventIdentity, RawFrame};
pub use normalizer::normalize;
