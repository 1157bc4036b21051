//! # Persistence Module
//!
//! The durable store is a collaborator of the pipeline, not a dependency:
//! the read loop calls [`EventSink::store`] once per admitted event and
//! tolerates failure. Live visibility never waits on storage.

/// The sink trait plus the no-op and in-memory implementations.
pub mod sink;
/// The PostgreSQL-backed sink.
pub mod postgres;

// --- Public API Re-exports ---
pub use postgres::PostgresSink;
pub use sink::{EventSink, MemorySink, NullSink, SinkError};
