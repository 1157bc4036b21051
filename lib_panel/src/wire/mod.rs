//! # Wire Format Module
//!
//! Pure parsing for the upstream push protocol: a newline-delimited stream
//! of `field: value` lines where a blank line terminates one frame. The
//! decoder performs no I/O of its own; the read loop in
//! [`crate::core::EventStreamService`] feeds it whatever byte chunks the
//! network produces, and chunk boundaries may fall anywhere, including
//! inside a multi-byte character.

/// The chunk-safe frame decoder.
pub mod decoder;

// --- Public API Re-exports ---
pub use decoder::{DecodeBatch, DecodeError, FrameDecoder};
