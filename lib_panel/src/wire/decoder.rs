//! # Frame Decoder
//!
//! Incremental parser for the upstream event stream. Bytes are buffered
//! until a complete line is available, lines are accumulated until a blank
//! line closes the frame, and the frame's `data` payload is parsed as JSON.
//! Malformed frames are reported in the batch and skipped; the decoder
//! itself never fails.

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;

use crate::events::RawFrame;

/// Why a frame was discarded by the decoder.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    /// The frame carried no `data` field at all.
    #[error("frame has no data field")]
    MissingData,
    /// The `data` value was not valid JSON.
    #[error("frame data is not valid JSON: {0}")]
    BadJson(String),
    /// The `data` value parsed, but was not a JSON object.
    #[error("frame data is not a JSON object")]
    NotAnObject,
}

/// Everything one call to [`FrameDecoder::push`] produced: completed frames
/// in wire order, plus the reasons for any frames that had to be dropped.
#[derive(Debug, Default)]
pub struct DecodeBatch {
    /// Frames decoded in the order they appeared on the wire.
    pub frames: Vec<RawFrame>,
    /// One entry per frame that was dropped as undecodable.
    pub dropped: Vec<DecodeError>,
}

/// Incremental decoder for the `field: value` push protocol.
///
/// Holds partial lines and partial frames across `push` calls, so callers
/// can feed it network chunks of any size and alignment.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    // Raw bytes not yet terminated by a newline. Kept as bytes, not a
    // String: a chunk boundary may split a UTF-8 sequence.
    buf: Vec<u8>,
    event: Option<String>,
    data_lines: Vec<String>,
    extra: BTreeMap<String, String>,
    in_frame: bool,
}

impl FrameDecoder {
    /// Creates an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk of bytes and returns every frame it completed.
    pub fn push(&mut self, chunk: &[u8]) -> DecodeBatch {
        let mut batch = DecodeBatch::default();
        self.buf.extend_from_slice(chunk);

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop(); // the \n itself
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line).into_owned();
            self.take_line(&line, &mut batch);
        }

        batch
    }

    fn take_line(&mut self, line: &str, batch: &mut DecodeBatch) {
        if line.is_empty() {
            if self.in_frame {
                self.finish_frame(batch);
            }
            return;
        }
        // Lines starting with a colon are protocol comments / keepalives.
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f.trim(), v.strip_prefix(' ').unwrap_or(v)),
            None => (line.trim(), ""),
        };

        self.in_frame = true;
        match field {
            "data" => self.data_lines.push(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            // Unknown fields are preserved verbatim for forward compatibility.
            _ => {
                self.extra.insert(field.to_string(), value.to_string());
            }
        }
    }

    fn finish_frame(&mut self, batch: &mut DecodeBatch) {
        let event = self.event.take();
        let data_lines = std::mem::take(&mut self.data_lines);
        let extra = std::mem::take(&mut self.extra);
        self.in_frame = false;

        if data_lines.is_empty() {
            batch.dropped.push(DecodeError::MissingData);
            return;
        }

        // Multiple data lines in one frame are a single logical payload.
        let joined = data_lines.join("\n");
        match serde_json::from_str::<Value>(&joined) {
            Ok(Value::Object(data)) => batch.frames.push(RawFrame { event, data, extra }),
            Ok(_) => batch.dropped.push(DecodeError::NotAnObject),
            Err(e) => batch.dropped.push(DecodeError::BadJson(e.to_string())),
        }
    }
}
