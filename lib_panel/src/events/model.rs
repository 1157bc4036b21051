//! # Event Data Model
//!
//! [`RawFrame`] is the transient, schema-less shape the wire decoder
//! produces; [`CanonicalEvent`] is the normalized unit that gets persisted
//! and broadcast; [`EventIdentity`] is the composite key the dedup cache
//! operates on.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::normalizer;

/// One opaque upstream payload, exactly as decoded off the wire.
///
/// The upstream source has no fixed schema across event kinds, so the
/// payload is kept as a raw JSON object and probed by the normalizer.
/// Discarded after normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawFrame {
    /// The optional wire-level frame-type hint (the `event` field).
    pub event: Option<String>,
    /// The JSON object carried by the frame's `data` field.
    pub data: Map<String, Value>,
    /// Wire fields other than `data`/`event`, preserved verbatim.
    pub extra: BTreeMap<String, String>,
}

impl RawFrame {
    /// Returns a string-typed payload field, if present.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }
}

/// The deduplication key: two frames with equal identity are the same
/// logical event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventIdentity {
    /// Device identifier, falling back to device name when absent.
    pub device: String,
    /// The upstream timestamp string, uninterpreted.
    pub timestamp: String,
    /// The classified event type (same fallback chain the normalizer uses).
    pub event_type: String,
    /// The upstream's unique event token, empty when not supplied.
    pub token: String,
}

impl EventIdentity {
    /// Derives the identity of a raw frame.
    pub fn from_frame(frame: &RawFrame) -> Self {
        let device = frame
            .str_field("deviceId")
            .or_else(|| frame.str_field("deviceName"))
            .unwrap_or_default()
            .to_string();
        let timestamp = frame.str_field("timestamp").unwrap_or_default().to_string();
        let token = frame
            .str_field("eventId")
            .or_else(|| frame.str_field("id"))
            .unwrap_or_default()
            .to_string();

        Self {
            device,
            timestamp,
            event_type: normalizer::event_type_of(frame),
            token,
        }
    }
}

/// The normalized, persisted, and broadcast event record.
///
/// Every attribute has a defined default; normalization can never fail to
/// produce one of these. Serialized in camelCase because that is what the
/// dashboard and the persisted JSONB shape expect.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalEvent {
    pub organization_id: String,
    pub location_id: String,
    pub space_id: String,
    pub device_id: String,
    pub device_name: String,
    pub connector_id: String,
    pub connector_name: String,
    pub connector_category: String,
    /// Always present; defaults to `"unknown"`.
    #[serde(rename = "type")]
    pub event_type: String,
    pub category: String,
    /// RFC 3339; defaults to ingestion time when the upstream omits it.
    pub timestamp: String,
    pub display_state: String,
    pub subtype: String,
    pub raw_subtype: String,
    /// Free-form event payload mapping.
    pub payload: Map<String, Value>,
    /// The complete upstream payload, kept for debugging and analysis.
    pub raw_payload: Map<String, Value>,
    /// Device-type metadata object, `null` when absent.
    pub device_type: Value,
    /// Precedence-resolved image reference (URL or embedded data).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    /// Whether this event is relevant to the alarm-zone UI affordance.
    pub is_alarm_zone_event: bool,
}
