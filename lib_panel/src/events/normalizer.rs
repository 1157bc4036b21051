//! # Event Normalizer
//!
//! Maps heterogeneous upstream payload shapes into one [`CanonicalEvent`]
//! record. The upstream emits different field sets per event kind, so every
//! logical attribute is extracted through an ordered candidate list rather
//! than scattered ad-hoc probing. Normalization is total: it never fails
//! and every field has a default or an "absent" representation.

use chrono::Utc;
use serde_json::{Map, Value};

use super::model::{CanonicalEvent, RawFrame};

/// Keywords that mark an event type or category as alarm-zone relevant.
///
/// Matched case-insensitively as substrings. Intentionally permissive:
/// the flag drives a security-relevant UI affordance, so false positives
/// are acceptable and false negatives are not.
const ALARM_KEYWORDS: [&str; 9] = [
    "armed", "disarmed", "arm", "disarm", "trigger", "arming", "alarm", "security", "zone",
];

/// Image field candidates, highest precedence first (nested
/// `thumbnailData` is checked between `imageData` and `thumbnail`).
const IMAGE_FIELDS_HIGH: [&str; 2] = ["thumbnailUri", "imageData"];
const IMAGE_FIELDS_LOW: [&str; 2] = ["thumbnail", "imageUrl"];

/// Normalizes one raw frame into the canonical event record.
pub fn normalize(frame: &RawFrame) -> CanonicalEvent {
    let data = &frame.data;

    let event_type = event_type_of(frame);
    let category = first_str(data, &["category", "eventCategory"]).to_string();
    let display_state = first_str(data, &["displayState", "state"]).to_string();

    let timestamp = match first_str(data, &["timestamp", "time", "createdAt"]) {
        "" => Utc::now().to_rfc3339(),
        ts => ts.to_string(),
    };

    let payload = object_field(data, "payload");
    let caption = payload
        .get("caption")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| frame.extra.get("caption").cloned())
        .filter(|c| !c.is_empty());

    CanonicalEvent {
        organization_id: first_str(data, &["organizationId"]).to_string(),
        location_id: first_str(data, &["locationId"]).to_string(),
        space_id: first_str(data, &["spaceId"]).to_string(),
        device_id: first_str(data, &["deviceId"]).to_string(),
        device_name: first_str(data, &["deviceName"]).to_string(),
        connector_id: first_str(data, &["connectorId"]).to_string(),
        connector_name: first_str(data, &["connectorName"]).to_string(),
        connector_category: first_str(data, &["connectorCategory"]).to_string(),
        is_alarm_zone_event: is_alarm_zone(&event_type, &category, &display_state),
        event_type,
        category,
        timestamp,
        display_state,
        subtype: first_str(data, &["subtype", "eventSubtype"]).to_string(),
        raw_subtype: first_str(data, &["rawSubtype", "rawEventSubtype"]).to_string(),
        payload,
        raw_payload: data.clone(),
        device_type: data.get("deviceType").cloned().unwrap_or(Value::Null),
        image: resolve_image(data),
        caption,
    }
}

/// The event-type fallback chain: nested `event.type`, then `eventType`,
/// then `type`, then the wire-level frame hint, then `"unknown"`.
pub(crate) fn event_type_of(frame: &RawFrame) -> String {
    if let Some(t) = frame
        .data
        .get("event")
        .and_then(|e| e.get("type"))
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
    {
        return t.to_string();
    }
    match first_str(&frame.data, &["eventType", "type"]) {
        "" => frame
            .event
            .clone()
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| "unknown".to_string()),
        t => t.to_string(),
    }
}

/// Returns the first non-empty string among the candidate fields, or "".
fn first_str<'a>(data: &'a Map<String, Value>, keys: &[&str]) -> &'a str {
    keys.iter()
        .filter_map(|k| data.get(*k).and_then(Value::as_str))
        .find(|s| !s.is_empty())
        .unwrap_or("")
}

fn object_field(data: &Map<String, Value>, key: &str) -> Map<String, Value> {
    match data.get(key) {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    }
}

/// Resolves the event image by fixed field precedence: embedded thumbnail
/// URI, inline image data, nested thumbnail-data object, plain thumbnail,
/// plain image URL. Absence of all candidates is not an error.
fn resolve_image(data: &Map<String, Value>) -> Option<String> {
    for key in IMAGE_FIELDS_HIGH {
        if let Some(s) = data.get(key).and_then(Value::as_str).filter(|s| !s.is_empty()) {
            return Some(s.to_string());
        }
    }
    if let Some(nested) = data.get("thumbnailData") {
        for key in ["data", "uri"] {
            if let Some(s) = nested.get(key).and_then(Value::as_str).filter(|s| !s.is_empty()) {
                return Some(s.to_string());
            }
        }
    }
    for key in IMAGE_FIELDS_LOW {
        if let Some(s) = data.get(key).and_then(Value::as_str).filter(|s| !s.is_empty()) {
            return Some(s.to_string());
        }
    }
    None
}

/// Classifies whether an event is alarm-zone relevant.
///
/// Type/category match any alarm keyword as a substring. The display state
/// only counts when it begins with "arm" ("armed away", "arming"), so that
/// a state of "disarmed" or "alarm" alone does not trip the flag.
fn is_alarm_zone(event_type: &str, category: &str, display_state: &str) -> bool {
    let ty = event_type.to_lowercase();
    let cat = category.to_lowercase();
    if ALARM_KEYWORDS.iter().any(|k| ty.contains(k) || cat.contains(k)) {
        return true;
    }
    display_state.trim().to_lowercase().starts_with("arm")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::model::EventIdentity;
    use serde_json::json;

    fn frame_with(data: Value) -> RawFrame {
        match data {
            Value::Object(map) => RawFrame { event: None, data: map, ..Default::default() },
            _ => panic!("test data must be a JSON object"),
        }
    }

    #[test]
    fn test_totality_on_empty_frame() {
        let event = normalize(&RawFrame::default());
        assert_eq!(event.event_type, "unknown");
        assert!(!event.timestamp.is_empty());
        assert!(event.image.is_none());
        assert!(!event.is_alarm_zone_event);
    }

    #[test]
    fn test_event_type_fallback_chain() {
        let nested = frame_with(json!({"event": {"type": "doorbell"}, "eventType": "x"}));
        assert_eq!(normalize(&nested).event_type, "doorbell");

        let flat = frame_with(json!({"eventType": "motion"}));
        assert_eq!(normalize(&flat).event_type, "motion");

        let plain = frame_with(json!({"type": "contact"}));
        assert_eq!(normalize(&plain).event_type, "contact");

        let hinted = RawFrame { event: Some("status".to_string()), ..Default::default() };
        assert_eq!(normalize(&hinted).event_type, "status");
    }

    #[test]
    fn test_upstream_timestamp_is_preserved() {
        let frame = frame_with(json!({"timestamp": "2024-01-01T00:00:00Z"}));
        assert_eq!(normalize(&frame).timestamp, "2024-01-01T00:00:00Z");
    }

    #[test]
    fn test_image_precedence_thumbnail_uri_wins() {
        let frame = frame_with(json!({
            "thumbnailUri": "https://cam/thumb.jpg",
            "imageUrl": "https://cam/full.jpg"
        }));
        assert_eq!(normalize(&frame).image.as_deref(), Some("https://cam/thumb.jpg"));
    }

    #[test]
    fn test_image_nested_thumbnail_data() {
        let frame = frame_with(json!({
            "thumbnailData": {"data": "base64payload"},
            "imageUrl": "https://cam/full.jpg"
        }));
        assert_eq!(normalize(&frame).image.as_deref(), Some("base64payload"));
    }

    #[test]
    fn test_image_url_as_last_resort() {
        let frame = frame_with(json!({"imageUrl": "https://cam/full.jpg"}));
        assert_eq!(normalize(&frame).image.as_deref(), Some("https://cam/full.jpg"));
    }

    #[test]
    fn test_empty_image_fields_are_skipped() {
        let frame = frame_with(json!({"thumbnailUri": "", "imageUrl": "https://cam/full.jpg"}));
        assert_eq!(normalize(&frame).image.as_deref(), Some("https://cam/full.jpg"));
    }

    #[test]
    fn test_arming_type_is_alarm_zone_event() {
        let frame = frame_with(json!({"type": "Arming"}));
        assert!(normalize(&frame).is_alarm_zone_event);
    }

    #[test]
    fn test_zone_category_is_alarm_zone_event() {
        let frame = frame_with(json!({"type": "update", "category": "Zone Status"}));
        assert!(normalize(&frame).is_alarm_zone_event);
    }

    #[test]
    fn test_disarmed_display_state_is_not_alarm_zone_event() {
        let frame = frame_with(json!({"displayState": "disarmed"}));
        assert!(!normalize(&frame).is_alarm_zone_event);
    }

    #[test]
    fn test_armed_display_state_is_alarm_zone_event() {
        let frame = frame_with(json!({"displayState": "Armed Away"}));
        assert!(normalize(&frame).is_alarm_zone_event);
    }

    #[test]
    fn test_caption_prefers_payload_over_wire_field() {
        let mut frame = frame_with(json!({"payload": {"caption": "Front door"}}));
        frame.extra.insert("caption".to_string(), "wire caption".to_string());
        assert_eq!(normalize(&frame).caption.as_deref(), Some("Front door"));

        let mut bare = RawFrame::default();
        bare.extra.insert("caption".to_string(), "wire caption".to_string());
        assert_eq!(normalize(&bare).caption.as_deref(), Some("wire caption"));
    }

    #[test]
    fn test_identity_uses_device_fallback_and_token() {
        let a = frame_with(json!({
            "deviceId": "dev-1",
            "timestamp": "2024-01-01T00:00:00Z",
            "type": "motion",
            "eventId": "abc"
        }));
        let b = a.clone();
        assert_eq!(EventIdentity::from_frame(&a), EventIdentity::from_frame(&b));

        let named = frame_with(json!({"deviceName": "Porch"}));
        assert_eq!(EventIdentity::from_frame(&named).device, "Porch");
    }
}
