//! Wire envelope published for every outbox event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::OutboxError;
use crate::event::Event;

/// JSON message handed to the publisher, one per event.
///
/// `data` carries the opaque payload as standard base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event identifier.
    pub id: String,
    /// Aggregate the event is about.
    pub aggregate_id: String,
    /// Event type tag.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Insert time, UTC.
    pub tstamp: DateTime<Utc>,
    /// Opaque payload.
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl Envelope {
    /// Encodes the envelope as JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns `OutboxError::Serialization` if encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, OutboxError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes an envelope from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns `OutboxError::Serialization` if the bytes are not a valid
    /// envelope.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, OutboxError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl From<&Event> for Envelope {
    fn from(event: &Event) -> Self {
        Self {
            id: event.id.to_string(),
            aggregate_id: event.aggregate_id.clone(),
            event_type: event.event_type.clone(),
            tstamp: event.timestamp,
            data: event.payload.clone(),
        }
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use uuid::Uuid;

    use super::*;

    fn make_event() -> Event {
        Event {
            id: Uuid::now_v7(),
            aggregate_id: "contract-42".to_string(),
            event_type: "contract-created".to_string(),
            timestamp: Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap(),
            processed: false,
            payload: br#"{"title": "hello"}"#.to_vec(),
        }
    }

    #[test]
    fn test_envelope_json_field_names() {
        let event = make_event();

        let bytes = Envelope::from(&event).to_bytes().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(json["id"], event.id.to_string());
        assert_eq!(json["aggregate_id"], "contract-42");
        assert_eq!(json["type"], "contract-created");
        assert_eq!(json["tstamp"], "2026-01-15T10:00:00Z");
        assert_eq!(json["data"], "eyJ0aXRsZSI6ICJoZWxsbyJ9");
        assert_eq!(json.as_object().unwrap().len(), 5);
    }

    #[test]
    fn test_from_bytes_restores_payload() {
        let event = make_event();
        let bytes = Envelope::from(&event).to_bytes().unwrap();

        let decoded = Envelope::from_bytes(&bytes).unwrap();

        assert_eq!(decoded.data, event.payload);
        assert_eq!(decoded.tstamp, event.timestamp);
    }

    #[test]
    fn test_from_bytes_rejects_invalid_base64() {
        let bytes = br#"{"id":"x","aggregate_id":"a","type":"t","tstamp":"2026-01-15T10:00:00Z","data":"%%%"}"#;

        let result = Envelope::from_bytes(bytes);

        assert!(matches!(result, Err(OutboxError::Serialization(_))));
    }
}
