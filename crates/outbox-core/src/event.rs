//! Outbox event model.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::OutboxError;

/// An event as handed to the store by a producer.
///
/// The timestamp and processed flag are assigned by the store on insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    /// Unique, time-ordered event identifier.
    pub id: Uuid,
    /// The domain entity this event is about.
    pub aggregate_id: String,
    /// Event type tag, e.g. `contract-created`.
    pub event_type: String,
    /// Opaque payload bytes.
    pub payload: Vec<u8>,
}

impl NewEvent {
    /// Creates a new event with a fresh UUIDv7 identifier.
    #[must_use]
    pub fn new(
        aggregate_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            aggregate_id: aggregate_id.into(),
            event_type: event_type.into(),
            payload: payload.into(),
        }
    }

    /// Creates a new event whose payload is the JSON encoding of `data`.
    ///
    /// # Errors
    ///
    /// Returns `OutboxError::Serialization` if `data` cannot be encoded.
    pub fn json<T: Serialize>(
        aggregate_id: impl Into<String>,
        event_type: impl Into<String>,
        data: &T,
    ) -> Result<Self, OutboxError> {
        let payload = serde_json::to_vec(data)?;
        Ok(Self::new(aggregate_id, event_type, payload))
    }

    /// Replaces the generated identifier.
    #[must_use]
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }
}

/// A stored outbox row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Unique event identifier.
    pub id: Uuid,
    /// The domain entity this event is about.
    pub aggregate_id: String,
    /// Event type tag.
    pub event_type: String,
    /// Insert time, UTC.
    pub timestamp: DateTime<Utc>,
    /// Whether the event has been published and marked.
    pub processed: bool,
    /// Opaque payload bytes.
    pub payload: Vec<u8>,
}

impl Event {
    /// Materializes a freshly inserted row from a `NewEvent`.
    #[must_use]
    pub fn inserted(event: NewEvent, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: event.id,
            aggregate_id: event.aggregate_id,
            event_type: event.event_type,
            timestamp,
            processed: false,
            payload: event.payload,
        }
    }
}
