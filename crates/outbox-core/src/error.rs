//! Outbox error types.

use thiserror::Error;
use uuid::Uuid;

/// Top-level error type shared by stores, publishers and the relay.
#[derive(Debug, Error)]
pub enum OutboxError {
    /// An event with the same identifier already exists.
    #[error("duplicate event id: {0}")]
    DuplicateId(Uuid),

    /// The event does not exist or has already been processed.
    #[error("event not found or already processed: {0}")]
    NotFound(Uuid),

    /// A store round trip failed (connection drop, lock timeout, ...).
    #[error("store error: {0}")]
    Store(String),

    /// A store round trip did not complete in time.
    #[error("store operation timed out")]
    StoreTimeout,

    /// The publisher rejected the envelope.
    #[error("publish error: {0}")]
    Publish(String),

    /// The publisher did not answer in time.
    #[error("publish timed out")]
    PublishTimeout,

    /// The notification subscription failed or was lost.
    #[error("notification error: {0}")]
    Notification(String),

    /// An envelope could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The operation was interrupted by cancellation.
    #[error("operation cancelled")]
    Cancelled,
}

impl OutboxError {
    /// Returns `true` when marking an event failed even though it was claimed
    /// in the same transaction. This never happens under correct usage.
    #[must_use]
    pub fn is_consistency_violation(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
