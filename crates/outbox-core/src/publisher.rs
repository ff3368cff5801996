//! Publisher abstraction.

use async_trait::async_trait;

use crate::error::OutboxError;

/// Synchronous sink for serialized envelopes.
///
/// The relay may publish the same envelope more than once (a crash between
/// publish and commit re-publishes the batch), so downstream consumers must
/// be idempotent. Cancellation is expressed by dropping the returned future.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publishes one envelope.
    ///
    /// # Errors
    ///
    /// Returns `OutboxError::Publish` if the sink rejects the message.
    async fn publish(&self, envelope: &[u8]) -> Result<(), OutboxError>;
}
