//! Commit notification abstraction.
//!
//! Notifications are a latency hint only: they can be dropped, coalesced or
//! delayed, and carry no data the relay relies on.

use async_trait::async_trait;

use crate::error::OutboxError;

/// Source of commit notifications.
#[async_trait]
pub trait NotificationSubscriber: Send + Sync {
    /// Opens a new subscription. Notifications fired before this call are not
    /// delivered.
    async fn subscribe(&self) -> Result<Box<dyn Subscription>, OutboxError>;
}

/// A live subscription to commit notifications.
#[async_trait]
pub trait Subscription: Send {
    /// Waits for the next notification.
    ///
    /// # Errors
    ///
    /// Returns `OutboxError::Notification` once the subscription is lost; the
    /// caller must resubscribe.
    async fn recv(&mut self) -> Result<(), OutboxError>;
}
