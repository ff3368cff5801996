//! Event store abstraction.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::OutboxError;
use crate::event::{Event, NewEvent};

/// A transactional, append-only event log.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Opens a new transaction against the store.
    async fn begin(&self) -> Result<Box<dyn EventTransaction>, OutboxError>;
}

/// One open transaction on an [`EventStore`].
///
/// Dropping a transaction without calling [`commit`](Self::commit) rolls it
/// back and releases every claimed row.
#[async_trait]
pub trait EventTransaction: Send {
    /// Inserts a new event. It becomes visible to other transactions only when
    /// this one commits, and a notification is emitted at that point.
    ///
    /// # Errors
    ///
    /// Returns `OutboxError::DuplicateId` if an event with the same id exists.
    async fn append(&mut self, event: &NewEvent) -> Result<(), OutboxError>;

    /// Claims up to `limit` unprocessed events, oldest first (best effort).
    /// Rows locked by another open transaction are skipped, never waited on.
    async fn claim_unprocessed(&mut self, limit: usize) -> Result<Vec<Event>, OutboxError>;

    /// Flags a claimed event as processed.
    ///
    /// # Errors
    ///
    /// Returns `OutboxError::NotFound` if the event does not exist or is
    /// already processed.
    async fn mark_processed(&mut self, id: Uuid) -> Result<(), OutboxError>;

    /// Commits every change made in this transaction.
    async fn commit(self: Box<Self>) -> Result<(), OutboxError>;

    /// Discards every change made in this transaction.
    async fn rollback(self: Box<Self>) -> Result<(), OutboxError>;
}
