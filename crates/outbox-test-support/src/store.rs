//! In-memory event store with the same visibility and locking rules as the
//! PostgreSQL store: appends are visible only after commit, claims take
//! per-row locks and skip rows locked by other transactions, and a commit
//! that appended anything fires one notification.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use outbox_core::clock::{Clock, SystemClock};
use outbox_core::error::OutboxError;
use outbox_core::event::{Event, NewEvent};
use outbox_core::notification::{NotificationSubscriber, Subscription};
use outbox_core::store::{EventStore, EventTransaction};
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Log {
    rows: Vec<Event>,
    /// Row id → owning transaction id.
    locks: HashMap<Uuid, u64>,
    next_tx: u64,
}

impl Log {
    fn release(&mut self, tx_id: u64) {
        self.locks.retain(|_, owner| *owner != tx_id);
    }
}

struct Shared {
    log: Mutex<Log>,
    clock: Arc<dyn Clock>,
    notifications: broadcast::Sender<()>,
    notifications_enabled: AtomicBool,
    fail_commits: AtomicBool,
    /// Bumped to force every live subscription to fail.
    generation: AtomicU64,
}

/// An in-memory [`EventStore`].
///
/// Cloning is cheap; clones share the same log.
#[derive(Clone)]
pub struct InMemoryEventStore {
    shared: Arc<Shared>,
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventStore {
    /// Creates an empty store stamped by the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty store stamped by `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let (notifications, _) = broadcast::channel(16);
        Self {
            shared: Arc::new(Shared {
                log: Mutex::new(Log::default()),
                clock,
                notifications,
                notifications_enabled: AtomicBool::new(true),
                fail_commits: AtomicBool::new(false),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Opens a transaction without boxing it.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn begin_in_memory(&self) -> InMemoryTransaction {
        let mut log = self.lock();
        log.next_tx += 1;
        InMemoryTransaction {
            id: log.next_tx,
            store: self.clone(),
            pending: Vec::new(),
            marked: HashSet::new(),
            finished: false,
        }
    }

    /// Appends `events` in one committed producer transaction.
    ///
    /// # Errors
    ///
    /// Returns `OutboxError::DuplicateId` if any id already exists; nothing is
    /// appended in that case.
    pub async fn append_committed(&self, events: &[NewEvent]) -> Result<(), OutboxError> {
        let mut tx = self.begin_in_memory();
        for event in events {
            tx.append(event).await?;
        }
        Box::new(tx).commit().await
    }

    /// Returns a snapshot of every committed row in insertion order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.lock().rows.clone()
    }

    /// Returns the ids of committed rows that are not processed yet.
    #[must_use]
    pub fn unprocessed_ids(&self) -> Vec<Uuid> {
        self.events()
            .into_iter()
            .filter(|e| !e.processed)
            .map(|e| e.id)
            .collect()
    }

    /// Returns `true` if the committed row `id` is processed.
    #[must_use]
    pub fn is_processed(&self, id: Uuid) -> bool {
        self.events().iter().any(|e| e.id == id && e.processed)
    }

    /// Returns the number of rows currently locked by open transactions.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn locked_count(&self) -> usize {
        self.lock().locks.len()
    }

    /// Enables or disables commit notifications. Disabled notifications are
    /// dropped, not queued.
    pub fn set_notifications_enabled(&self, enabled: bool) {
        self.shared
            .notifications_enabled
            .store(enabled, Ordering::SeqCst);
    }

    /// Makes every subsequent commit fail (and roll back) until reset.
    pub fn set_fail_commits(&self, fail: bool) {
        self.shared.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Fails every live subscription, as a dropped database connection would.
    pub fn disconnect_subscribers(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        let _ = self.shared.notifications.send(());
    }

    /// Returns a notification subscriber bound to this store.
    #[must_use]
    pub fn subscriber(&self) -> InMemorySubscriber {
        InMemorySubscriber {
            store: self.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Log> {
        self.shared.log.lock().unwrap()
    }

    fn notify_commit(&self) {
        if self.shared.notifications_enabled.load(Ordering::SeqCst) {
            // No receivers is fine: the notification is dropped.
            let _ = self.shared.notifications.send(());
        }
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn begin(&self) -> Result<Box<dyn EventTransaction>, OutboxError> {
        Ok(Box::new(self.begin_in_memory()))
    }
}

/// An open transaction on an [`InMemoryEventStore`].
pub struct InMemoryTransaction {
    id: u64,
    store: InMemoryEventStore,
    pending: Vec<Event>,
    marked: HashSet<Uuid>,
    finished: bool,
}

impl InMemoryTransaction {
    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            if let Ok(mut log) = self.store.shared.log.lock() {
                log.release(self.id);
            }
        }
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        self.finish();
    }
}

#[async_trait]
impl EventTransaction for InMemoryTransaction {
    async fn append(&mut self, event: &NewEvent) -> Result<(), OutboxError> {
        let exists = {
            let log = self.store.lock();
            log.rows.iter().any(|e| e.id == event.id)
        } || self.pending.iter().any(|e| e.id == event.id);
        if exists {
            return Err(OutboxError::DuplicateId(event.id));
        }
        let now = self.store.shared.clock.now();
        self.pending.push(Event::inserted(event.clone(), now));
        Ok(())
    }

    async fn claim_unprocessed(&mut self, limit: usize) -> Result<Vec<Event>, OutboxError> {
        let mut claimed = Vec::new();
        {
            let mut log = self.store.lock();
            let Log { rows, locks, .. } = &mut *log;
            for row in rows.iter() {
                if claimed.len() == limit {
                    break;
                }
                if row.processed || self.marked.contains(&row.id) {
                    continue;
                }
                match locks.get(&row.id).copied() {
                    Some(owner) if owner != self.id => continue,
                    _ => {
                        locks.insert(row.id, self.id);
                        claimed.push(row.clone());
                    }
                }
            }
        }
        for row in &self.pending {
            if claimed.len() == limit {
                break;
            }
            if !self.marked.contains(&row.id) {
                claimed.push(row.clone());
            }
        }
        Ok(claimed)
    }

    async fn mark_processed(&mut self, id: Uuid) -> Result<(), OutboxError> {
        if self.marked.contains(&id) {
            return Err(OutboxError::NotFound(id));
        }
        if self.pending.iter().any(|e| e.id == id) {
            self.marked.insert(id);
            return Ok(());
        }
        let mut log = self.store.lock();
        let Some(row) = log.rows.iter().find(|e| e.id == id) else {
            return Err(OutboxError::NotFound(id));
        };
        if row.processed {
            return Err(OutboxError::NotFound(id));
        }
        match log.locks.get(&id).copied() {
            Some(owner) if owner != self.id => Err(OutboxError::NotFound(id)),
            _ => {
                log.locks.insert(id, self.id);
                self.marked.insert(id);
                Ok(())
            }
        }
    }

    async fn commit(mut self: Box<Self>) -> Result<(), OutboxError> {
        if self.store.shared.fail_commits.load(Ordering::SeqCst) {
            self.finish();
            return Err(OutboxError::Store("commit failed".into()));
        }
        let appended = !self.pending.is_empty();
        {
            let mut log = self.store.lock();
            if let Some(dup) = self
                .pending
                .iter()
                .find(|p| log.rows.iter().any(|e| e.id == p.id))
            {
                let id = dup.id;
                drop(log);
                self.finish();
                return Err(OutboxError::DuplicateId(id));
            }
            let marked = std::mem::take(&mut self.marked);
            let mut pending = std::mem::take(&mut self.pending);
            for row in &mut pending {
                if marked.contains(&row.id) {
                    row.processed = true;
                }
            }
            for row in &mut log.rows {
                if marked.contains(&row.id) {
                    row.processed = true;
                }
            }
            log.rows.extend(pending);
            log.release(self.id);
            self.finished = true;
        }
        if appended {
            self.store.notify_commit();
        }
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), OutboxError> {
        self.finish();
        Ok(())
    }
}

/// Notification subscriber for an [`InMemoryEventStore`].
#[derive(Clone)]
pub struct InMemorySubscriber {
    store: InMemoryEventStore,
}

#[async_trait]
impl NotificationSubscriber for InMemorySubscriber {
    async fn subscribe(&self) -> Result<Box<dyn Subscription>, OutboxError> {
        Ok(Box::new(InMemorySubscription {
            receiver: self.store.shared.notifications.subscribe(),
            generation: self.store.shared.generation.load(Ordering::SeqCst),
            store: self.store.clone(),
        }))
    }
}

struct InMemorySubscription {
    receiver: broadcast::Receiver<()>,
    generation: u64,
    store: InMemoryEventStore,
}

impl InMemorySubscription {
    fn is_stale(&self) -> bool {
        self.store.shared.generation.load(Ordering::SeqCst) != self.generation
    }
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn recv(&mut self) -> Result<(), OutboxError> {
        if self.is_stale() {
            return Err(OutboxError::Notification("connection lost".into()));
        }
        match self.receiver.recv().await {
            Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) if !self.is_stale() => Ok(()),
            Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                Err(OutboxError::Notification("connection lost".into()))
            }
            Err(broadcast::error::RecvError::Closed) => {
                Err(OutboxError::Notification("channel closed".into()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(aggregate: &str) -> NewEvent {
        NewEvent::new(aggregate, "contract-created", b"{}".to_vec())
    }

    #[tokio::test]
    async fn test_uncommitted_append_is_invisible_to_other_transactions() {
        let store = InMemoryEventStore::new();
        let mut producer = store.begin_in_memory();
        producer.append(&event("c-1")).await.unwrap();

        let mut relay = store.begin_in_memory();
        let claimed = relay.claim_unprocessed(10).await.unwrap();

        assert!(claimed.is_empty());
        Box::new(producer).commit().await.unwrap();
        assert_eq!(relay.claim_unprocessed(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_claim_skips_rows_locked_by_another_transaction() {
        let store = InMemoryEventStore::new();
        store
            .append_committed(&[event("c-1"), event("c-2"), event("c-3")])
            .await
            .unwrap();

        let mut first = store.begin_in_memory();
        let mut second = store.begin_in_memory();
        let a = first.claim_unprocessed(2).await.unwrap();
        let b = second.claim_unprocessed(2).await.unwrap();

        assert_eq!(a.len(), 2);
        assert_eq!(b.len(), 1);
        assert!(a.iter().all(|x| b.iter().all(|y| x.id != y.id)));
    }

    #[tokio::test]
    async fn test_dropped_transaction_releases_claims() {
        let store = InMemoryEventStore::new();
        store.append_committed(&[event("c-1")]).await.unwrap();

        {
            let mut tx = store.begin_in_memory();
            assert_eq!(tx.claim_unprocessed(10).await.unwrap().len(), 1);
            assert_eq!(store.locked_count(), 1);
        }

        assert_eq!(store.locked_count(), 0);
        let mut tx = store.begin_in_memory();
        assert_eq!(tx.claim_unprocessed(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mark_processed_twice_is_not_found() {
        let store = InMemoryEventStore::new();
        let e = event("c-1");
        store.append_committed(std::slice::from_ref(&e)).await.unwrap();

        let mut tx = store.begin_in_memory();
        tx.claim_unprocessed(10).await.unwrap();
        tx.mark_processed(e.id).await.unwrap();
        let second = tx.mark_processed(e.id).await;

        assert!(matches!(second, Err(OutboxError::NotFound(id)) if id == e.id));
    }

    #[tokio::test]
    async fn test_mark_processed_unknown_id_is_not_found() {
        let store = InMemoryEventStore::new();
        let mut tx = store.begin_in_memory();

        let result = tx.mark_processed(Uuid::new_v4()).await;

        assert!(matches!(result, Err(OutboxError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_duplicate_id_fails_whole_producer_transaction() {
        let store = InMemoryEventStore::new();
        let e = event("c-1");
        store.append_committed(std::slice::from_ref(&e)).await.unwrap();

        let other = event("c-2");
        let result = store
            .append_committed(&[other.clone(), e.clone()])
            .await;

        assert!(matches!(result, Err(OutboxError::DuplicateId(id)) if id == e.id));
        assert_eq!(store.events().len(), 1);
        assert!(store.events().iter().all(|row| row.id != other.id));
    }

    #[tokio::test]
    async fn test_commit_with_append_notifies_subscribers_once() {
        let store = InMemoryEventStore::new();
        let mut subscription = store.subscriber().subscribe().await.unwrap();

        store
            .append_committed(&[event("c-1"), event("c-2")])
            .await
            .unwrap();

        subscription.recv().await.unwrap();
        let again =
            tokio::time::timeout(std::time::Duration::from_millis(20), subscription.recv()).await;
        assert!(again.is_err());
    }

    #[tokio::test]
    async fn test_disconnect_fails_live_subscriptions() {
        let store = InMemoryEventStore::new();
        let mut subscription = store.subscriber().subscribe().await.unwrap();

        store.disconnect_subscribers();

        assert!(matches!(
            subscription.recv().await,
            Err(OutboxError::Notification(_))
        ));
        let mut fresh = store.subscriber().subscribe().await.unwrap();
        store.append_committed(&[event("c-1")]).await.unwrap();
        fresh.recv().await.unwrap();
    }
}
