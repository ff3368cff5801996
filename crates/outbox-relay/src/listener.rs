//! Background task turning commit notifications into relay wakes.
//!
//! When the subscription is lost the task resubscribes with exponential
//! backoff until either it succeeds or the [`CancellationToken`] fires.
//! Meanwhile the poller alone keeps the relay live.

use std::sync::Arc;
use std::time::Duration;

use outbox_core::notification::NotificationSubscriber;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::wake::WakeSender;

/// Resubscribe delays: `initial_delay` doubled per consecutive failure, capped
/// at `max_delay`, then spread by up to `jitter` in either direction.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first resubscribe attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay before jitter.
    pub max_delay: Duration,
    /// Fraction of the delay added or removed at random, in `0.0..1.0`.
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: 0.1,
        }
    }
}

impl BackoffConfig {
    /// Returns the delay to wait after `failures` consecutive failed
    /// attempts, counting from zero.
    #[must_use]
    pub fn delay_for(&self, failures: u32) -> Duration {
        let delay = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(failures))
            .min(self.max_delay);
        if self.jitter <= 0.0 {
            return delay;
        }
        let spread = rand::rng().random_range(-self.jitter..=self.jitter);
        delay.mul_f64(1.0 + spread)
    }
}

/// Spawns the notification listener.
///
/// Every notification becomes one wake on `wakes`. A wake is also sent right
/// after each successful (re)subscription because commits made while
/// unsubscribed were never announced. The task ends when `cancel` fires or the
/// relay drops its [`WakeReceiver`](crate::WakeReceiver).
pub fn spawn_listener(
    subscriber: Arc<dyn NotificationSubscriber>,
    wakes: WakeSender,
    backoff: BackoffConfig,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move { listen(subscriber.as_ref(), &wakes, &backoff, &cancel).await })
}

async fn listen(
    subscriber: &dyn NotificationSubscriber,
    wakes: &WakeSender,
    backoff: &BackoffConfig,
    cancel: &CancellationToken,
) {
    let mut failures = 0u32;

    loop {
        let subscription = tokio::select! {
            () = cancel.cancelled() => return,
            result = subscriber.subscribe() => result,
        };

        match subscription {
            Ok(mut subscription) => {
                tracing::info!(attempt = failures.saturating_add(1), "Subscribed to commit notifications");
                failures = 0;
                if !wakes.wake() {
                    return;
                }
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => {
                            tracing::info!("Notification listener cancelled");
                            return;
                        }
                        result = subscription.recv() => match result {
                            Ok(()) => {
                                tracing::trace!("Commit notification received");
                                if !wakes.wake() {
                                    tracing::debug!("Relay stopped, notification listener exiting");
                                    return;
                                }
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Notification subscription lost, resubscribing");
                                break;
                            }
                        }
                    }
                }
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                tracing::warn!(error = %e, attempt = failures, "Subscribe attempt failed");
            }
        }

        let delay = backoff.delay_for(failures.saturating_sub(1));
        tracing::debug!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Waiting before resubscribing"
        );
        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use outbox_core::error::OutboxError;
    use outbox_core::event::NewEvent;
    use outbox_core::notification::Subscription;
    use outbox_test_support::InMemoryEventStore;

    use super::*;
    use crate::wake::wake_channel;

    fn exact_backoff() -> BackoffConfig {
        BackoffConfig {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(3),
            jitter: 0.0,
        }
    }

    #[test]
    fn test_delay_doubles_per_failure_until_capped() {
        let backoff = exact_backoff();

        let delays: Vec<_> = (0..5).map(|n| backoff.delay_for(n)).collect();

        assert_eq!(
            delays,
            vec![
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(3),
                Duration::from_secs(3),
            ]
        );
    }

    #[test]
    fn test_delay_stays_capped_after_many_failures() {
        assert_eq!(exact_backoff().delay_for(u32::MAX), Duration::from_secs(3));
    }

    #[test]
    fn test_jittered_delay_stays_within_spread() {
        let backoff = BackoffConfig {
            jitter: 0.2,
            ..exact_backoff()
        };

        for _ in 0..100 {
            let delay = backoff.delay_for(1);
            assert!(delay >= Duration::from_millis(799), "{delay:?} below spread");
            assert!(delay <= Duration::from_millis(1201), "{delay:?} above spread");
        }
    }

    /// A subscriber that is unreachable for its first `failures` attempts.
    struct FlakySubscriber {
        failures: usize,
        attempts: AtomicUsize,
        store: InMemoryEventStore,
    }

    #[async_trait]
    impl NotificationSubscriber for FlakySubscriber {
        async fn subscribe(&self) -> Result<Box<dyn Subscription>, OutboxError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.failures {
                return Err(OutboxError::Notification("connection refused".into()));
            }
            self.store.subscriber().subscribe().await
        }
    }

    fn fast_backoff() -> BackoffConfig {
        BackoffConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            jitter: 0.0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_listener_wakes_after_subscribing() {
        let store = InMemoryEventStore::new();
        let (tx, mut rx) = wake_channel();
        let cancel = CancellationToken::new();

        let handle = spawn_listener(
            Arc::new(store.subscriber()),
            tx,
            fast_backoff(),
            cancel.clone(),
        );

        assert_eq!(rx.recv().await, Some(()));
        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_listener_forwards_commit_notifications() {
        let store = InMemoryEventStore::new();
        let (tx, mut rx) = wake_channel();
        let cancel = CancellationToken::new();
        let handle = spawn_listener(
            Arc::new(store.subscriber()),
            tx,
            fast_backoff(),
            cancel.clone(),
        );
        rx.recv().await.unwrap();

        store
            .append_committed(&[NewEvent::new("c-1", "contract-created", Vec::new())])
            .await
            .unwrap();

        assert_eq!(rx.recv().await, Some(()));
        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_listener_retries_failed_subscribe() {
        let store = InMemoryEventStore::new();
        let subscriber = Arc::new(FlakySubscriber {
            failures: 3,
            attempts: AtomicUsize::new(0),
            store,
        });
        let (tx, mut rx) = wake_channel();
        let cancel = CancellationToken::new();

        let handle = spawn_listener(subscriber.clone(), tx, fast_backoff(), cancel.clone());

        assert_eq!(rx.recv().await, Some(()));
        assert_eq!(subscriber.attempts.load(Ordering::SeqCst), 4);
        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_listener_resubscribes_after_disconnect() {
        let store = InMemoryEventStore::new();
        let (tx, mut rx) = wake_channel();
        let cancel = CancellationToken::new();
        let handle = spawn_listener(
            Arc::new(store.subscriber()),
            tx,
            fast_backoff(),
            cancel.clone(),
        );
        rx.recv().await.unwrap();

        store.disconnect_subscribers();

        // The resubscribe itself wakes the relay.
        assert_eq!(rx.recv().await, Some(()));
        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_listener_exits_when_relay_is_gone() {
        let store = InMemoryEventStore::new();
        let (tx, rx) = wake_channel();
        drop(rx);

        let handle = spawn_listener(
            Arc::new(store.subscriber()),
            tx,
            fast_backoff(),
            CancellationToken::new(),
        );

        handle.await.unwrap();
    }
}
