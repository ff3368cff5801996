//! The relay: claim, publish, mark, commit.
//!
//! ```text
//!            notification ─┐
//!                          ├──▶ Idle ──▶ Draining ──▶ Idle
//!            poll tick ────┘                │
//!                                           ▼
//!              BEGIN; claim ≤ batch (SKIP LOCKED); for each: publish, mark;
//!              COMMIT once, or ROLLBACK on the first failure
//! ```
//!
//! Cancellation ends the loop in `Terminated`. A cancelled cycle drops its
//! transaction, which rolls it back.

use std::future::Future;
use std::sync::Arc;

use outbox_core::envelope::Envelope;
use outbox_core::error::OutboxError;
use outbox_core::publisher::Publisher;
use outbox_core::store::{EventStore, EventTransaction};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigError, RelayConfig};
use crate::metrics::RelayMetrics;
use crate::poller::Poller;
use crate::wake::{WakeReason, WakeReceiver};

/// Observable relay state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// Waiting for a notification or a poll tick.
    Idle,
    /// Running a drain cycle.
    Draining,
    /// Stopped after cancellation.
    Terminated,
}

/// Outcome of one committed drain cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Events claimed by the cycle.
    pub claimed: usize,
    /// Events published and marked processed.
    pub published: usize,
}

/// Moves committed events from an [`EventStore`] to a [`Publisher`].
pub struct Relay {
    store: Arc<dyn EventStore>,
    publisher: Arc<dyn Publisher>,
    config: RelayConfig,
    metrics: Arc<RelayMetrics>,
    state: watch::Sender<RelayState>,
}

impl Relay {
    /// Creates an idle relay.
    ///
    /// # Errors
    ///
    /// Returns the [`ConfigError`] reported by [`RelayConfig::validate`].
    pub fn new(
        store: Arc<dyn EventStore>,
        publisher: Arc<dyn Publisher>,
        config: RelayConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let (state, _) = watch::channel(RelayState::Idle);
        Ok(Self {
            store,
            publisher,
            config,
            metrics: Arc::new(RelayMetrics::default()),
            state,
        })
    }

    /// Returns the relay configuration.
    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Returns the relay counters.
    #[must_use]
    pub fn metrics(&self) -> Arc<RelayMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Subscribes to state transitions.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<RelayState> {
        self.state.subscribe()
    }

    /// Runs until `cancel` fires.
    ///
    /// `wakes` carries commit notifications (see
    /// [`spawn_listener`](crate::spawn_listener)); pass `None`, or let the
    /// senders drop, to rely on polling alone. Errors from individual cycles
    /// are logged and retried on the next wake.
    pub async fn run(&self, mut wakes: Option<WakeReceiver>, cancel: CancellationToken) {
        let mut poller = Poller::new(self.config.poll_interval);
        tracing::info!(
            channel = %self.config.channel,
            batch_size = self.config.batch_size,
            poll_interval_ms = u64::try_from(self.config.poll_interval.as_millis()).unwrap_or(u64::MAX),
            notifications = wakes.is_some(),
            "Starting outbox relay"
        );

        loop {
            let reason = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                wake = next_wake(&mut wakes) => {
                    if wake.is_none() {
                        tracing::warn!("Notification stream closed, relying on polling");
                        wakes = None;
                        continue;
                    }
                    WakeReason::Notification
                }
                () = poller.tick() => WakeReason::Poll,
            };
            self.metrics.record_wake(reason);
            tracing::trace!(?reason, "Relay woken");
            self.drain_backlog(&cancel).await;
        }

        self.state.send_replace(RelayState::Terminated);
        tracing::info!("Outbox relay terminated");
    }

    /// Runs drain cycles until one claims less than a full batch, so that a
    /// backlog does not wait a poll interval per batch.
    async fn drain_backlog(&self, cancel: &CancellationToken) {
        loop {
            match self.drain_once(cancel).await {
                Ok(report) if report.claimed > 0 && report.claimed == self.config.batch_size => {
                    tracing::debug!(published = report.published, "Full batch, draining again");
                    // Let the canceller and other relays run between batches.
                    tokio::task::yield_now().await;
                }
                Ok(report) => {
                    if report.published > 0 {
                        tracing::info!(count = report.published, "Published events");
                    }
                    return;
                }
                Err(OutboxError::Cancelled) => return,
                Err(e) if e.is_consistency_violation() => {
                    tracing::error!(
                        error = %e,
                        "Claimed event could not be marked processed; batch rolled back"
                    );
                    return;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Drain cycle aborted; batch rolled back for retry");
                    return;
                }
            }
        }
    }

    /// Runs exactly one drain cycle in one transaction.
    ///
    /// # Errors
    ///
    /// Returns `OutboxError::Cancelled` if `cancel` fires first, or the store
    /// or publisher error that aborted the cycle. In every error case nothing
    /// was committed.
    pub async fn drain_once(&self, cancel: &CancellationToken) -> Result<DrainReport, OutboxError> {
        if cancel.is_cancelled() {
            return Err(OutboxError::Cancelled);
        }
        self.state.send_replace(RelayState::Draining);
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(OutboxError::Cancelled),
            result = self.drain_cycle() => result,
        };
        self.state.send_replace(RelayState::Idle);
        self.metrics.record_cycle(&result);
        result
    }

    async fn drain_cycle(&self) -> Result<DrainReport, OutboxError> {
        let mut tx = self.store_call(self.store.begin()).await?;
        match self.publish_batch(tx.as_mut()).await {
            Ok(report) => {
                self.store_call(tx.commit()).await.inspect_err(|e| {
                    if report.published > 0 {
                        tracing::warn!(
                            error = %e,
                            count = report.published,
                            "Commit failed after publishing; events will be published again"
                        );
                    }
                })?;
                Ok(report)
            }
            Err(e) => {
                if let Err(rollback_error) = self.store_call(tx.rollback()).await {
                    tracing::warn!(error = %rollback_error, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn publish_batch(
        &self,
        tx: &mut dyn EventTransaction,
    ) -> Result<DrainReport, OutboxError> {
        let events = self
            .store_call(tx.claim_unprocessed(self.config.batch_size))
            .await?;
        let mut report = DrainReport {
            claimed: events.len(),
            published: 0,
        };
        if events.is_empty() {
            return Ok(report);
        }
        tracing::debug!(count = events.len(), "Claimed events");

        for event in &events {
            let envelope = Envelope::from(event).to_bytes()?;
            tokio::time::timeout(self.config.publish_timeout, self.publisher.publish(&envelope))
                .await
                .map_err(|_| OutboxError::PublishTimeout)
                .and_then(|published| published)
                .inspect_err(|e| {
                    tracing::warn!(
                        event_id = %event.id,
                        event_type = %event.event_type,
                        error = %e,
                        "Publish failed"
                    );
                })?;
            self.store_call(tx.mark_processed(event.id)).await?;
            report.published += 1;
            tracing::debug!(
                event_id = %event.id,
                aggregate_id = %event.aggregate_id,
                event_type = %event.event_type,
                "Event published"
            );
        }
        Ok(report)
    }

    async fn store_call<T>(
        &self,
        call: impl Future<Output = Result<T, OutboxError>>,
    ) -> Result<T, OutboxError> {
        tokio::time::timeout(self.config.store_timeout, call)
            .await
            .map_err(|_| OutboxError::StoreTimeout)?
    }
}

async fn next_wake(wakes: &mut Option<WakeReceiver>) -> Option<()> {
    match wakes {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}
