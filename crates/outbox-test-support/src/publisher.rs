//! Test publishers — fake `Publisher` implementations for tests.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use outbox_core::envelope::Envelope;
use outbox_core::error::OutboxError;
use outbox_core::publisher::Publisher;
use tokio::sync::Notify;

/// A publisher that records every attempt. Optionally fails on one specific
/// call (1-based), counted across the publisher's lifetime.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    fail_on_call: Option<usize>,
    attempts: Mutex<usize>,
    published: Mutex<Vec<Vec<u8>>>,
    notify: Notify,
}

impl RecordingPublisher {
    /// Creates a publisher that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a publisher that rejects its `call`-th attempt.
    #[must_use]
    pub fn failing_on(call: usize) -> Self {
        Self {
            fail_on_call: Some(call),
            ..Self::default()
        }
    }

    /// Returns the number of publish calls made, successful or not.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }

    /// Returns every successfully published envelope, in publish order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned or an envelope is malformed.
    pub fn envelopes(&self) -> Vec<Envelope> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|bytes| Envelope::from_bytes(bytes).unwrap())
            .collect()
    }

    /// Returns the ids of successfully published envelopes, in publish order.
    pub fn published_ids(&self) -> Vec<String> {
        self.envelopes().into_iter().map(|e| e.id).collect()
    }

    /// Waits until at least `count` envelopes have been published. Returns
    /// `false` if `timeout` elapses first.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.notify.notified();
                if self.published.lock().unwrap().len() >= count {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, envelope: &[u8]) -> Result<(), OutboxError> {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            *attempts += 1;
            *attempts
        };
        if self.fail_on_call == Some(attempt) {
            return Err(OutboxError::Publish(format!("broker rejected call {attempt}")));
        }
        self.published.lock().unwrap().push(envelope.to_vec());
        self.notify.notify_waiters();
        Ok(())
    }
}

/// A publisher that always fails. Useful for testing rollback paths.
#[derive(Debug)]
pub struct FailingPublisher;

#[async_trait]
impl Publisher for FailingPublisher {
    async fn publish(&self, _envelope: &[u8]) -> Result<(), OutboxError> {
        Err(OutboxError::Publish("broker unavailable".into()))
    }
}

/// A publisher whose calls never complete. Useful for testing timeouts and
/// cancellation.
#[derive(Debug)]
pub struct HangingPublisher;

#[async_trait]
impl Publisher for HangingPublisher {
    async fn publish(&self, _envelope: &[u8]) -> Result<(), OutboxError> {
        std::future::pending().await
    }
}
