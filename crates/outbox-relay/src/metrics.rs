//! Relay counters.

use std::sync::atomic::{AtomicU64, Ordering};

use outbox_core::error::OutboxError;

use crate::relay::DrainReport;
use crate::wake::WakeReason;

/// Counters updated by a running relay. Shared through an `Arc` so that they
/// can be read while the relay runs.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    cycles: AtomicU64,
    events_published: AtomicU64,
    rollbacks: AtomicU64,
    notification_wakes: AtomicU64,
    poll_wakes: AtomicU64,
}

/// Point-in-time copy of [`RelayMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Drain cycles started.
    pub cycles: u64,
    /// Events published in committed cycles.
    pub events_published: u64,
    /// Cycles aborted and rolled back.
    pub rollbacks: u64,
    /// Wakes caused by commit notifications.
    pub notification_wakes: u64,
    /// Wakes caused by the poller.
    pub poll_wakes: u64,
}

impl RelayMetrics {
    pub(crate) fn record_wake(&self, reason: WakeReason) {
        let counter = match reason {
            WakeReason::Notification => &self.notification_wakes,
            WakeReason::Poll => &self.poll_wakes,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cycle(&self, result: &Result<DrainReport, OutboxError>) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        match result {
            Ok(report) => {
                self.events_published
                    .fetch_add(report.published as u64, Ordering::Relaxed);
            }
            Err(OutboxError::Cancelled) => {}
            Err(_) => {
                self.rollbacks.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Reads every counter.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            events_published: self.events_published.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            notification_wakes: self.notification_wakes.load(Ordering::Relaxed),
            poll_wakes: self.poll_wakes.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_cycle_counts_published_and_rollbacks() {
        let metrics = RelayMetrics::default();

        metrics.record_cycle(&Ok(DrainReport {
            claimed: 3,
            published: 3,
        }));
        metrics.record_cycle(&Err(OutboxError::PublishTimeout));
        metrics.record_cycle(&Err(OutboxError::Cancelled));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cycles, 3);
        assert_eq!(snapshot.events_published, 3);
        assert_eq!(snapshot.rollbacks, 1);
    }

    #[test]
    fn test_record_wake_by_reason() {
        let metrics = RelayMetrics::default();

        metrics.record_wake(WakeReason::Poll);
        metrics.record_wake(WakeReason::Poll);
        metrics.record_wake(WakeReason::Notification);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.poll_wakes, 2);
        assert_eq!(snapshot.notification_wakes, 1);
    }
}
