//! Fixed-interval wake source that keeps the relay live when notifications
//! are lost.

use std::time::Duration;

use tokio::time::{Interval, MissedTickBehavior, interval};

/// Periodic timer. The first tick completes immediately so that a relay
/// drains any backlog as soon as it starts.
#[derive(Debug)]
pub struct Poller {
    interval: Interval,
}

impl Poller {
    /// Creates a poller ticking every `period`.
    ///
    /// # Panics
    ///
    /// Panics if `period` is zero; [`RelayConfig::validate`](crate::RelayConfig::validate)
    /// rejects such configurations.
    #[must_use]
    pub fn new(period: Duration) -> Self {
        let mut interval = interval(period);
        // A slow drain must not be followed by a burst of catch-up ticks.
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }

    /// Waits for the next tick.
    pub async fn tick(&mut self) {
        self.interval.tick().await;
    }
}
