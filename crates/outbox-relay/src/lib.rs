//! Outbox Relay — moves committed outbox events to the message bus.
//!
//! The relay sleeps until either a commit notification or the poller wakes
//! it, then drains the outbox one transaction per batch: claim, publish every
//! event, mark every event, commit. A failed publish rolls the whole batch
//! back so that it is retried later, which gives at-least-once delivery.

pub mod channel_publisher;
pub mod config;
pub mod listener;
pub mod metrics;
pub mod poller;
pub mod relay;
pub mod wake;

pub use channel_publisher::ChannelPublisher;
pub use config::{ConfigError, RelayConfig};
pub use listener::{BackoffConfig, spawn_listener};
pub use metrics::{MetricsSnapshot, RelayMetrics};
pub use poller::Poller;
pub use relay::{DrainReport, Relay, RelayState};
pub use wake::{WakeReason, WakeReceiver, WakeSender, wake_channel};
