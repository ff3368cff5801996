//! Relay configuration.

use std::time::Duration;

use thiserror::Error;

use crate::listener::BackoffConfig;

/// Invalid relay configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The batch size must allow at least one event per cycle.
    #[error("batch size must be greater than zero")]
    ZeroBatchSize,

    /// A duration setting was zero.
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    /// The notification channel name was empty.
    #[error("notification channel name must not be empty")]
    EmptyChannel,

    /// The resubscribe jitter was outside `0.0..1.0`.
    #[error("resubscribe jitter must be at least 0 and below 1")]
    InvalidJitter,
}

/// Tunables for a [`Relay`](crate::Relay) and its notification listener.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    /// Name of the notification channel commits are announced on.
    pub channel: String,
    /// Upper bound on the time an event waits when every notification is lost.
    pub poll_interval: Duration,
    /// Maximum number of events claimed per cycle.
    pub batch_size: usize,
    /// Time a single publish call may take before the batch is rolled back.
    pub publish_timeout: Duration,
    /// Time a single store round trip may take.
    pub store_timeout: Duration,
    /// Delays between resubscribe attempts after the notification connection
    /// drops.
    pub resubscribe: BackoffConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            channel: "events".to_string(),
            poll_interval: Duration::from_secs(5),
            batch_size: 100,
            publish_timeout: Duration::from_secs(10),
            store_timeout: Duration::from_secs(30),
            resubscribe: BackoffConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Checks that every setting is usable.
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel.trim().is_empty() {
            return Err(ConfigError::EmptyChannel);
        }
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        for (name, value) in [
            ("poll interval", self.poll_interval),
            ("publish timeout", self.publish_timeout),
            ("store timeout", self.store_timeout),
            ("resubscribe delay", self.resubscribe.initial_delay),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration(name));
            }
        }
        if !(0.0..1.0).contains(&self.resubscribe.jitter) {
            return Err(ConfigError::InvalidJitter);
        }
        Ok(())
    }
}
