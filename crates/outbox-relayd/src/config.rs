//! Daemon configuration read from environment variables.

use std::str::FromStr;
use std::time::Duration;

use outbox_relay::RelayConfig;

use crate::error::StartupError;

/// Everything the daemon needs to start.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub run_migrations: bool,
    pub relay: RelayConfig,
}

impl DaemonConfig {
    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `StartupError::Config` if `DATABASE_URL` is unset or any
    /// setting fails to parse or validate.
    pub fn from_env() -> Result<Self, StartupError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`, which returns the value of
    /// a variable if it is set.
    ///
    /// # Errors
    ///
    /// See [`DaemonConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, StartupError> {
        let database_url = lookup("DATABASE_URL").ok_or_else(|| {
            StartupError::Config("DATABASE_URL environment variable must be set".into())
        })?;

        let defaults = RelayConfig::default();
        let relay = RelayConfig {
            channel: lookup("OUTBOX_CHANNEL").unwrap_or(defaults.channel),
            poll_interval: millis(&lookup, "OUTBOX_POLL_INTERVAL_MS", defaults.poll_interval)?,
            batch_size: parsed(&lookup, "OUTBOX_BATCH_SIZE", defaults.batch_size)?,
            publish_timeout: millis(
                &lookup,
                "OUTBOX_PUBLISH_TIMEOUT_MS",
                defaults.publish_timeout,
            )?,
            store_timeout: millis(&lookup, "OUTBOX_STORE_TIMEOUT_MS", defaults.store_timeout)?,
            resubscribe: defaults.resubscribe,
        };
        relay.validate()?;

        let max_connections = parsed(&lookup, "OUTBOX_MAX_CONNECTIONS", 10)?;
        if max_connections < 2 {
            // The listener holds one connection for its whole life.
            return Err(StartupError::Config(
                "OUTBOX_MAX_CONNECTIONS must be at least 2".into(),
            ));
        }

        Ok(Self {
            database_url,
            max_connections,
            run_migrations: parsed(&lookup, "OUTBOX_RUN_MIGRATIONS", false)?,
            relay,
        })
    }
}

fn parsed<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, StartupError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| StartupError::Config(format!("{key} is invalid: {e}"))),
    }
}

fn millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration, StartupError> {
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    parsed(lookup, key, default_ms).map(Duration::from_millis)
}
