//! Outbox relay daemon — startup error types.

use outbox_relay::ConfigError;
use thiserror::Error;

/// Errors that stop the daemon before the relay starts.
#[derive(Debug, Error)]
pub enum StartupError {
    /// A required environment variable is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Database connection or pool error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Applying the schema migrations failed.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl From<ConfigError> for StartupError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
