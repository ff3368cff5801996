//! Outbox relay daemon entry point.

use std::error::Error;
use std::sync::Arc;

use outbox_core::envelope::Envelope;
use outbox_event_store::PgEventStore;
use outbox_relay::{ChannelPublisher, Relay, spawn_listener, wake_channel};
use sqlx::postgres::PgPoolOptions;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::config::DaemonConfig;
use crate::error::StartupError;

mod config;
mod error;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Initialize tracing subscriber.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting outbox relay");

    let config = DaemonConfig::from_env()?;
    tracing::info!(
        channel = %config.relay.channel,
        batch_size = config.relay.batch_size,
        poll_interval_ms = u64::try_from(config.relay.poll_interval.as_millis()).unwrap_or(u64::MAX),
        "Relay configured"
    );

    // Create database connection pool.
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .map_err(StartupError::from)?;

    if config.run_migrations {
        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .map_err(StartupError::from)?;
        tracing::info!("Migrations applied");
    }

    let store = PgEventStore::new(pool, config.relay.channel.clone());
    let subscriber = Arc::new(store.subscriber());
    let (publisher, envelopes) = ChannelPublisher::channel(config.relay.batch_size);
    let consumer = tokio::spawn(log_envelopes(envelopes));

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

    let relay = Relay::new(Arc::new(store), Arc::new(publisher), config.relay)
        .map_err(StartupError::from)?;

    let (wake_tx, wake_rx) = wake_channel();
    let listener = spawn_listener(
        subscriber,
        wake_tx,
        relay.config().resubscribe.clone(),
        cancel.clone(),
    );

    relay.run(Some(wake_rx), cancel).await;

    if let Err(e) = listener.await {
        tracing::warn!(error = %e, "Notification listener ended abnormally");
    }
    // Dropping the relay drops the last publisher, which ends the consumer.
    drop(relay);
    consumer.await?;

    tracing::info!("Outbox relay stopped");
    Ok(())
}

/// Stands in for the message bus: logs every envelope the relay publishes.
async fn log_envelopes(mut envelopes: mpsc::Receiver<Vec<u8>>) {
    while let Some(bytes) = envelopes.recv().await {
        match Envelope::from_bytes(&bytes) {
            Ok(envelope) => tracing::info!(
                event_id = %envelope.id,
                aggregate_id = %envelope.aggregate_id,
                event_type = %envelope.event_type,
                tstamp = %envelope.tstamp,
                bytes = envelope.data.len(),
                "Envelope published"
            ),
            Err(e) => tracing::warn!(error = %e, "Published bytes are not an envelope"),
        }
    }
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Shutdown requested");
            cancel.cancel();
        }
        Err(e) => tracing::error!(error = %e, "Unable to listen for shutdown signal"),
    }
}
