//! `PostgreSQL` `LISTEN` subscriber for commit notifications.

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgListener;

use outbox_core::error::OutboxError;
use outbox_core::notification::{NotificationSubscriber, Subscription};

/// Opens a dedicated `LISTEN` connection per subscription.
#[derive(Debug, Clone)]
pub struct PgNotificationSubscriber {
    pool: PgPool,
    channel: String,
}

impl PgNotificationSubscriber {
    /// Creates a subscriber for `channel`.
    #[must_use]
    pub fn new(pool: PgPool, channel: impl Into<String>) -> Self {
        Self {
            pool,
            channel: channel.into(),
        }
    }

    /// Returns the channel name.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

#[async_trait]
impl NotificationSubscriber for PgNotificationSubscriber {
    async fn subscribe(&self) -> Result<Box<dyn Subscription>, OutboxError> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(notification_error)?;
        listener
            .listen(&self.channel)
            .await
            .map_err(notification_error)?;
        tracing::debug!(channel = %self.channel, "Listening for commit notifications");
        Ok(Box::new(PgSubscription { listener }))
    }
}

struct PgSubscription {
    listener: PgListener,
}

#[async_trait]
impl Subscription for PgSubscription {
    async fn recv(&mut self) -> Result<(), OutboxError> {
        // `None` means the connection dropped; anything sent meanwhile is lost.
        match self.listener.try_recv().await {
            Ok(Some(notification)) => {
                tracing::trace!(channel = notification.channel(), "Notification received");
                Ok(())
            }
            Ok(None) => Err(OutboxError::Notification("listen connection lost".into())),
            Err(e) => Err(notification_error(e)),
        }
    }
}

fn notification_error(e: sqlx::Error) -> OutboxError {
    OutboxError::Notification(e.to_string())
}

#[cfg(test)]
mod tests {
    use sqlx::postgres::PgPoolOptions;

    use super::*;

    #[tokio::test]
    async fn test_subscriber_keeps_channel_name() {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/outbox")
            .unwrap();

        let subscriber = PgNotificationSubscriber::new(pool, "events");

        assert_eq!(subscriber.channel(), "events");
    }
}
