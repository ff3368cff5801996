//! `PostgreSQL` implementation of the `EventStore` trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgConnection;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use outbox_core::error::OutboxError;
use outbox_core::event::{Event, NewEvent};
use outbox_core::store::{EventStore, EventTransaction};

use crate::pg_notification::PgNotificationSubscriber;

const INSERT_EVENT: &str = r#"
INSERT INTO events (id, aggregate_id, "type", data)
VALUES ($1, $2, $3, $4)
"#;

// Delivered on commit only; identical notifications in one transaction are
// folded into one.
const NOTIFY_COMMIT: &str = "SELECT pg_notify($1, '')";

const CLAIM_UNPROCESSED: &str = r#"
SELECT id, aggregate_id, "type", ts, processed, data
FROM events
WHERE processed = FALSE
ORDER BY ts, id
LIMIT $1
FOR UPDATE SKIP LOCKED
"#;

const MARK_PROCESSED: &str = r"
UPDATE events
SET processed = TRUE
WHERE id = $1 AND processed = FALSE
";

/// Row struct for the `events` table.
#[derive(FromRow)]
struct EventRow {
    id: Uuid,
    aggregate_id: String,
    #[sqlx(rename = "type")]
    event_type: String,
    ts: DateTime<Utc>,
    processed: bool,
    data: Vec<u8>,
}

impl From<EventRow> for Event {
    fn from(row: EventRow) -> Self {
        Self {
            id: row.id,
            aggregate_id: row.aggregate_id,
            event_type: row.event_type,
            timestamp: row.ts,
            processed: row.processed,
            payload: row.data,
        }
    }
}

/// PostgreSQL-backed event store.
#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
    channel: String,
}

impl PgEventStore {
    /// Creates a new `PgEventStore` that announces commits on `channel`.
    #[must_use]
    pub fn new(pool: PgPool, channel: impl Into<String>) -> Self {
        Self {
            pool,
            channel: channel.into(),
        }
    }

    /// Returns the connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Returns the notification channel name.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Returns a subscriber for this store's commit notifications.
    #[must_use]
    pub fn subscriber(&self) -> PgNotificationSubscriber {
        PgNotificationSubscriber::new(self.pool.clone(), self.channel.clone())
    }

    /// Opens a transaction without boxing it, so that a producer can run its
    /// domain writes on [`PgEventTransaction::connection`].
    ///
    /// # Errors
    ///
    /// Returns `OutboxError::Store` if no connection can be acquired.
    pub async fn begin_pg(&self) -> Result<PgEventTransaction, OutboxError> {
        let tx = self.pool.begin().await.map_err(store_error)?;
        Ok(PgEventTransaction {
            tx,
            channel: self.channel.clone(),
        })
    }

    /// Appends `event` inside a transaction owned by the caller.
    ///
    /// # Errors
    ///
    /// Returns `OutboxError::DuplicateId` if the id already exists, in which
    /// case the caller's transaction is aborted.
    pub async fn append_in(
        &self,
        conn: &mut PgConnection,
        event: &NewEvent,
    ) -> Result<(), OutboxError> {
        insert_event(conn, &self.channel, event).await
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn begin(&self) -> Result<Box<dyn EventTransaction>, OutboxError> {
        Ok(Box::new(self.begin_pg().await?))
    }
}

/// An open `PostgreSQL` transaction. Dropping it rolls it back.
pub struct PgEventTransaction {
    tx: Transaction<'static, Postgres>,
    channel: String,
}

impl PgEventTransaction {
    /// Returns the connection the transaction runs on.
    pub fn connection(&mut self) -> &mut PgConnection {
        &mut self.tx
    }
}

#[async_trait]
impl EventTransaction for PgEventTransaction {
    async fn append(&mut self, event: &NewEvent) -> Result<(), OutboxError> {
        insert_event(&mut self.tx, &self.channel, event).await
    }

    async fn claim_unprocessed(&mut self, limit: usize) -> Result<Vec<Event>, OutboxError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<EventRow> = sqlx::query_as(CLAIM_UNPROCESSED)
            .bind(limit)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(store_error)?;
        Ok(rows.into_iter().map(Event::from).collect())
    }

    async fn mark_processed(&mut self, id: Uuid) -> Result<(), OutboxError> {
        let result = sqlx::query(MARK_PROCESSED)
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(store_error)?;
        if result.rows_affected() == 0 {
            return Err(OutboxError::NotFound(id));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), OutboxError> {
        self.tx.commit().await.map_err(store_error)
    }

    async fn rollback(self: Box<Self>) -> Result<(), OutboxError> {
        self.tx.rollback().await.map_err(store_error)
    }
}

async fn insert_event(
    conn: &mut PgConnection,
    channel: &str,
    event: &NewEvent,
) -> Result<(), OutboxError> {
    sqlx::query(INSERT_EVENT)
        .bind(event.id)
        .bind(&event.aggregate_id)
        .bind(&event.event_type)
        .bind(&event.payload)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            if e.as_database_error()
                .is_some_and(|db| db.is_unique_violation())
            {
                OutboxError::DuplicateId(event.id)
            } else {
                store_error(e)
            }
        })?;

    sqlx::query(NOTIFY_COMMIT)
        .bind(channel)
        .execute(&mut *conn)
        .await
        .map_err(store_error)?;

    tracing::debug!(
        event_id = %event.id,
        aggregate_id = %event.aggregate_id,
        event_type = %event.event_type,
        "Event appended"
    );
    Ok(())
}

fn store_error(e: sqlx::Error) -> OutboxError {
    OutboxError::Store(e.to_string())
}
