//! Outbox Event Store — `PostgreSQL` implementation of the outbox contracts.
//!
//! Events live in the `events` table created by the workspace migrations.
//! Claims use `FOR UPDATE SKIP LOCKED`; commit notifications use
//! `LISTEN`/`NOTIFY` on a configurable channel.

pub mod pg_event_store;
pub mod pg_notification;

pub use pg_event_store::{PgEventStore, PgEventTransaction};
pub use pg_notification::PgNotificationSubscriber;
