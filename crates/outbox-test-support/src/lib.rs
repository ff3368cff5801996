//! Shared test doubles for the outbox workspace.

mod clock;
mod publisher;
mod store;

pub use clock::FixedClock;
pub use publisher::{FailingPublisher, HangingPublisher, RecordingPublisher};
pub use store::{InMemoryEventStore, InMemorySubscriber, InMemoryTransaction};
