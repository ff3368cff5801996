//! Publisher that hands envelopes to an in-process consumer over a tokio
//! channel.

use async_trait::async_trait;
use outbox_core::error::OutboxError;
use outbox_core::publisher::Publisher;
use tokio::sync::mpsc;

/// Forwards every envelope into a bounded mpsc channel. A full channel makes
/// `publish` wait, which the relay's publish timeout bounds.
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    sender: mpsc::Sender<Vec<u8>>,
}

impl ChannelPublisher {
    /// Creates a publisher and the receiver its envelopes arrive on.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl Publisher for ChannelPublisher {
    async fn publish(&self, envelope: &[u8]) -> Result<(), OutboxError> {
        self.sender
            .send(envelope.to_vec())
            .await
            .map_err(|_| OutboxError::Publish("envelope receiver dropped".into()))
    }
}
