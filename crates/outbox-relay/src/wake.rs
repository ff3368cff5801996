//! Wake signals delivered to the relay.
//!
//! The channel holds at most one pending wake. Waking a relay that already has
//! a wake queued is a no-op, so bursts of commits coalesce into one drain.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Why the relay left `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// A commit notification arrived.
    Notification,
    /// The poll interval elapsed.
    Poll,
}

/// Sending half of a wake channel.
#[derive(Debug, Clone)]
pub struct WakeSender(mpsc::Sender<()>);

/// Receiving half of a wake channel, consumed by
/// [`Relay::run`](crate::Relay::run).
#[derive(Debug)]
pub struct WakeReceiver(mpsc::Receiver<()>);

/// Creates a coalescing wake channel.
#[must_use]
pub fn wake_channel() -> (WakeSender, WakeReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (WakeSender(tx), WakeReceiver(rx))
}

impl WakeSender {
    /// Queues a wake. Returns `false` once the receiver is gone.
    pub fn wake(&self) -> bool {
        match self.0.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => true,
            Err(TrySendError::Closed(())) => false,
        }
    }
}

impl WakeReceiver {
    /// Waits for the next wake. Returns `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<()> {
        self.0.recv().await
    }
}
