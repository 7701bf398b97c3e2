//! Cooperative cancellation shared between a supervisor and its owner

use async_channel::{Receiver, Sender};
use async_io::Timer;
use futures_lite::future;
use std::time::Duration;

/// A cloneable, idempotent cancellation signal.
///
/// Cancelling closes an internal channel, which wakes every task waiting in
/// [`CancellationToken::cancelled`] and is observable synchronously through
/// [`CancellationToken::is_cancelled`].
#[derive(Debug, Clone)]
pub struct CancellationToken {
    sender: Sender<()>,
    receiver: Receiver<()>,
}

impl CancellationToken {
    /// Create a token that has not been cancelled
    pub fn new() -> Self {
        let (sender, receiver) = async_channel::bounded(1);
        Self { sender, receiver }
    }

    /// Signal cancellation. Calling this more than once has no further effect.
    pub fn cancel(&self) {
        self.sender.close();
    }

    /// Whether [`cancel`](Self::cancel) has been called on this token or a clone of it
    pub fn is_cancelled(&self) -> bool {
        self.sender.is_closed()
    }

    /// Wait until the token is cancelled
    pub async fn cancelled(&self) {
        // Nothing is ever sent, so this only returns once the channel closes.
        let _ = self.receiver.recv().await;
    }

    /// Sleep for `duration` unless cancelled first.
    ///
    /// Returns `true` when the sleep was interrupted by cancellation.
    pub async fn sleep(&self, duration: Duration) -> bool {
        future::or(
            async {
                self.cancelled().await;
                true
            },
            async {
                Timer::after(duration).await;
                self.is_cancelled()
            },
        )
        .await
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
