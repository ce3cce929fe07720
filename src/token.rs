//! The one-shot cancellation latch shared by every task of a session.
//!
//! `cancel()` is the only legal way to tear down a session's loops. Whichever caller flips the
//! flag first is the sole owner of the `connection-terminated` event and of disposing the
//! session's streams, socket, and queued payloads — see [`crate::session::Session::terminate`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// A shared, idempotent, one-shot cancellation flag.
///
/// Cloning a [`CancellationToken`] shares the same underlying flag; every loop of a session
/// should poll the same token at every re-entry and must not resume work once it observes
/// `cancelled() == true`.
#[derive(Clone)]
pub struct CancellationToken {
    flipped: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken {
            flipped: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Flip the token. Idempotent: returns `true` only for the call that actually performed the
    /// flip (the "first flipper"), which is therefore the sole owner of teardown.
    pub fn cancel(&self) -> bool {
        let first = self
            .flipped
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if first {
            self.notify.notify_waiters();
        }
        first
    }

    /// Read-only check: has this token been flipped?
    pub fn cancelled(&self) -> bool {
        self.flipped.load(Ordering::SeqCst)
    }

    /// Suspend until the token is flipped. Returns immediately if it already is. Useful for
    /// loops parked waiting on I/O-adjacent events (e.g. a send loop waiting for a fresh queue
    /// entry) that should wake promptly on cancellation rather than only on their next poll.
    pub async fn cancelled_async(&self) {
        if self.cancelled() {
            return;
        }
        self.notify.notified().await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_idempotent_and_reports_first_flipper() {
        let token = CancellationToken::new();
        assert!(!token.cancelled());
        assert!(token.cancel());
        assert!(token.cancelled());
        assert!(!token.cancel());
        assert!(!token.cancel());
    }

    #[test]
    fn clones_share_the_same_flag() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(clone.cancel());
        assert!(token.cancelled());
    }

    #[tokio::test]
    async fn cancelled_async_wakes_waiters() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled_async().await;
        });
        tokio::task::yield_now().await;
        assert!(token.cancel());
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn cancelled_async_returns_immediately_if_already_flipped() {
        let token = CancellationToken::new();
        token.cancel();
        tokio::time::timeout(std::time::Duration::from_millis(50), token.cancelled_async())
            .await
            .expect("cancelled_async should not block once already flipped");
    }
}
