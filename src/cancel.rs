//! Cooperative cancellation for a running pipeline.
//!
//! A [`CancelToken`] is cloned into every component that can block: the
//! rate limiter, the converter's child-process wait, and the upload worker
//! pool. Firing the token makes each of them return promptly instead of
//! finishing their wait, so an abort never hangs on an in-flight sleep or
//! subprocess.
//!
//! Built on `tokio::sync::watch` rather than a bare `AtomicBool` because
//! waiters need to be *woken*, not just observe a flag on their next poll.

use tokio::sync::watch;

/// A cloneable cancellation signal.
///
/// All clones observe the same flag; any clone may fire it. Once fired the
/// token stays cancelled for the rest of the run.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Create a fresh, un-fired token.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }

    /// Fire the signal, waking every pending [`CancelToken::cancelled`] wait.
    pub fn cancel(&self) {
        // send_replace never fails: we hold a receiver ourselves.
        self.tx.send_replace(true);
    }

    /// Whether the signal has been fired.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until the signal fires. Returns immediately if it already has.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // wait_for only errors when every sender is dropped; self holds one.
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
