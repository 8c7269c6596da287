//! Cooperative cancellation signal.

use std::sync::Arc;
use tokio::sync::watch;

/// A cloneable, one-way cancellation flag.
///
/// All clones observe the same state. Once cancelled, a token stays cancelled.
///
/// # Examples
///
/// ```rust
/// use steadfast_core::CancellationToken;
///
/// # #[tokio::main]
/// # async fn main() {
/// let token = CancellationToken::new();
/// let waiter = token.clone();
///
/// let handle = tokio::spawn(async move { waiter.cancelled().await });
/// token.cancel();
/// handle.await.unwrap();
/// assert!(token.is_cancelled());
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancellationToken {
    /// Create a token in the "not cancelled" state.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Signal cancellation to every clone. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the token is cancelled. Returns immediately if it already is.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
