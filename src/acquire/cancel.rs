//! Batch-level cancellation signal.
//!
//! A [`CancelToken`] is cloned into every worker and attempt. Once
//! [`CancelToken::cancel`] is called, every pending [`CancelToken::cancelled`]
//! future resolves, so in-flight fetches and backoff sleeps raced against it
//! are dropped promptly.
//!
//! [`CancelToken::child`] derives a token that is cancelled whenever its
//! parent is, but whose own cancellation never reaches the parent.

use std::sync::Arc;

use futures_util::future::select_all;
use tokio::sync::watch;

/// Cloneable cancellation flag shared by a batch.
#[derive(Debug, Clone)]
pub struct CancelToken {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
    parent: Option<Arc<Self>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// Creates a token in the not-cancelled state.
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
            parent: None,
        }
    }

    /// Creates a token that follows this one.
    ///
    /// Cancelling the child leaves `self` and its other children untouched.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            parent: Some(Arc::new(self.clone())),
            ..Self::new()
        }
    }

    /// Signals cancellation to every clone and child. Idempotent.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Whether cancellation has been signalled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.lineage().any(|token| *token.receiver.borrow())
    }

    /// Resolves once cancellation is signalled on this token or an ancestor.
    pub async fn cancelled(&self) {
        let waits = self
            .lineage()
            .map(|token| Box::pin(wait_for(token.receiver.clone())));
        select_all(waits).await;
    }

    fn lineage(&self) -> impl Iterator<Item = &Self> {
        std::iter::successors(Some(self), |token| token.parent.as_deref())
    }
}

async fn wait_for(mut receiver: watch::Receiver<bool>) {
    while !*receiver.borrow_and_update() {
        if receiver.changed().await.is_err() {
            // Sender dropped without cancelling: never resolves.
            std::future::pending::<()>().await;
        }
    }
}
