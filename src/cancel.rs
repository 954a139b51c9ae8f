//! Run-wide cancellation.
//!
//! One `CancelSignal` is created per run and cloned into every task. It starts
//! out clear and can be tripped exactly once; tripping it again is a no-op.

use std::sync::Arc;

use tokio::sync::watch;

/// A one-way, broadcast cancellation flag.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Requests cancellation.
    ///
    /// Returns `true` only for the call that actually flipped the flag, so the
    /// caller can log the transition once.
    pub fn cancel(&self) -> bool {
        self.tx.send_if_modified(|cancelled| {
            if *cancelled {
                false
            } else {
                *cancelled = true;
                true
            }
        })
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once cancellation has been requested.
    ///
    /// Returns immediately if it already was.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
        if closed {
            // the sender lives as long as `self`, so this cannot resolve
            std::future::pending::<()>().await;
        }
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}
