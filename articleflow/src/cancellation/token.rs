//! The per-task stop flag checked by the engine.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// Shared stop flag for one task.
///
/// The engine polls [`is_cancelled`](Self::is_cancelled) at safe points
/// (stage boundaries and between adapter calls); nothing is interrupted
/// mid-flight. Only the first reason is kept.
#[derive(Default)]
pub struct CancellationToken {
    /// Set after `reason`, so a cancelled token always has a reason.
    cancelled: AtomicBool,
    reason: RwLock<Option<String>>,
    /// Wakes tasks awaiting [`cancelled`](Self::cancelled).
    notify: Notify,
}

impl CancellationToken {
    /// An uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation with a reason.
    ///
    /// Returns true if this call performed the cancellation.
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        {
            let mut current = self.reason.write();
            if current.is_some() {
                return false;
            }
            let reason = reason.into();
            tracing::debug!(reason = %reason, "Cancellation requested");
            *current = Some(reason);
            self.cancelled.store(true, Ordering::SeqCst);
        }
        self.notify.notify_waiters();
        true
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// The first reason passed to [`cancel`](Self::cancel).
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.read().clone()
    }

    /// Completes once cancellation has been requested.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_fresh_token_is_live() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.reason().is_none());
    }

    #[test]
    fn test_first_reason_wins() {
        let token = CancellationToken::new();
        assert!(token.cancel("user pressed stop"));
        assert!(!token.cancel("shutdown"));

        assert!(token.is_cancelled());
        assert_eq!(token.reason().as_deref(), Some("user pressed stop"));
    }

    #[tokio::test]
    async fn test_cancelled_future_resolves() {
        let token = Arc::new(CancellationToken::new());
        let waiter = {
            let token = Arc::clone(&token);
            tokio::spawn(async move { token.cancelled().await })
        };

        tokio::time::sleep(Duration::from_millis(5)).await;
        token.cancel("stop");

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish")
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_returns_immediately_when_already_cancelled() {
        let token = CancellationToken::new();
        token.cancel("early");
        token.cancelled().await;
    }
}
