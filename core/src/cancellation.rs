//! Cooperative cancellation signal.
//!
//! A [`CancellationSignal`] is a cloneable, one-way flag: once cancelled it stays
//! cancelled. Work observes it either by polling [`CancellationSignal::is_cancelled`]
//! or by awaiting [`CancellationSignal::cancelled`] inside a `tokio::select!`.
//!
//! Signals can be combined with [`CancellationSignal::any_of`]: the combined
//! signal fires as soon as any of its parents (or the combined signal itself)
//! is cancelled, while cancelling the combined signal leaves the parents alone.
//!
//! ```
//! use courier_core::cancellation::CancellationSignal;
//!
//! let host = CancellationSignal::new();
//! let consumer = CancellationSignal::new();
//! let attempt = CancellationSignal::any_of([host.clone(), consumer.clone()]);
//!
//! assert!(!attempt.is_cancelled());
//! consumer.cancel();
//! assert!(attempt.is_cancelled());
//! assert!(!host.is_cancelled());
//! ```

use futures::future::{BoxFuture, select_all};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Revocable, cloneable cancellation flag backed by a `watch` channel.
#[derive(Clone)]
pub struct CancellationSignal {
    inner: Arc<Inner>,
}

struct Inner {
    flag: watch::Sender<bool>,
    parents: Vec<CancellationSignal>,
}

impl CancellationSignal {
    /// Create a fresh, non-cancelled signal.
    #[must_use]
    pub fn new() -> Self {
        Self::with_parents(Vec::new())
    }

    /// Create a signal that is cancelled when any of `signals` is cancelled.
    #[must_use]
    pub fn any_of(signals: impl IntoIterator<Item = Self>) -> Self {
        Self::with_parents(signals.into_iter().collect())
    }

    fn with_parents(parents: Vec<Self>) -> Self {
        let (flag, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner { flag, parents }),
        }
    }

    /// Cancel this signal. Idempotent.
    pub fn cancel(&self) {
        self.inner.flag.send_replace(true);
    }

    /// Whether this signal, or any parent, has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.inner.flag.borrow() || self.inner.parents.iter().any(Self::is_cancelled)
    }

    /// Resolves once the signal is cancelled. Resolves immediately if it already is.
    pub fn cancelled(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if self.is_cancelled() {
                return;
            }

            let mut waits: Vec<BoxFuture<'_, ()>> = Vec::with_capacity(1 + self.inner.parents.len());
            waits.push(Box::pin(async move {
                let mut rx = self.inner.flag.subscribe();
                // The sender lives as long as `self`, so the error arm cannot fire
                // while this future is alive.
                if rx.wait_for(|cancelled| *cancelled).await.is_err() {
                    std::future::pending::<()>().await;
                }
            }));
            for parent in &self.inner.parents {
                waits.push(parent.cancelled());
            }

            let _ = select_all(waits).await;
        })
    }

    /// Whether two handles refer to the same underlying signal.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for CancellationSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationSignal")
            .field("cancelled", &self.is_cancelled())
            .field("parents", &self.inner.parents.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cancel_is_sticky() {
        let signal = CancellationSignal::new();
        assert!(!signal.is_cancelled());
        signal.cancel();
        signal.cancel();
        assert!(signal.is_cancelled());
    }

    #[test]
    fn test_clones_share_state() {
        let signal = CancellationSignal::new();
        let clone = signal.clone();
        clone.cancel();
        assert!(signal.is_cancelled());
        assert!(signal.same_as(&clone));
        assert!(!signal.same_as(&CancellationSignal::new()));
    }

    #[tokio::test]
    async fn test_cancelled_resolves_for_waiter() {
        let signal = CancellationSignal::new();
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.cancelled().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.cancel();

        let joined = tokio::time::timeout(Duration::from_secs(1), waiter).await;
        assert!(matches!(joined, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_cancelled_resolves_immediately_when_already_cancelled() {
        let signal = CancellationSignal::new();
        signal.cancel();
        let result = tokio::time::timeout(Duration::from_millis(50), signal.cancelled()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_any_of_fires_on_parent() {
        let host = CancellationSignal::new();
        let manager = CancellationSignal::new();
        let attempt = CancellationSignal::any_of([host.clone(), manager.clone()]);

        let waiter = {
            let attempt = attempt.clone();
            tokio::spawn(async move { attempt.cancelled().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        manager.cancel();

        let joined = tokio::time::timeout(Duration::from_secs(1), waiter).await;
        assert!(matches!(joined, Ok(Ok(()))));
        assert!(!host.is_cancelled());
    }

    #[test]
    fn test_cancelling_child_leaves_parents() {
        let parent = CancellationSignal::new();
        let child = CancellationSignal::any_of([parent.clone()]);
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn test_pending_while_not_cancelled() {
        let signal = CancellationSignal::new();
        let result = tokio::time::timeout(Duration::from_millis(20), signal.cancelled()).await;
        assert!(result.is_err());
    }
}
