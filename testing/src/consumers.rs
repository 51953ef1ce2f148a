//! Scripted consumers for supervisor tests.

use crate::wait_until;
use courier_core::cancellation::CancellationSignal;
use courier_core::consumer::MessageConsumer;
use courier_core::error::MessagingError;
use futures::future::BoxFuture;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::error::Elapsed;

#[derive(Debug, Default)]
struct Script {
    failures_left: usize,
    error: Option<MessagingError>,
    signals: Vec<CancellationSignal>,
}

/// A [`MessageConsumer`] that fails a scripted number of times and otherwise
/// runs until cancelled.
#[derive(Debug)]
pub struct ScriptedConsumer {
    name: String,
    ignore_cancellation: bool,
    script: Mutex<Script>,
    changed: Notify,
}

impl ScriptedConsumer {
    /// Create a consumer that never fails.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ignore_cancellation: false,
            script: Mutex::new(Script::default()),
            changed: Notify::new(),
        }
    }

    /// Fail the first `count` attempts with `error`.
    #[must_use]
    pub fn fail_first(self, count: usize, error: MessagingError) -> Self {
        {
            let mut script = self.lock();
            script.failures_left = count;
            script.error = Some(error);
        }
        self
    }

    /// Never return, even after cancellation.
    #[must_use]
    pub const fn ignoring_cancellation(mut self) -> Self {
        self.ignore_cancellation = true;
        self
    }

    /// Number of attempts started so far.
    #[must_use]
    pub fn start_count(&self) -> usize {
        self.lock().signals.len()
    }

    /// The signal passed to each attempt, in order.
    #[must_use]
    pub fn signals(&self) -> Vec<CancellationSignal> {
        self.lock().signals.clone()
    }

    /// Wait until at least `count` attempts have started.
    ///
    /// # Errors
    ///
    /// Returns [`Elapsed`] on timeout.
    pub async fn wait_for_starts(&self, count: usize, timeout: Duration) -> Result<(), Elapsed> {
        wait_until(&self.changed, timeout, || self.start_count() >= count).await
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run(&self, cancel: CancellationSignal) -> Result<(), MessagingError> {
        let failure = {
            let mut script = self.lock();
            script.signals.push(cancel.clone());
            if script.failures_left > 0 {
                script.failures_left -= 1;
                script.error.clone()
            } else {
                None
            }
        };
        self.changed.notify_waiters();

        if let Some(error) = failure {
            return Err(error);
        }
        if self.ignore_cancellation {
            return std::future::pending().await;
        }
        cancel.cancelled().await;
        Err(MessagingError::Cancelled)
    }
}

impl MessageConsumer for ScriptedConsumer {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self, cancel: CancellationSignal) -> BoxFuture<'_, Result<(), MessagingError>> {
        Box::pin(self.run(cancel))
    }
}
