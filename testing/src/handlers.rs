//! Recording handlers.

use crate::wait_until;
use courier_core::cancellation::CancellationSignal;
use courier_core::handler::{Handler, HandlerError};
use courier_core::message::Message;
use futures::future::BoxFuture;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::error::Elapsed;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Ordered log shared by several handlers, for asserting invocation order.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    /// Append an entry.
    pub fn push(&self, entry: impl Into<String>) {
        lock(&self.entries).push(entry.into());
    }

    /// Entries in append order.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        lock(&self.entries).clone()
    }
}

/// One invocation seen by a [`RecordingHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    /// Envelope message id
    pub message_id: String,
    /// Envelope name
    pub message_name: String,
    /// Correlation id from the metadata
    pub correlation_id: String,
}

/// Handler that accepts any envelope type and records each invocation.
///
/// Register it once per envelope type through
/// `HandlerRegistry::builder().register_shared::<M, _>(handler.clone())`.
#[derive(Debug)]
pub struct RecordingHandler {
    name: String,
    failure: Option<String>,
    wait_for_cancel: bool,
    log: Option<CallLog>,
    calls: Mutex<Vec<RecordedCall>>,
    changed: Notify,
}

impl RecordingHandler {
    /// Create a handler that succeeds.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            failure: None,
            wait_for_cancel: false,
            log: None,
            calls: Mutex::new(Vec::new()),
            changed: Notify::new(),
        }
    }

    /// Fail every invocation with `reason`.
    #[must_use]
    pub fn failing(mut self, reason: impl Into<String>) -> Self {
        self.failure = Some(reason.into());
        self
    }

    /// Append the handler name to `log` on every invocation.
    #[must_use]
    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Suspend every invocation until the cancellation signal fires, then fail.
    #[must_use]
    pub const fn blocking_until_cancelled(mut self) -> Self {
        self.wait_for_cancel = true;
        self
    }

    /// Number of invocations so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Invocations so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    /// Wait until the handler has been invoked at least `count` times.
    ///
    /// # Errors
    ///
    /// Returns [`Elapsed`] on timeout.
    pub async fn wait_for_calls(&self, count: usize, timeout: Duration) -> Result<(), Elapsed> {
        wait_until(&self.changed, timeout, || self.call_count() >= count).await
    }

    fn record(&self, message: &dyn Message) {
        lock(&self.calls).push(RecordedCall {
            message_id: message.message_id().to_string(),
            message_name: message.name().to_string(),
            correlation_id: message.metadata().correlation_id().to_string(),
        });
        if let Some(log) = &self.log {
            log.push(self.name.clone());
        }
        self.changed.notify_waiters();
    }
}

impl<M: Message> Handler<M> for RecordingHandler {
    fn handle<'a>(&'a self, message: &'a M, cancel: &'a CancellationSignal) -> BoxFuture<'a, Result<(), HandlerError>> {
        Box::pin(async move {
            self.record(message);

            if self.wait_for_cancel {
                cancel.cancelled().await;
                return Err(format!("{} interrupted", self.name).into());
            }

            match &self.failure {
                Some(reason) => Err(reason.clone().into()),
                None => Ok(()),
            }
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code
mod tests {
    use super::*;
    use chrono::DateTime;
    use courier_core::mapper::MessageMapper;
    use courier_core::message::{DomainMessage, Payload};
    use courier_core::metadata::Metadata;

    #[derive(Debug, Clone, serde::Serialize)]
    struct Ping;
    impl Payload for Ping {}

    fn ping() -> DomainMessage<Ping> {
        let metadata = Metadata::new("corr-7", DateTime::from_timestamp(0, 0).unwrap()).unwrap();
        MessageMapper::to_domain(Ping, metadata).unwrap()
    }

    #[tokio::test]
    async fn test_records_calls_and_failure() {
        let handler = RecordingHandler::new("recorder").failing("nope");
        let message = ping();

        let result = Handler::<DomainMessage<Ping>>::handle(&handler, &message, &CancellationSignal::new()).await;

        assert_eq!(result.unwrap_err().to_string(), "nope");
        assert_eq!(handler.calls()[0].correlation_id, "corr-7");
        assert_eq!(handler.calls()[0].message_id, message.message_id());
    }

    #[tokio::test]
    async fn test_blocking_handler_returns_on_cancel() {
        let handler = RecordingHandler::new("slow").blocking_until_cancelled();
        let message = ping();
        let cancel = CancellationSignal::new();
        cancel.cancel();

        let result = Handler::<DomainMessage<Ping>>::handle(&handler, &message, &cancel).await;

        assert!(result.is_err());
        assert_eq!(handler.call_count(), 1);
    }

    #[test]
    fn test_call_log_keeps_order() {
        let log = CallLog::default();
        log.push("a");
        log.clone().push("b");
        assert_eq!(log.entries(), vec!["a".to_string(), "b".to_string()]);
    }
}
