//! Retrying decorator for [`ExternalPublisher`].
//!
//! Wraps a transport binding and retries transient failures
//! ([`MessagingError::is_transient`]) with exponential backoff. Cancellation
//! ends both the attempt in flight and any pending backoff.

use crate::metrics::{PUBLISH_RETRIED, counter};
use crate::retry::{RetryPolicy, retry_until_cancelled};
use courier_core::cancellation::CancellationSignal;
use courier_core::error::MessagingError;
use courier_core::message::Message;
use courier_core::publisher::ExternalPublisher;
use futures::future::BoxFuture;
use std::sync::Arc;

/// [`ExternalPublisher`] that retries its inner publisher.
///
/// # Example
///
/// ```ignore
/// let transport = RetryingPublisher::new(broker, config.publish_retry.clone());
/// let publisher = Publisher::domain(mapper, Arc::new(transport));
/// ```
#[derive(Debug, Clone)]
pub struct RetryingPublisher<P> {
    inner: P,
    policy: RetryPolicy,
}

impl<P: ExternalPublisher> RetryingPublisher<P> {
    /// Wrap `inner` with `policy`.
    #[must_use]
    pub const fn new(inner: P, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// The retry policy in use.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn with_retry<'a, F>(&'a self, cancel: &'a CancellationSignal, mut attempt: F) -> Result<(), MessagingError>
    where
        F: FnMut() -> BoxFuture<'a, Result<(), MessagingError>>,
    {
        let mut attempts = 0_u64;
        let result = retry_until_cancelled(&self.policy, cancel, || {
            attempts += 1;
            attempt()
        })
        .await;

        if attempts > 1 {
            counter!(PUBLISH_RETRIED).increment(attempts - 1);
        }
        result
    }
}

impl<P: ExternalPublisher> ExternalPublisher for RetryingPublisher<P> {
    fn publish<'a>(
        &'a self,
        envelope: Arc<dyn Message>,
        routing_key: Option<&'a str>,
        cancel: &'a CancellationSignal,
    ) -> BoxFuture<'a, Result<(), MessagingError>> {
        Box::pin(self.with_retry(cancel, move || {
            self.inner.publish(Arc::clone(&envelope), routing_key, cancel)
        }))
    }

    fn publish_many<'a>(
        &'a self,
        envelopes: Vec<Arc<dyn Message>>,
        routing_key: Option<&'a str>,
        cancel: &'a CancellationSignal,
    ) -> BoxFuture<'a, Result<(), MessagingError>> {
        Box::pin(self.with_retry(cancel, move || {
            self.inner.publish_many(envelopes.clone(), routing_key, cancel)
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code
mod tests {
    use super::*;
    use courier_core::environment::SystemClock;
    use courier_core::mapper::MessageMapper;
    use courier_core::message::Payload;
    use courier_core::metadata::Metadata;
    use courier_testing::InMemoryTransport;
    use std::time::Duration;

    #[derive(Debug, Clone, serde::Serialize)]
    struct Ping;
    impl Payload for Ping {}

    fn ping() -> Arc<dyn Message> {
        Arc::new(MessageMapper::to_domain(Ping, Metadata::generate(&SystemClock)).unwrap())
    }

    fn policy(max_retries: usize) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(max_retries)
            .initial_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(5))
            .build()
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let transport = Arc::new(InMemoryTransport::new());
        transport.fail_next_publishes(2, MessagingError::TransportUnavailable("down".into()));
        let publisher = RetryingPublisher::new(Arc::clone(&transport), policy(3));

        publisher.publish(ping(), None, &CancellationSignal::new()).await.unwrap();

        assert_eq!(transport.publish_calls(), 3);
        assert_eq!(transport.published().len(), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let transport = Arc::new(InMemoryTransport::new());
        let rejected = MessagingError::PublishFailed {
            name: "Ping".into(),
            reason: "nack".into(),
        };
        transport.fail_next_publishes(10, rejected.clone());
        let publisher = RetryingPublisher::new(Arc::clone(&transport), policy(2));

        let result = publisher.publish_many(vec![ping()], None, &CancellationSignal::new()).await;

        assert_eq!(result, Err(rejected));
        assert_eq!(transport.publish_calls(), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let transport = Arc::new(InMemoryTransport::new());
        transport.fail_next_publishes(1, MessagingError::InvalidMetadata("bad".into()));
        let publisher = RetryingPublisher::new(Arc::clone(&transport), policy(5));

        let result = publisher.publish(ping(), None, &CancellationSignal::new()).await;

        assert!(matches!(result, Err(MessagingError::InvalidMetadata(_))));
        assert_eq!(transport.publish_calls(), 1);
    }
}
