//! Family-specific publishers.
//!
//! A [`Publisher`] turns payloads into envelopes of its family through the
//! shared [`MessageMapper`] and forwards them to the [`ExternalPublisher`].
//!
//! # Rules
//!
//! - Missing metadata is generated once per call (fresh correlation id, clock
//!   time) and shared by every envelope of a batch.
//! - Payloads are mapped in input order before anything is delivered, so a
//!   mapping failure publishes nothing.
//! - Transport failures propagate unchanged. Retrying is the job of
//!   [`RetryingPublisher`](crate::retrying_publisher::RetryingPublisher).
//! - A cancellation signal that fires before or during delivery fails the call
//!   with [`MessagingError::Cancelled`].

use crate::metrics::{PUBLISH_FAILED, PUBLISH_TOTAL};
use courier_core::cancellation::CancellationSignal;
use courier_core::environment::{Clock, SystemClock};
use courier_core::error::MessagingError;
use courier_core::mapper::MessageMapper;
use courier_core::message::{Message, MessageFamily, Payload};
use courier_core::metadata::Metadata;
use courier_core::publisher::ExternalPublisher;
use metrics::counter;
use std::future::Future;
use std::sync::Arc;

/// Publisher bound to one [`MessageFamily`].
#[derive(Clone)]
pub struct Publisher {
    family: MessageFamily,
    mapper: Arc<MessageMapper>,
    external: Arc<dyn ExternalPublisher>,
    clock: Arc<dyn Clock>,
}

impl Publisher {
    /// Create a publisher for `family`.
    #[must_use]
    pub fn new(
        family: MessageFamily,
        mapper: Arc<MessageMapper>,
        external: Arc<dyn ExternalPublisher>,
    ) -> Self {
        Self {
            family,
            mapper,
            external,
            clock: Arc::new(SystemClock),
        }
    }

    /// Publisher of domain messages.
    #[must_use]
    pub fn domain(mapper: Arc<MessageMapper>, external: Arc<dyn ExternalPublisher>) -> Self {
        Self::new(MessageFamily::Domain, mapper, external)
    }

    /// Publisher of integration messages.
    #[must_use]
    pub fn integration(mapper: Arc<MessageMapper>, external: Arc<dyn ExternalPublisher>) -> Self {
        Self::new(MessageFamily::Integration, mapper, external)
    }

    /// Use `clock` when generating metadata.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Family of every envelope this publisher produces.
    #[must_use]
    pub const fn family(&self) -> MessageFamily {
        self.family
    }

    /// Publish a single payload.
    ///
    /// # Errors
    ///
    /// - [`MessagingError::InvalidPayload`] if `payload` is already an envelope
    /// - [`MessagingError::UnregisteredPayload`] if its type is unknown to the mapper
    /// - [`MessagingError::Cancelled`] if `cancel` fires before delivery completes
    /// - any transport error, unchanged
    pub async fn publish<P: Payload>(
        &self,
        payload: P,
        metadata: Option<Metadata>,
        routing_key: Option<&str>,
        cancel: Option<&CancellationSignal>,
    ) -> Result<(), MessagingError> {
        self.publish_boxed(Box::new(payload), metadata, routing_key, cancel)
            .await
    }

    /// Publish a payload whose concrete type is only known at run time.
    ///
    /// # Errors
    ///
    /// See [`Publisher::publish`].
    pub async fn publish_boxed(
        &self,
        payload: Box<dyn Payload>,
        metadata: Option<Metadata>,
        routing_key: Option<&str>,
        cancel: Option<&CancellationSignal>,
    ) -> Result<(), MessagingError> {
        let cancel = cancel.cloned().unwrap_or_default();
        if cancel.is_cancelled() {
            return Err(MessagingError::Cancelled);
        }

        let metadata = metadata.unwrap_or_else(|| Metadata::generate(self.clock.as_ref()));
        let envelope = self.mapper.map(self.family, payload, metadata)?;

        tracing::debug!(
            family = %self.family,
            message = envelope.name(),
            message_id = envelope.message_id(),
            correlation_id = envelope.metadata().correlation_id(),
            "Publishing envelope"
        );

        let delivery = self.external.publish(envelope, routing_key, &cancel);
        self.deliver(delivery, &cancel, 1).await
    }

    /// Publish a batch of payloads.
    ///
    /// Every envelope of the batch carries the same metadata. An empty batch is
    /// a no-op and never reaches the transport.
    ///
    /// # Errors
    ///
    /// See [`Publisher::publish`]. A mapping failure on any item fails the whole
    /// batch before delivery.
    pub async fn publish_many(
        &self,
        payloads: Vec<Box<dyn Payload>>,
        metadata: Option<Metadata>,
        routing_key: Option<&str>,
        cancel: Option<&CancellationSignal>,
    ) -> Result<(), MessagingError> {
        let cancel = cancel.cloned().unwrap_or_default();
        if cancel.is_cancelled() {
            return Err(MessagingError::Cancelled);
        }

        if payloads.is_empty() {
            tracing::debug!(family = %self.family, "Empty batch, nothing to publish");
            return Ok(());
        }

        let metadata = metadata.unwrap_or_else(|| Metadata::generate(self.clock.as_ref()));
        let envelopes = payloads
            .into_iter()
            .map(|payload| self.mapper.map(self.family, payload, metadata.clone()))
            .collect::<Result<Vec<Arc<dyn Message>>, _>>()?;

        let count = envelopes.len();
        tracing::debug!(
            family = %self.family,
            count,
            correlation_id = metadata.correlation_id(),
            "Publishing batch"
        );

        let delivery = self.external.publish_many(envelopes, routing_key, &cancel);
        self.deliver(delivery, &cancel, count).await
    }

    async fn deliver<F>(&self, delivery: F, cancel: &CancellationSignal, count: usize) -> Result<(), MessagingError>
    where
        F: Future<Output = Result<(), MessagingError>>,
    {
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(MessagingError::Cancelled),
            result = delivery => result,
        };

        match &result {
            Ok(()) => {
                counter!(PUBLISH_TOTAL, "family" => self.family.as_str()).increment(u64::try_from(count).unwrap_or(u64::MAX));
            }
            Err(error) => {
                counter!(PUBLISH_FAILED, "family" => self.family.as_str()).increment(1);
                tracing::warn!(family = %self.family, count, error = %error, "Publish failed");
            }
        }

        result
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("family", &self.family)
            .field("mapper", &self.mapper)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code
mod tests {
    use super::*;
    use courier_core::message::{DomainMessage, IntegrationMessage};
    use courier_testing::{InMemoryTransport, test_clock};
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct OrderPlaced {
        id: u64,
    }
    impl Payload for OrderPlaced {}

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Unregistered;
    impl Payload for Unregistered {}

    fn mapper() -> Arc<MessageMapper> {
        Arc::new(MessageMapper::builder().register::<OrderPlaced>().build())
    }

    #[tokio::test]
    async fn test_publish_wraps_in_family_envelope() {
        let transport = Arc::new(InMemoryTransport::new());
        let publisher = Publisher::integration(mapper(), transport.clone());

        publisher
            .publish(OrderPlaced { id: 42 }, None, Some("orders"), None)
            .await
            .unwrap();

        let published = transport.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].routing_key.as_deref(), Some("orders"));
        let typed = published[0]
            .envelope
            .downcast_ref::<IntegrationMessage<OrderPlaced>>()
            .unwrap();
        assert_eq!(typed.content(), &OrderPlaced { id: 42 });
    }

    #[tokio::test]
    async fn test_publish_uses_clock_for_generated_metadata() {
        let clock = test_clock();
        let transport = Arc::new(InMemoryTransport::new());
        let publisher = Publisher::domain(mapper(), transport.clone()).with_clock(Arc::new(clock));

        publisher.publish(OrderPlaced { id: 1 }, None, None, None).await.unwrap();

        let published = transport.published();
        assert_eq!(published[0].envelope.metadata().created_at(), clock.now());
    }

    #[tokio::test]
    async fn test_publish_many_shares_generated_metadata() {
        let transport = Arc::new(InMemoryTransport::new());
        let publisher = Publisher::domain(mapper(), transport.clone());

        publisher
            .publish_many(
                vec![Box::new(OrderPlaced { id: 1 }), Box::new(OrderPlaced { id: 2 })],
                None,
                None,
                None,
            )
            .await
            .unwrap();

        let published = transport.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].envelope.metadata(), published[1].envelope.metadata());
        assert_ne!(published[0].envelope.message_id(), published[1].envelope.message_id());
        let first = published[0].envelope.downcast_ref::<DomainMessage<OrderPlaced>>().unwrap();
        assert_eq!(first.content().id, 1);
    }

    #[tokio::test]
    async fn test_publish_many_mapping_failure_publishes_nothing() {
        let transport = Arc::new(InMemoryTransport::new());
        let publisher = Publisher::domain(mapper(), transport.clone());

        let result = publisher
            .publish_many(
                vec![Box::new(OrderPlaced { id: 1 }), Box::new(Unregistered)],
                None,
                None,
                None,
            )
            .await;

        assert!(matches!(result, Err(MessagingError::UnregisteredPayload(_))));
        assert!(transport.published().is_empty());
    }

    #[tokio::test]
    async fn test_empty_batch_skips_transport() {
        let transport = Arc::new(InMemoryTransport::new());
        let publisher = Publisher::domain(mapper(), transport.clone());

        publisher.publish_many(Vec::new(), None, None, None).await.unwrap();

        assert_eq!(transport.publish_calls(), 0);
    }

    #[tokio::test]
    async fn test_transport_error_propagates_unchanged() {
        let transport = Arc::new(InMemoryTransport::new());
        transport.fail_next_publishes(1, MessagingError::TransportUnavailable("broker down".into()));
        let publisher = Publisher::domain(mapper(), transport.clone());

        let result = publisher.publish(OrderPlaced { id: 1 }, None, None, None).await;

        assert_eq!(result, Err(MessagingError::TransportUnavailable("broker down".into())));
        assert_eq!(transport.publish_calls(), 1);
    }

    #[tokio::test]
    async fn test_already_cancelled_signal_fails() {
        let transport = Arc::new(InMemoryTransport::new());
        let publisher = Publisher::domain(mapper(), transport.clone());
        let cancel = CancellationSignal::new();
        cancel.cancel();

        let result = publisher
            .publish(OrderPlaced { id: 1 }, None, None, Some(&cancel))
            .await;

        assert_eq!(result, Err(MessagingError::Cancelled));
        assert!(transport.published().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_during_slow_delivery_fails() {
        let transport = Arc::new(InMemoryTransport::new().with_publish_delay(Duration::from_secs(30)));
        let publisher = Publisher::domain(mapper(), transport.clone());
        let cancel = CancellationSignal::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            publisher.publish(OrderPlaced { id: 1 }, None, None, Some(&cancel)),
        )
        .await
        .unwrap();

        assert_eq!(result, Err(MessagingError::Cancelled));
    }

    #[tokio::test]
    async fn test_publishing_a_received_envelope_is_rejected() {
        let transport = Arc::new(InMemoryTransport::new());
        let publisher = Publisher::integration(mapper(), transport.clone());
        let received = MessageMapper::to_domain(OrderPlaced { id: 1 }, Metadata::generate(&SystemClock)).unwrap();

        let result = publisher.publish(received, None, None, None).await;

        assert!(matches!(result, Err(MessagingError::InvalidPayload { .. })));
        assert!(transport.published().is_empty());
    }
}
