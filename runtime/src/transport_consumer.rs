//! A [`MessageConsumer`] built on any [`MessageSource`].
//!
//! Broker bindings only implement the subscription primitives. The
//! [`TransportConsumer`] adds the receive loop:
//!
//! 1. resolve the family's queue name from [`MessagingConfig`]
//! 2. subscribe, racing the subscription against the cancellation signal
//! 3. for each delivery, dispatch and then ack, or nack on failure
//!
//! Nack policy: a handler failure on a first delivery is requeued once. A
//! failure on a redelivery is rejected without requeue, and so is an empty
//! delivery or an envelope of the other family. A delivery interrupted by
//! cancellation is requeued.

use crate::config::MessagingConfig;
use crate::dispatcher::Dispatcher;
use crate::metrics::CONSUMER_REJECTED;
use courier_core::cancellation::CancellationSignal;
use courier_core::consumer::{Delivery, MessageConsumer, MessageSource};
use courier_core::error::MessagingError;
use courier_core::message::MessageFamily;
use futures::StreamExt;
use futures::future::BoxFuture;
use metrics::counter;
use std::sync::Arc;

/// Receive loop over a [`MessageSource`] for one family.
pub struct TransportConsumer {
    name: String,
    family: MessageFamily,
    config: Arc<MessagingConfig>,
    source: Arc<dyn MessageSource>,
    dispatcher: Dispatcher,
}

impl TransportConsumer {
    /// Create a consumer of `family` messages.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        family: MessageFamily,
        config: Arc<MessagingConfig>,
        source: Arc<dyn MessageSource>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            name: name.into(),
            family,
            config,
            source,
            dispatcher,
        }
    }

    /// Family this consumer receives.
    #[must_use]
    pub const fn family(&self) -> MessageFamily {
        self.family
    }

    async fn consume(&self, cancel: CancellationSignal) -> Result<(), MessagingError> {
        let queue = self.config.queue_name(self.family)?.to_string();

        let mut deliveries = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(MessagingError::Cancelled),
            subscription = self.source.subscribe(&queue) => subscription?,
        };
        tracing::info!(consumer = %self.name, queue = %queue, "Subscribed");

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(MessagingError::Cancelled),
                next = deliveries.next() => next,
            };

            match next {
                Some(Ok(delivery)) => self.process(&queue, &delivery, &cancel).await?,
                Some(Err(error)) => return Err(error),
                None => {
                    return Err(MessagingError::TransportUnavailable(format!(
                        "subscription to {queue} closed"
                    )));
                }
            }
        }
    }

    async fn process(&self, queue: &str, delivery: &Delivery, cancel: &CancellationSignal) -> Result<(), MessagingError> {
        let foreign = delivery
            .message
            .as_deref()
            .filter(|message| message.family() != self.family);
        if let Some(message) = foreign {
            tracing::warn!(
                consumer = %self.name,
                tag = delivery.tag,
                message = message.name(),
                family = %message.family(),
                expected = %self.family,
                "Delivery carries an envelope of the wrong family"
            );
            counter!(CONSUMER_REJECTED, "consumer" => self.name.clone(), "family" => message.family().as_str())
                .increment(1);
            return self.source.nack(queue, delivery, false).await;
        }

        match self.dispatcher.handle(delivery.message.clone(), Some(cancel)).await {
            Ok(handled) => {
                tracing::trace!(consumer = %self.name, tag = delivery.tag, handled, "Delivery processed");
                self.source.ack(queue, delivery).await
            }
            Err(MessagingError::Cancelled) => {
                self.source.nack(queue, delivery, true).await?;
                Err(MessagingError::Cancelled)
            }
            Err(error) => {
                let requeue = matches!(error, MessagingError::HandlerFailed { .. }) && !delivery.redelivered;
                tracing::warn!(
                    consumer = %self.name,
                    tag = delivery.tag,
                    requeue,
                    error = %error,
                    "Delivery rejected"
                );
                self.source.nack(queue, delivery, requeue).await
            }
        }
    }
}

impl MessageConsumer for TransportConsumer {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self, cancel: CancellationSignal) -> BoxFuture<'_, Result<(), MessagingError>> {
        Box::pin(self.consume(cancel))
    }
}

impl std::fmt::Debug for TransportConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportConsumer")
            .field("name", &self.name)
            .field("family", &self.family)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code
mod tests {
    use super::*;
    use crate::registry::HandlerRegistry;
    use courier_core::environment::SystemClock;
    use courier_core::mapper::MessageMapper;
    use courier_core::message::{DomainMessage, IntegrationMessage, Message, Payload};
    use courier_core::metadata::Metadata;
    use courier_testing::{InMemoryTransport, RecordingHandler};
    use serde::Serialize;
    use std::time::Duration;

    #[derive(Debug, Clone, Serialize)]
    struct OrderPlaced {
        id: u64,
    }
    impl Payload for OrderPlaced {}

    fn config() -> Arc<MessagingConfig> {
        Arc::new(MessagingConfig {
            domain_queue: Some("orders".to_string()),
            ..MessagingConfig::default()
        })
    }

    fn placed(id: u64) -> Arc<dyn Message> {
        Arc::new(MessageMapper::to_domain(OrderPlaced { id }, Metadata::generate(&SystemClock)).unwrap())
    }

    fn consumer(
        transport: &Arc<InMemoryTransport>,
        handler: &Arc<RecordingHandler>,
        config: Arc<MessagingConfig>,
    ) -> TransportConsumer {
        let registry = HandlerRegistry::builder()
            .register_shared::<DomainMessage<OrderPlaced>, _>(Arc::clone(handler))
            .build();
        TransportConsumer::new(
            "orders-consumer",
            MessageFamily::Domain,
            config,
            transport.clone(),
            Dispatcher::new(Arc::new(registry)),
        )
    }

    #[tokio::test]
    async fn test_missing_queue_fails_before_subscribing() {
        let transport = Arc::new(InMemoryTransport::new());
        let handler = Arc::new(RecordingHandler::new("handler"));
        let consumer = consumer(&transport, &handler, Arc::new(MessagingConfig::default()));

        let result = consumer.start(CancellationSignal::new()).await;

        assert_eq!(
            result,
            Err(MessagingError::ConfigurationMissing("COURIER_DOMAIN_QUEUE".to_string()))
        );
        assert_eq!(transport.subscription_count("orders"), 0);
    }

    #[tokio::test]
    async fn test_dispatches_and_acks() {
        let transport = Arc::new(InMemoryTransport::new());
        let handler = Arc::new(RecordingHandler::new("handler"));
        let consumer = Arc::new(consumer(&transport, &handler, config()));
        let cancel = CancellationSignal::new();

        let task = {
            let consumer = Arc::clone(&consumer);
            let cancel = cancel.clone();
            tokio::spawn(async move { consumer.start(cancel).await })
        };

        transport.wait_for_subscribers("orders", 1, Duration::from_secs(2)).await.unwrap();
        transport.deliver("orders", Some(placed(1)));
        transport.deliver("orders", Some(placed(2)));
        handler.wait_for_calls(2, Duration::from_secs(2)).await.unwrap();
        transport.wait_for_acks("orders", 2, Duration::from_secs(2)).await.unwrap();

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
        assert_eq!(result, Err(MessagingError::Cancelled));
        assert!(transport.nacked("orders").is_empty());
    }

    #[tokio::test]
    async fn test_failures_are_nacked() {
        let transport = Arc::new(InMemoryTransport::new());
        let handler = Arc::new(RecordingHandler::new("handler").failing("boom"));
        let consumer = Arc::new(consumer(&transport, &handler, config()));
        let cancel = CancellationSignal::new();

        let task = {
            let consumer = Arc::clone(&consumer);
            let cancel = cancel.clone();
            tokio::spawn(async move { consumer.start(cancel).await })
        };

        transport.wait_for_subscribers("orders", 1, Duration::from_secs(2)).await.unwrap();
        transport.deliver("orders", None);
        transport.deliver("orders", Some(placed(1)));
        handler.wait_for_calls(1, Duration::from_secs(2)).await.unwrap();
        transport.wait_for_nacks("orders", 2, Duration::from_secs(2)).await.unwrap();

        let nacked = transport.nacked("orders");
        assert_eq!(nacked.len(), 2);
        // Empty delivery is dropped, first handler failure is requeued.
        assert!(!nacked[0].requeue);
        assert!(nacked[1].requeue);

        cancel.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), task).await.unwrap();
    }

    #[tokio::test]
    async fn test_foreign_family_envelope_is_rejected() {
        let transport = Arc::new(InMemoryTransport::new());
        let handler = Arc::new(RecordingHandler::new("handler"));
        let consumer = Arc::new(consumer(&transport, &handler, config()));
        let cancel = CancellationSignal::new();

        let task = {
            let consumer = Arc::clone(&consumer);
            let cancel = cancel.clone();
            tokio::spawn(async move { consumer.start(cancel).await })
        };

        transport.wait_for_subscribers("orders", 1, Duration::from_secs(2)).await.unwrap();
        let foreign: Arc<dyn Message> = Arc::new(
            MessageMapper::to_integration(OrderPlaced { id: 1 }, Metadata::generate(&SystemClock)).unwrap(),
        );
        let tag = transport.deliver("orders", Some(foreign));
        transport.wait_for_nacks("orders", 1, Duration::from_secs(2)).await.unwrap();

        let nacked = transport.nacked("orders");
        assert_eq!(nacked[0].tag, tag);
        assert!(!nacked[0].requeue);
        assert!(transport.acked("orders").is_empty());
        assert_eq!(handler.call_count(), 0);

        cancel.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), task).await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_subscription_is_a_fault() {
        let transport = Arc::new(InMemoryTransport::new());
        let handler = Arc::new(RecordingHandler::new("handler"));
        let consumer = Arc::new(consumer(&transport, &handler, config()));

        let task = {
            let consumer = Arc::clone(&consumer);
            tokio::spawn(async move { consumer.start(CancellationSignal::new()).await })
        };

        transport.wait_for_subscribers("orders", 1, Duration::from_secs(2)).await.unwrap();
        transport.close_subscriptions("orders");

        let result = tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
        assert!(matches!(result, Err(MessagingError::TransportUnavailable(_))));
    }
}
