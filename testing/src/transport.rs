//! In-memory transport.
//!
//! [`InMemoryTransport`] implements both sides of a broker binding:
//! [`ExternalPublisher`] records everything published, and [`MessageSource`]
//! serves per-queue subscriptions fed by [`InMemoryTransport::deliver`].
//! Publishing loops back into a queue when the envelope's family has a route.
//!
//! Subscribers of one queue compete for deliveries (round robin). Deliveries
//! made while nobody is subscribed are kept and handed to the next subscriber.

use crate::wait_until;
use courier_core::cancellation::CancellationSignal;
use courier_core::consumer::{Delivery, DeliveryStream, MessageSource};
use courier_core::error::MessagingError;
use courier_core::message::{Message, MessageFamily};
use courier_core::publisher::ExternalPublisher;
use futures::future::BoxFuture;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tokio::time::error::Elapsed;

/// One recorded publish.
#[derive(Debug, Clone)]
pub struct PublishedEnvelope {
    /// The envelope handed to the transport
    pub envelope: Arc<dyn Message>,
    /// Routing key passed with it
    pub routing_key: Option<String>,
}

/// One recorded negative acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NackRecord {
    /// Delivery tag
    pub tag: u64,
    /// Whether redelivery was requested
    pub requeue: bool,
}

#[derive(Default)]
struct Queue {
    subscribers: Vec<mpsc::UnboundedSender<Delivery>>,
    next_subscriber: usize,
    backlog: VecDeque<Delivery>,
    acked: Vec<u64>,
    nacked: Vec<NackRecord>,
}

impl Queue {
    fn live_subscribers(&mut self) -> usize {
        self.subscribers.retain(|sender| !sender.is_closed());
        self.subscribers.len()
    }

    fn push(&mut self, mut delivery: Delivery) {
        while self.live_subscribers() > 0 {
            let index = self.next_subscriber % self.subscribers.len();
            self.next_subscriber = self.next_subscriber.wrapping_add(1);
            match self.subscribers[index].send(delivery) {
                Ok(()) => return,
                Err(mpsc::error::SendError(returned)) => delivery = returned,
            }
        }
        self.backlog.push_back(delivery);
    }
}

#[derive(Default)]
struct FailureScript {
    remaining: usize,
    error: Option<MessagingError>,
}

impl FailureScript {
    fn take(&mut self) -> Option<MessagingError> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        self.error.clone()
    }
}

#[derive(Default)]
struct State {
    published: Vec<PublishedEnvelope>,
    publish_calls: usize,
    subscribe_calls: usize,
    publish_failures: FailureScript,
    subscribe_failures: FailureScript,
    queues: HashMap<String, Queue>,
    next_tag: u64,
}

impl State {
    fn queue(&mut self, name: &str) -> &mut Queue {
        self.queues.entry(name.to_string()).or_default()
    }

    fn next_delivery(&mut self, message: Option<Arc<dyn Message>>, redelivered: bool) -> Delivery {
        self.next_tag += 1;
        Delivery {
            tag: self.next_tag,
            message,
            redelivered,
        }
    }
}

/// Broker stand-in backed by in-process channels.
///
/// # Example
///
/// ```
/// use courier_testing::InMemoryTransport;
/// use courier_core::message::MessageFamily;
///
/// let transport = InMemoryTransport::new().route(MessageFamily::Domain, "orders");
/// assert_eq!(transport.subscription_count("orders"), 0);
/// ```
#[derive(Default)]
pub struct InMemoryTransport {
    state: Mutex<State>,
    changed: Notify,
    routes: HashMap<MessageFamily, String>,
    publish_delay: Option<Duration>,
    redeliver_requeued: bool,
}

impl InMemoryTransport {
    /// Create an empty transport with no routes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver published envelopes of `family` into `queue`.
    #[must_use]
    pub fn route(mut self, family: MessageFamily, queue: impl Into<String>) -> Self {
        self.routes.insert(family, queue.into());
        self
    }

    /// Hold every publish for `delay` before accepting it. Cancellation ends
    /// the wait early.
    #[must_use]
    pub const fn with_publish_delay(mut self, delay: Duration) -> Self {
        self.publish_delay = Some(delay);
        self
    }

    /// Redeliver a nacked delivery when requeue is requested.
    #[must_use]
    pub const fn with_redelivery(mut self) -> Self {
        self.redeliver_requeued = true;
        self
    }

    /// Fail the next `count` publish calls with `error`.
    pub fn fail_next_publishes(&self, count: usize, error: MessagingError) {
        self.lock().publish_failures = FailureScript {
            remaining: count,
            error: Some(error),
        };
    }

    /// Fail the next `count` subscribe calls with `error`.
    pub fn fail_next_subscribes(&self, count: usize, error: MessagingError) {
        self.lock().subscribe_failures = FailureScript {
            remaining: count,
            error: Some(error),
        };
    }

    /// Everything accepted so far, in publish order.
    #[must_use]
    pub fn published(&self) -> Vec<PublishedEnvelope> {
        self.lock().published.clone()
    }

    /// Number of `publish`/`publish_many` calls, failed ones included.
    #[must_use]
    pub fn publish_calls(&self) -> usize {
        self.lock().publish_calls
    }

    /// Number of `subscribe` calls on any queue, failed ones included.
    #[must_use]
    pub fn subscribe_calls(&self) -> usize {
        self.lock().subscribe_calls
    }

    /// Number of open subscriptions on `queue`.
    #[must_use]
    pub fn subscription_count(&self, queue: &str) -> usize {
        self.lock().queues.get_mut(queue).map_or(0, Queue::live_subscribers)
    }

    /// Push a delivery into `queue` and return its tag. `None` simulates an
    /// empty frame.
    pub fn deliver(&self, queue: &str, message: Option<Arc<dyn Message>>) -> u64 {
        let tag = {
            let mut state = self.lock();
            let delivery = state.next_delivery(message, false);
            let tag = delivery.tag;
            state.queue(queue).push(delivery);
            tag
        };
        self.changed.notify_waiters();
        tag
    }

    /// Tags acknowledged on `queue`.
    #[must_use]
    pub fn acked(&self, queue: &str) -> Vec<u64> {
        self.lock().queues.get(queue).map(|q| q.acked.clone()).unwrap_or_default()
    }

    /// Negative acknowledgements on `queue`.
    #[must_use]
    pub fn nacked(&self, queue: &str) -> Vec<NackRecord> {
        self.lock().queues.get(queue).map(|q| q.nacked.clone()).unwrap_or_default()
    }

    /// End every open subscription on `queue`, as a broker dropping the
    /// connection would.
    pub fn close_subscriptions(&self, queue: &str) {
        if let Some(queue) = self.lock().queues.get_mut(queue) {
            queue.subscribers.clear();
        }
        self.changed.notify_waiters();
    }

    /// Wait until `queue` has at least `count` open subscriptions.
    ///
    /// # Errors
    ///
    /// Returns [`Elapsed`] on timeout.
    pub async fn wait_for_subscribers(&self, queue: &str, count: usize, timeout: Duration) -> Result<(), Elapsed> {
        wait_until(&self.changed, timeout, || self.subscription_count(queue) >= count).await
    }

    /// Wait until `subscribe` has been called at least `count` times.
    ///
    /// # Errors
    ///
    /// Returns [`Elapsed`] on timeout.
    pub async fn wait_for_subscribe_calls(&self, count: usize, timeout: Duration) -> Result<(), Elapsed> {
        wait_until(&self.changed, timeout, || self.subscribe_calls() >= count).await
    }

    /// Wait until `queue` has at least `count` acks.
    ///
    /// # Errors
    ///
    /// Returns [`Elapsed`] on timeout.
    pub async fn wait_for_acks(&self, queue: &str, count: usize, timeout: Duration) -> Result<(), Elapsed> {
        wait_until(&self.changed, timeout, || self.acked(queue).len() >= count).await
    }

    /// Wait until `queue` has at least `count` nacks.
    ///
    /// # Errors
    ///
    /// Returns [`Elapsed`] on timeout.
    pub async fn wait_for_nacks(&self, queue: &str, count: usize, timeout: Duration) -> Result<(), Elapsed> {
        wait_until(&self.changed, timeout, || self.nacked(queue).len() >= count).await
    }

    /// Wait until at least `count` envelopes have been published.
    ///
    /// # Errors
    ///
    /// Returns [`Elapsed`] on timeout.
    pub async fn wait_for_published(&self, count: usize, timeout: Duration) -> Result<(), Elapsed> {
        wait_until(&self.changed, timeout, || self.lock().published.len() >= count).await
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn accept(
        &self,
        envelopes: Vec<Arc<dyn Message>>,
        routing_key: Option<&str>,
        cancel: &CancellationSignal,
    ) -> Result<(), MessagingError> {
        let failure = {
            let mut state = self.lock();
            state.publish_calls += 1;
            state.publish_failures.take()
        };
        if let Some(error) = failure {
            return Err(error);
        }

        if cancel.is_cancelled() {
            return Err(MessagingError::Cancelled);
        }
        if let Some(delay) = self.publish_delay {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(MessagingError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }

        {
            let mut state = self.lock();
            for envelope in envelopes {
                if let Some(queue) = self.routes.get(&envelope.family()) {
                    let delivery = state.next_delivery(Some(Arc::clone(&envelope)), false);
                    state.queue(queue).push(delivery);
                }
                state.published.push(PublishedEnvelope {
                    envelope,
                    routing_key: routing_key.map(str::to_string),
                });
            }
        }
        self.changed.notify_waiters();
        Ok(())
    }

    fn open(&self, queue: &str) -> Result<DeliveryStream, MessagingError> {
        let mut receiver = {
            let mut state = self.lock();
            state.subscribe_calls += 1;
            if let Some(error) = state.subscribe_failures.take() {
                return Err(error);
            }
            let queue = state.queue(queue);
            let (sender, receiver) = mpsc::unbounded_channel();
            while let Some(delivery) = queue.backlog.pop_front() {
                // The receiver is alive, so this cannot fail.
                let _ = sender.send(delivery);
            }
            queue.subscribers.push(sender);
            receiver
        };
        self.changed.notify_waiters();

        Ok(Box::pin(async_stream::stream! {
            while let Some(delivery) = receiver.recv().await {
                yield Ok::<Delivery, MessagingError>(delivery);
            }
        }))
    }

    fn settle(&self, queue: &str, delivery: &Delivery, nack: Option<bool>) {
        {
            let mut state = self.lock();
            match nack {
                None => state.queue(queue).acked.push(delivery.tag),
                Some(requeue) => {
                    state.queue(queue).nacked.push(NackRecord {
                        tag: delivery.tag,
                        requeue,
                    });
                    if requeue && self.redeliver_requeued {
                        let redelivery = state.next_delivery(delivery.message.clone(), true);
                        state.queue(queue).push(redelivery);
                    }
                }
            }
        }
        self.changed.notify_waiters();
    }
}

impl ExternalPublisher for InMemoryTransport {
    fn publish<'a>(
        &'a self,
        envelope: Arc<dyn Message>,
        routing_key: Option<&'a str>,
        cancel: &'a CancellationSignal,
    ) -> BoxFuture<'a, Result<(), MessagingError>> {
        Box::pin(self.accept(vec![envelope], routing_key, cancel))
    }

    fn publish_many<'a>(
        &'a self,
        envelopes: Vec<Arc<dyn Message>>,
        routing_key: Option<&'a str>,
        cancel: &'a CancellationSignal,
    ) -> BoxFuture<'a, Result<(), MessagingError>> {
        Box::pin(self.accept(envelopes, routing_key, cancel))
    }
}

impl MessageSource for InMemoryTransport {
    fn subscribe<'a>(&'a self, queue: &'a str) -> BoxFuture<'a, Result<DeliveryStream, MessagingError>> {
        Box::pin(async move { self.open(queue) })
    }

    fn ack<'a>(&'a self, queue: &'a str, delivery: &'a Delivery) -> BoxFuture<'a, Result<(), MessagingError>> {
        Box::pin(async move {
            self.settle(queue, delivery, None);
            Ok(())
        })
    }

    fn nack<'a>(
        &'a self,
        queue: &'a str,
        delivery: &'a Delivery,
        requeue: bool,
    ) -> BoxFuture<'a, Result<(), MessagingError>> {
        Box::pin(async move {
            self.settle(queue, delivery, Some(requeue));
            Ok(())
        })
    }
}

impl std::fmt::Debug for InMemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTransport")
            .field("routes", &self.routes)
            .field("publish_delay", &self.publish_delay)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code
mod tests {
    use super::*;
    use chrono::DateTime;
    use courier_core::mapper::MessageMapper;
    use courier_core::message::Payload;
    use courier_core::metadata::Metadata;
    use futures::StreamExt;

    #[derive(Debug, Clone, serde::Serialize)]
    struct Ping;
    impl Payload for Ping {}

    fn ping() -> Arc<dyn Message> {
        let metadata = Metadata::new("corr-1", DateTime::from_timestamp(0, 0).unwrap()).unwrap();
        Arc::new(MessageMapper::to_domain(Ping, metadata).unwrap())
    }

    #[tokio::test]
    async fn test_backlog_is_handed_to_first_subscriber() {
        let transport = InMemoryTransport::new();
        let tag = transport.deliver("q", Some(ping()));

        let mut stream = transport.subscribe("q").await.unwrap();
        let delivery = stream.next().await.unwrap().unwrap();

        assert_eq!(delivery.tag, tag);
        assert!(!delivery.redelivered);
        assert_eq!(transport.subscription_count("q"), 1);
    }

    #[tokio::test]
    async fn test_routed_publish_loops_back() {
        let transport = InMemoryTransport::new().route(MessageFamily::Domain, "orders");
        let mut stream = transport.subscribe("orders").await.unwrap();

        transport.publish(ping(), Some("key"), &CancellationSignal::new()).await.unwrap();

        let delivery = stream.next().await.unwrap().unwrap();
        assert!(delivery.message.is_some());
        assert_eq!(transport.published()[0].routing_key.as_deref(), Some("key"));
    }

    #[tokio::test]
    async fn test_requeue_redelivers_when_enabled() {
        let transport = InMemoryTransport::new().with_redelivery();
        let mut stream = transport.subscribe("q").await.unwrap();
        transport.deliver("q", Some(ping()));

        let first = stream.next().await.unwrap().unwrap();
        transport.nack("q", &first, true).await.unwrap();
        let second = stream.next().await.unwrap().unwrap();

        assert!(second.redelivered);
        assert_ne!(first.tag, second.tag);
        assert_eq!(transport.nacked("q"), vec![NackRecord { tag: first.tag, requeue: true }]);
    }

    #[tokio::test]
    async fn test_scripted_subscribe_failure() {
        let transport = InMemoryTransport::new();
        transport.fail_next_subscribes(1, MessagingError::TransportUnavailable("down".into()));

        assert!(transport.subscribe("q").await.is_err());
        assert!(transport.subscribe("q").await.is_ok());
    }

    #[tokio::test]
    async fn test_dropped_stream_is_not_counted() {
        let transport = InMemoryTransport::new();
        let stream = transport.subscribe("q").await.unwrap();
        assert_eq!(transport.subscription_count("q"), 1);

        drop(stream);
        assert_eq!(transport.subscription_count("q"), 0);
    }
}
