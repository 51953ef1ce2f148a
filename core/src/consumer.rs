//! Transport-facing receive capabilities.
//!
//! Two levels of abstraction:
//!
//! - [`MessageConsumer`]: a complete consumer the supervisor can start and stop.
//! - [`MessageSource`]: the raw subscription a broker binding exposes. The
//!   runtime's `TransportConsumer` turns any source into a consumer.

use crate::cancellation::CancellationSignal;
use crate::error::MessagingError;
use crate::message::Message;
use futures::Stream;
use futures::future::BoxFuture;
use std::pin::Pin;
use std::sync::Arc;

/// A long-running consumer supervised by the runtime.
///
/// # Contract
///
/// `start` subscribes, feeds every received envelope to the dispatcher, and
/// suspends until `cancel` fires. Returning `Ok(())` or
/// `Err(MessagingError::Cancelled)` after cancellation is expected control flow;
/// any other error is treated as a fault by the supervisor.
pub trait MessageConsumer: Send + Sync {
    /// Name used in logs and metrics.
    fn name(&self) -> &str;

    /// Run until `cancel` fires or the subscription fails.
    ///
    /// # Errors
    ///
    /// Returns the transport failure, or [`MessagingError::Cancelled`].
    fn start(&self, cancel: CancellationSignal) -> BoxFuture<'_, Result<(), MessagingError>>;
}

/// One delivery from a subscription.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Transport-assigned tag used for acknowledgement
    pub tag: u64,
    /// The decoded envelope. `None` when the transport delivered an empty or
    /// undecodable frame.
    pub message: Option<Arc<dyn Message>>,
    /// Whether the transport has delivered this frame before
    pub redelivered: bool,
}

/// Stream of deliveries from a subscription.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, MessagingError>> + Send>>;

/// Subscription capability of a broker binding.
pub trait MessageSource: Send + Sync {
    /// Open a subscription against `queue`.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::TransportUnavailable`] if the broker cannot be reached.
    fn subscribe<'a>(&'a self, queue: &'a str) -> BoxFuture<'a, Result<DeliveryStream, MessagingError>>;

    /// Acknowledge a processed delivery.
    ///
    /// # Errors
    ///
    /// Returns the transport failure.
    fn ack<'a>(&'a self, queue: &'a str, delivery: &'a Delivery) -> BoxFuture<'a, Result<(), MessagingError>>;

    /// Reject a delivery. `requeue` asks the broker to redeliver it.
    ///
    /// # Errors
    ///
    /// Returns the transport failure.
    fn nack<'a>(
        &'a self,
        queue: &'a str,
        delivery: &'a Delivery,
        requeue: bool,
    ) -> BoxFuture<'a, Result<(), MessagingError>>;
}
