//! Transport-facing publish capability.
//!
//! The [`ExternalPublisher`] is what a broker binding implements. The core only
//! hands it fully built envelopes; serialization, connection management and
//! delivery confirmation belong to the implementation.

use crate::cancellation::CancellationSignal;
use crate::error::MessagingError;
use crate::message::Message;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Delivers envelopes to a transport.
///
/// # Contract
///
/// - Must fail (not silently drop) when the transport is unreachable,
///   typically with [`MessagingError::TransportUnavailable`].
/// - Should observe `cancel` and return [`MessagingError::Cancelled`] when it
///   fires before delivery is confirmed.
/// - Ordering across a batch is not guaranteed.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; one instance is shared by every
/// publisher in the process.
pub trait ExternalPublisher: Send + Sync {
    /// Publish a single envelope.
    ///
    /// # Errors
    ///
    /// Returns the transport's failure unchanged.
    fn publish<'a>(
        &'a self,
        envelope: Arc<dyn Message>,
        routing_key: Option<&'a str>,
        cancel: &'a CancellationSignal,
    ) -> BoxFuture<'a, Result<(), MessagingError>>;

    /// Publish a batch of envelopes.
    ///
    /// # Errors
    ///
    /// Returns the transport's failure unchanged.
    fn publish_many<'a>(
        &'a self,
        envelopes: Vec<Arc<dyn Message>>,
        routing_key: Option<&'a str>,
        cancel: &'a CancellationSignal,
    ) -> BoxFuture<'a, Result<(), MessagingError>>;
}

impl<P: ExternalPublisher + ?Sized> ExternalPublisher for Arc<P> {
    fn publish<'a>(
        &'a self,
        envelope: Arc<dyn Message>,
        routing_key: Option<&'a str>,
        cancel: &'a CancellationSignal,
    ) -> BoxFuture<'a, Result<(), MessagingError>> {
        (**self).publish(envelope, routing_key, cancel)
    }

    fn publish_many<'a>(
        &'a self,
        envelopes: Vec<Arc<dyn Message>>,
        routing_key: Option<&'a str>,
        cancel: &'a CancellationSignal,
    ) -> BoxFuture<'a, Result<(), MessagingError>> {
        (**self).publish_many(envelopes, routing_key, cancel)
    }
}
