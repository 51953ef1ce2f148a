//! Handler trait for inbound envelopes.

use crate::cancellation::CancellationSignal;
use crate::message::Message;
use futures::future::BoxFuture;

/// Error type returned by handlers.
///
/// Handlers are business code; any error type can be boxed into this.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Caller-supplied unit of business logic for one concrete envelope type.
///
/// `M` is the exact envelope type, e.g. `DomainMessage<UserRegistered>`. A type
/// may implement `Handler` for several envelope types and be registered once per
/// type.
///
/// # Dyn Compatibility
///
/// Like the transport traits, this uses an explicit boxed future instead of
/// `async fn` so handlers can be stored as `Arc<dyn Handler<M>>`.
///
/// # Example
///
/// ```
/// use courier_core::cancellation::CancellationSignal;
/// use courier_core::handler::{Handler, HandlerError};
/// use courier_core::message::{DomainMessage, Payload};
/// use futures::future::BoxFuture;
///
/// #[derive(Debug, Clone, serde::Serialize)]
/// struct UserRegistered {
///     email: String,
/// }
/// impl Payload for UserRegistered {}
///
/// struct SendWelcomeEmail;
///
/// impl Handler<DomainMessage<UserRegistered>> for SendWelcomeEmail {
///     fn handle<'a>(
///         &'a self,
///         message: &'a DomainMessage<UserRegistered>,
///         _cancel: &'a CancellationSignal,
///     ) -> BoxFuture<'a, Result<(), HandlerError>> {
///         Box::pin(async move {
///             println!("welcome {}", message.content().email);
///             Ok(())
///         })
///     }
/// }
/// ```
pub trait Handler<M: Message>: Send + Sync {
    /// Process one envelope.
    ///
    /// Long-running handlers should observe `cancel` and return early when it fires.
    ///
    /// # Errors
    ///
    /// Any error is reported to the dispatcher, which surfaces it as
    /// `MessagingError::HandlerFailed`.
    fn handle<'a>(
        &'a self,
        message: &'a M,
        cancel: &'a CancellationSignal,
    ) -> BoxFuture<'a, Result<(), HandlerError>>;

    /// Name used in logs and error reports.
    fn name(&self) -> &str {
        crate::message::short_type_name(std::any::type_name::<Self>())
    }
}
