//! Handler registry.
//!
//! Maps an envelope's exact [`TypeId`] to the handlers registered for it.
//! Handlers are stored type-erased behind one uniform entry point
//! ([`HandlerEntry::invoke`]), so the dispatcher never needs to know the
//! concrete envelope type: it looks the handlers up and calls them.
//!
//! The registry is assembled once through [`HandlerRegistryBuilder`] and is
//! immutable afterwards. Share it behind an `Arc`.
//!
//! # Example
//!
//! ```
//! use courier_core::cancellation::CancellationSignal;
//! use courier_core::handler::{Handler, HandlerError};
//! use courier_core::message::{DomainMessage, Payload};
//! use courier_runtime::registry::HandlerRegistry;
//! use futures::future::BoxFuture;
//! use std::any::TypeId;
//!
//! #[derive(Debug, Clone, serde::Serialize)]
//! struct OrderPlaced {
//!     id: u64,
//! }
//! impl Payload for OrderPlaced {}
//!
//! struct ReserveStock;
//!
//! impl Handler<DomainMessage<OrderPlaced>> for ReserveStock {
//!     fn handle<'a>(
//!         &'a self,
//!         _message: &'a DomainMessage<OrderPlaced>,
//!         _cancel: &'a CancellationSignal,
//!     ) -> BoxFuture<'a, Result<(), HandlerError>> {
//!         Box::pin(async { Ok(()) })
//!     }
//! }
//!
//! let registry = HandlerRegistry::builder()
//!     .register::<DomainMessage<OrderPlaced>, _>(ReserveStock)
//!     .build();
//!
//! assert_eq!(registry.handlers_for(TypeId::of::<DomainMessage<OrderPlaced>>()).len(), 1);
//! ```

use courier_core::cancellation::CancellationSignal;
use courier_core::handler::{Handler, HandlerError};
use courier_core::message::{Message, short_type_name};
use futures::future::BoxFuture;
use smallvec::SmallVec;
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Most envelope types have one or two handlers.
type HandlerList = SmallVec<[HandlerEntry; 2]>;

trait ErasedHandler: Send + Sync {
    fn name(&self) -> &str;

    fn invoke<'a>(
        &'a self,
        message: &'a dyn Message,
        cancel: &'a CancellationSignal,
    ) -> BoxFuture<'a, Result<(), HandlerError>>;
}

struct TypedHandler<M, H: ?Sized> {
    handler: Arc<H>,
    _message: PhantomData<fn(&M)>,
}

impl<M, H> ErasedHandler for TypedHandler<M, H>
where
    M: Message,
    H: Handler<M> + ?Sized,
{
    fn name(&self) -> &str {
        self.handler.name()
    }

    fn invoke<'a>(
        &'a self,
        message: &'a dyn Message,
        cancel: &'a CancellationSignal,
    ) -> BoxFuture<'a, Result<(), HandlerError>> {
        match message.downcast_ref::<M>() {
            Some(typed) => self.handler.handle(typed, cancel),
            None => {
                let error = format!(
                    "{} was registered for {} but received {}",
                    self.handler.name(),
                    std::any::type_name::<M>(),
                    message.name()
                );
                Box::pin(async move { Err(error.into()) })
            }
        }
    }
}

/// A registered handler, invocable with any envelope.
#[derive(Clone)]
pub struct HandlerEntry {
    inner: Arc<dyn ErasedHandler>,
}

impl HandlerEntry {
    /// Handler name for logs and error reports.
    #[must_use]
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Invoke the handler.
    ///
    /// # Errors
    ///
    /// The handler's own error, or a type mismatch error if `message` is not
    /// the envelope type this entry was registered for.
    pub fn invoke<'a>(
        &'a self,
        message: &'a dyn Message,
        cancel: &'a CancellationSignal,
    ) -> BoxFuture<'a, Result<(), HandlerError>> {
        self.inner.invoke(message, cancel)
    }
}

impl fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HandlerEntry").field(&self.name()).finish()
    }
}

/// Immutable lookup table from envelope type to handlers.
#[derive(Debug, Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TypeId, HandlerList>,
    names: HashMap<TypeId, String>,
}

impl HandlerRegistry {
    /// Start building a registry.
    #[must_use]
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder {
            registry: Self::default(),
        }
    }

    /// Handlers registered for the envelope type `envelope_type`, in
    /// registration order. Empty when none are registered.
    #[must_use]
    pub fn handlers_for(&self, envelope_type: TypeId) -> &[HandlerEntry] {
        self.handlers
            .get(&envelope_type)
            .map(|list| list.as_slice())
            .unwrap_or_default()
    }

    /// Handlers for the runtime type of `message`.
    #[must_use]
    pub fn handlers_for_message(&self, message: &dyn Message) -> &[HandlerEntry] {
        self.handlers_for(message.envelope_type_id())
    }

    /// Total number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.values().map(SmallVec::len).sum()
    }

    /// Whether no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Envelope types with at least one handler, as short labels such as
    /// `DomainMessage<OrderPlaced>` with their handler counts, sorted by label.
    #[must_use]
    pub fn summary(&self) -> Vec<(String, usize)> {
        let mut summary: Vec<_> = self
            .handlers
            .iter()
            .map(|(type_id, list)| {
                let label = self.names.get(type_id).cloned().unwrap_or_default();
                (label, list.len())
            })
            .collect();
        summary.sort_unstable();
        summary
    }
}

/// Builder for [`HandlerRegistry`].
#[derive(Debug)]
pub struct HandlerRegistryBuilder {
    registry: HandlerRegistry,
}

impl HandlerRegistryBuilder {
    /// Register `handler` for envelope type `M`.
    #[must_use]
    pub fn register<M, H>(self, handler: H) -> Self
    where
        M: Message,
        H: Handler<M> + 'static,
    {
        self.register_shared::<M, H>(Arc::new(handler))
    }

    /// Register a shared handler for envelope type `M`.
    ///
    /// Lets one handler instance serve several envelope types.
    #[must_use]
    pub fn register_shared<M, H>(mut self, handler: Arc<H>) -> Self
    where
        M: Message,
        H: Handler<M> + ?Sized + 'static,
    {
        let type_id = TypeId::of::<M>();
        let entry = HandlerEntry {
            inner: Arc::new(TypedHandler::<M, H> {
                handler,
                _message: PhantomData,
            }),
        };

        tracing::debug!(
            envelope = std::any::type_name::<M>(),
            handler = entry.name(),
            "Registering handler"
        );

        self.registry
            .names
            .entry(type_id)
            .or_insert_with(envelope_label::<M>);
        self.registry.handlers.entry(type_id).or_default().push(entry);
        self
    }

    /// Finish building.
    #[must_use]
    pub fn build(self) -> HandlerRegistry {
        self.registry
    }
}

/// `DomainMessage<OrderPlaced>` style label for an envelope type.
fn envelope_label<M>() -> String {
    let full = std::any::type_name::<M>();
    match full.split_once('<') {
        Some((_, inner)) => format!(
            "{}<{}>",
            short_type_name(full),
            short_type_name(inner.trim_end_matches('>'))
        ),
        None => short_type_name(full).to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code
mod tests {
    use super::*;
    use courier_core::environment::SystemClock;
    use courier_core::mapper::MessageMapper;
    use courier_core::message::{DomainMessage, IntegrationMessage, Payload};
    use courier_core::metadata::Metadata;
    use serde::Serialize;

    #[derive(Debug, Clone, Serialize)]
    struct OrderPlaced;
    impl Payload for OrderPlaced {}

    #[derive(Debug, Clone, Serialize)]
    struct OrderCancelled;
    impl Payload for OrderCancelled {}

    struct Noop;

    impl<M: Message> Handler<M> for Noop {
        fn handle<'a>(&'a self, _message: &'a M, _cancel: &'a CancellationSignal) -> BoxFuture<'a, Result<(), HandlerError>> {
            Box::pin(async { Ok(()) })
        }
    }

    #[test]
    fn test_lookup_is_keyed_by_exact_envelope_type() {
        let registry = HandlerRegistry::builder()
            .register::<DomainMessage<OrderPlaced>, _>(Noop)
            .register::<DomainMessage<OrderPlaced>, _>(Noop)
            .register::<IntegrationMessage<OrderCancelled>, _>(Noop)
            .build();

        assert_eq!(registry.handlers_for(TypeId::of::<DomainMessage<OrderPlaced>>()).len(), 2);
        assert!(registry.handlers_for(TypeId::of::<DomainMessage<OrderCancelled>>()).is_empty());
        assert!(registry.handlers_for(TypeId::of::<IntegrationMessage<OrderPlaced>>()).is_empty());
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_empty_registry() {
        let registry = HandlerRegistry::builder().build();
        assert!(registry.is_empty());
        assert!(registry.handlers_for(TypeId::of::<DomainMessage<OrderPlaced>>()).is_empty());
    }

    #[test]
    fn test_summary_uses_short_labels() {
        let registry = HandlerRegistry::builder()
            .register::<DomainMessage<OrderPlaced>, _>(Noop)
            .build();
        assert_eq!(registry.summary(), vec![("DomainMessage<OrderPlaced>".to_string(), 1)]);
    }

    #[test]
    fn test_handler_name_defaults_to_type_name() {
        let registry = HandlerRegistry::builder()
            .register::<DomainMessage<OrderPlaced>, _>(Noop)
            .build();
        let entry = &registry.handlers_for(TypeId::of::<DomainMessage<OrderPlaced>>())[0];
        assert_eq!(entry.name(), "Noop");
    }

    #[tokio::test]
    async fn test_invoke_with_wrong_envelope_type_errors() {
        let registry = HandlerRegistry::builder()
            .register::<DomainMessage<OrderPlaced>, _>(Noop)
            .build();
        let entry = registry.handlers_for(TypeId::of::<DomainMessage<OrderPlaced>>())[0].clone();
        let other = MessageMapper::to_domain(OrderCancelled, Metadata::generate(&SystemClock)).unwrap();

        let result = entry.invoke(&other, &CancellationSignal::new()).await;

        assert!(result.is_err());
    }
}
