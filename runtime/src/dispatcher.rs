//! Routes inbound envelopes to their registered handlers.
//!
//! The dispatcher resolves handlers by the envelope's exact runtime type and
//! calls them through [`HandlerEntry::invoke`](crate::registry::HandlerEntry::invoke).
//! An envelope with no handler is not an error: it is logged at debug level,
//! counted, and reported as zero handlers invoked.

use crate::metrics::{DISPATCH_FAILED, DISPATCH_HANDLED, DISPATCH_UNHANDLED};
use crate::registry::HandlerRegistry;
use courier_core::cancellation::CancellationSignal;
use courier_core::error::MessagingError;
use courier_core::message::Message;
use metrics::counter;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;

/// How many of the registered handlers an envelope is offered to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStrategy {
    /// Every handler, in registration order.
    #[default]
    FanOut,
    /// Only the first registered handler.
    FirstMatch,
}

impl DispatchStrategy {
    /// Snake-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FanOut => "fan_out",
            Self::FirstMatch => "first_match",
        }
    }
}

impl FromStr for DispatchStrategy {
    type Err = MessagingError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "fan_out" | "fanout" => Ok(Self::FanOut),
            "first_match" | "firstmatch" => Ok(Self::FirstMatch),
            other => Err(MessagingError::InvalidConfiguration(format!(
                "unknown dispatch strategy '{other}'"
            ))),
        }
    }
}

/// Handler dispatcher.
///
/// Cheap to clone; clones share the registry.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    strategy: DispatchStrategy,
}

impl Dispatcher {
    /// Create a fan-out dispatcher.
    #[must_use]
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self {
            registry,
            strategy: DispatchStrategy::default(),
        }
    }

    /// Choose the dispatch strategy.
    #[must_use]
    pub const fn with_strategy(mut self, strategy: DispatchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Active strategy.
    #[must_use]
    pub const fn strategy(&self) -> DispatchStrategy {
        self.strategy
    }

    /// The registry handlers are resolved from.
    #[must_use]
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Handle a delivery that may not carry an envelope.
    ///
    /// Returns the number of handlers invoked.
    ///
    /// # Errors
    ///
    /// - [`MessagingError::NullMessage`] if `message` is `None`
    /// - see [`Dispatcher::dispatch`]
    pub async fn handle(
        &self,
        message: Option<Arc<dyn Message>>,
        cancel: Option<&CancellationSignal>,
    ) -> Result<usize, MessagingError> {
        let message = message.ok_or(MessagingError::NullMessage)?;
        let cancel = cancel.cloned().unwrap_or_default();
        self.dispatch(message.as_ref(), &cancel).await
    }

    /// Invoke the handlers registered for the runtime type of `message`.
    ///
    /// Under [`DispatchStrategy::FanOut`] a failing handler does not prevent the
    /// remaining handlers from running; the first failure is returned once all
    /// of them have been attempted.
    ///
    /// # Errors
    ///
    /// - [`MessagingError::Cancelled`] if `cancel` fires before a handler starts,
    ///   or a handler fails after it fired
    /// - [`MessagingError::HandlerFailed`] for the first handler that failed
    pub async fn dispatch(
        &self,
        message: &dyn Message,
        cancel: &CancellationSignal,
    ) -> Result<usize, MessagingError> {
        let handlers = self.registry.handlers_for_message(message);

        if handlers.is_empty() {
            tracing::debug!(
                message = message.name(),
                message_id = message.message_id(),
                family = %message.family(),
                "No handler registered"
            );
            counter!(DISPATCH_UNHANDLED, "message" => message.name().to_string()).increment(1);
            return Ok(0);
        }

        let selected = match self.strategy {
            DispatchStrategy::FanOut => handlers.len(),
            DispatchStrategy::FirstMatch => 1,
        };

        let mut invoked = 0;
        let mut first_failure = None;

        for entry in handlers.iter().take(selected) {
            if cancel.is_cancelled() {
                tracing::debug!(message = message.name(), invoked, "Dispatch cancelled");
                return Err(MessagingError::Cancelled);
            }

            invoked += 1;
            match entry.invoke(message, cancel).await {
                Ok(()) => {
                    counter!(DISPATCH_HANDLED, "message" => message.name().to_string()).increment(1);
                }
                Err(error) if cancel.is_cancelled() => {
                    tracing::debug!(handler = entry.name(), error = %error, "Handler interrupted by cancellation");
                    return Err(MessagingError::Cancelled);
                }
                Err(error) => {
                    tracing::warn!(
                        handler = entry.name(),
                        message = message.name(),
                        message_id = message.message_id(),
                        correlation_id = message.metadata().correlation_id(),
                        error = %error,
                        "Handler failed"
                    );
                    counter!(
                        DISPATCH_FAILED,
                        "message" => message.name().to_string(),
                        "handler" => entry.name().to_string()
                    )
                    .increment(1);

                    if first_failure.is_none() {
                        first_failure = Some(MessagingError::HandlerFailed {
                            handler: entry.name().to_string(),
                            message: message.name().to_string(),
                            reason: error.to_string(),
                        });
                    }
                }
            }
        }

        match first_failure {
            Some(error) => Err(error),
            None => Ok(invoked),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)] // Test code
mod tests {
    use super::*;
    use courier_core::environment::SystemClock;
    use courier_core::mapper::MessageMapper;
    use courier_core::message::{DomainMessage, Payload};
    use courier_core::metadata::Metadata;
    use courier_testing::{CallLog, RecordingHandler};
    use serde::Serialize;

    #[derive(Debug, Clone, Serialize)]
    struct OrderPlaced {
        id: u64,
    }
    impl Payload for OrderPlaced {}

    #[derive(Debug, Clone, Serialize)]
    struct OrderCancelled {
        id: u64,
    }
    impl Payload for OrderCancelled {}

    fn placed(id: u64) -> Arc<dyn Message> {
        Arc::new(MessageMapper::to_domain(OrderPlaced { id }, Metadata::generate(&SystemClock)).unwrap())
    }

    #[tokio::test]
    async fn test_null_message_fails() {
        let dispatcher = Dispatcher::new(Arc::new(HandlerRegistry::builder().build()));
        assert_eq!(dispatcher.handle(None, None).await, Err(MessagingError::NullMessage));
    }

    #[tokio::test]
    async fn test_unhandled_message_is_not_an_error() {
        let dispatcher = Dispatcher::new(Arc::new(HandlerRegistry::builder().build()));
        assert_eq!(dispatcher.handle(Some(placed(1)), None).await, Ok(0));
    }

    #[tokio::test]
    async fn test_fan_out_invokes_all_in_order() {
        let log = CallLog::default();
        let first = Arc::new(RecordingHandler::new("first").with_log(log.clone()));
        let second = Arc::new(RecordingHandler::new("second").with_log(log.clone()));
        let registry = HandlerRegistry::builder()
            .register_shared::<DomainMessage<OrderPlaced>, _>(first.clone())
            .register_shared::<DomainMessage<OrderPlaced>, _>(second.clone())
            .build();
        let dispatcher = Dispatcher::new(Arc::new(registry));

        let invoked = dispatcher.handle(Some(placed(7)), None).await.unwrap();

        assert_eq!(invoked, 2);
        assert_eq!(log.entries(), vec!["first".to_string(), "second".to_string()]);
    }

    #[tokio::test]
    async fn test_first_match_invokes_only_first() {
        let first = Arc::new(RecordingHandler::new("first"));
        let second = Arc::new(RecordingHandler::new("second"));
        let registry = HandlerRegistry::builder()
            .register_shared::<DomainMessage<OrderPlaced>, _>(first.clone())
            .register_shared::<DomainMessage<OrderPlaced>, _>(second.clone())
            .build();
        let dispatcher = Dispatcher::new(Arc::new(registry)).with_strategy(DispatchStrategy::FirstMatch);

        assert_eq!(dispatcher.handle(Some(placed(7)), None).await, Ok(1));
        assert_eq!(first.call_count(), 1);
        assert_eq!(second.call_count(), 0);
    }

    #[tokio::test]
    async fn test_exact_type_matching() {
        let placed_handler = Arc::new(RecordingHandler::new("placed"));
        let registry = HandlerRegistry::builder()
            .register_shared::<DomainMessage<OrderPlaced>, _>(placed_handler.clone())
            .build();
        let dispatcher = Dispatcher::new(Arc::new(registry));

        let cancelled: Arc<dyn Message> = Arc::new(
            MessageMapper::to_domain(OrderCancelled { id: 1 }, Metadata::generate(&SystemClock)).unwrap(),
        );
        let integration: Arc<dyn Message> = Arc::new(
            MessageMapper::to_integration(OrderPlaced { id: 1 }, Metadata::generate(&SystemClock)).unwrap(),
        );

        assert_eq!(dispatcher.handle(Some(cancelled), None).await, Ok(0));
        assert_eq!(dispatcher.handle(Some(integration), None).await, Ok(0));
        assert_eq!(placed_handler.call_count(), 0);
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_fan_out() {
        let failing = Arc::new(RecordingHandler::new("failing").failing("stock service down"));
        let after = Arc::new(RecordingHandler::new("after"));
        let registry = HandlerRegistry::builder()
            .register_shared::<DomainMessage<OrderPlaced>, _>(failing.clone())
            .register_shared::<DomainMessage<OrderPlaced>, _>(after.clone())
            .build();
        let dispatcher = Dispatcher::new(Arc::new(registry));

        let result = dispatcher.handle(Some(placed(1)), None).await;

        match result {
            Err(MessagingError::HandlerFailed { handler, reason, .. }) => {
                assert_eq!(handler, "failing");
                assert_eq!(reason, "stock service down");
            }
            other => panic!("expected handler failure, got {other:?}"),
        }
        assert_eq!(after.call_count(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_dispatch() {
        let handler = Arc::new(RecordingHandler::new("handler"));
        let registry = HandlerRegistry::builder()
            .register_shared::<DomainMessage<OrderPlaced>, _>(handler.clone())
            .build();
        let dispatcher = Dispatcher::new(Arc::new(registry));
        let cancel = CancellationSignal::new();
        cancel.cancel();

        assert_eq!(
            dispatcher.handle(Some(placed(1)), Some(&cancel)).await,
            Err(MessagingError::Cancelled)
        );
        assert_eq!(handler.call_count(), 0);
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("fan-out".parse::<DispatchStrategy>(), Ok(DispatchStrategy::FanOut));
        assert_eq!("FIRST_MATCH".parse::<DispatchStrategy>(), Ok(DispatchStrategy::FirstMatch));
        assert!("round_robin".parse::<DispatchStrategy>().is_err());
    }
}
