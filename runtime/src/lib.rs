//! # Courier Runtime
//!
//! Runtime components of the Courier messaging layer.
//!
//! This crate turns the traits of `courier-core` into a working pipeline:
//!
//! - **Publisher**: maps payloads into family envelopes and hands them to an
//!   `ExternalPublisher`
//! - **Handler Registry / Dispatcher**: routes an inbound envelope to the
//!   handlers registered for its exact type
//! - **Consumer Manager**: restart/stop control over a running consumer
//! - **Consumer Supervisor**: hosted service owning the consume loop
//! - **Transport Consumer**: receive loop over any `MessageSource`
//! - **Host**: starts and gracefully stops hosted services
//!
//! ## Example
//!
//! ```ignore
//! use courier_runtime::{ConsumerManager, ConsumerSupervisor, Dispatcher, HandlerRegistry};
//!
//! let registry = HandlerRegistry::builder()
//!     .register::<DomainMessage<OrderPlaced>, _>(ReserveStock::new(inventory))
//!     .build();
//! let dispatcher = Dispatcher::new(Arc::new(registry));
//!
//! let consumer = TransportConsumer::new("orders", MessageFamily::Domain, config, broker, dispatcher);
//! let manager = Arc::new(ConsumerManager::new("orders", MessageFamily::Domain));
//! let supervisor = ConsumerSupervisor::new(Arc::new(consumer), Arc::clone(&manager));
//!
//! supervisor.start()?;
//! // later, from an admin endpoint:
//! manager.restart_execution();
//! ```

/// Configuration loaded from the environment
pub mod config;

/// Exact-type dispatch to registered handlers
pub mod dispatcher;

/// Hosted services and graceful shutdown
pub mod host;

/// Restart/stop control over a running consumer
pub mod manager;

/// Metric names recorded through the `metrics` facade
pub mod metrics;

/// Family publishers
pub mod publisher;

/// Handler registry
pub mod registry;

/// Retry logic with exponential backoff
pub mod retry;

/// Retrying `ExternalPublisher` decorator
pub mod retrying_publisher;

/// Supervised consume loop
pub mod supervisor;

/// Receive loop over a `MessageSource`
pub mod transport_consumer;

pub use config::MessagingConfig;
pub use dispatcher::{DispatchStrategy, Dispatcher};
pub use host::{Host, HostedService, wait_for_signal};
pub use manager::{ConsumerManager, ConsumerStatus};
pub use publisher::Publisher;
pub use registry::{HandlerEntry, HandlerRegistry, HandlerRegistryBuilder};
pub use retry::{RetryPolicy, RetryPolicyBuilder, retry_until_cancelled, retry_with_backoff, retry_with_predicate};
pub use retrying_publisher::RetryingPublisher;
pub use supervisor::{ConsumerSupervisor, SupervisorState};
pub use transport_consumer::TransportConsumer;
