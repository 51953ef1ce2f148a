//! # Courier Core
//!
//! Envelope model and collaborator contracts for the Courier messaging layer.
//!
//! This crate provides the pieces every other crate builds on:
//!
//! - **Envelopes**: [`DomainMessage`] and [`IntegrationMessage`], typed wrappers
//!   carrying a unique id, a name, the payload and [`Metadata`]
//! - **Mapper**: [`MessageMapper`], turning an untyped payload into the right
//!   typed envelope through a `TypeId` lookup table
//! - **Contracts**: [`ExternalPublisher`], [`MessageConsumer`], [`MessageSource`]
//!   and [`Handler`], implemented by transports and business code
//! - **Cancellation**: [`CancellationSignal`], the cooperative stop flag passed
//!   to every async operation
//! - **Outcome**: [`Outcome`] / [`HttpOutcome`], the railway-oriented result type
//!
//! ## Flow
//!
//! ```text
//! caller ──► Publisher ──► MessageMapper ──► ExternalPublisher ──► transport
//! transport ──► MessageConsumer ──► Dispatcher ──► Handler(s)
//! ```
//!
//! The runtime pieces (publisher, dispatcher, supervisor) live in
//! `courier-runtime`.

pub mod cancellation;
pub mod consumer;
pub mod environment;
pub mod error;
pub mod handler;
pub mod mapper;
pub mod message;
pub mod metadata;
pub mod outcome;
pub mod publisher;

pub use cancellation::CancellationSignal;
pub use consumer::{Delivery, DeliveryStream, MessageConsumer, MessageSource};
pub use environment::{Clock, SystemClock};
pub use error::MessagingError;
pub use handler::{Handler, HandlerError};
pub use mapper::{MessageMapper, MessageMapperBuilder, WireEnvelope};
pub use message::{DomainMessage, IntegrationMessage, Message, MessageFamily, Payload};
pub use metadata::Metadata;
pub use outcome::{ErrorKind, ErrorRecord, HttpOutcome, Outcome};
pub use publisher::ExternalPublisher;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use futures::future::BoxFuture;
