//! Error types shared by every layer of the messaging stack.

use crate::message::MessageFamily;
use thiserror::Error;

/// Errors that can occur while mapping, publishing, dispatching or consuming messages.
///
/// Variants are deliberately coarse: transports and handlers report their own
/// failure reasons as strings so that the original cause stays visible to the
/// caller without the core depending on any transport crate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessagingError {
    /// The payload handed to the mapper is already an envelope.
    #[error("Invalid payload: {name} is already a {found} envelope and cannot be re-wrapped for the {target} family")]
    InvalidPayload {
        /// Type name of the rejected payload
        name: String,
        /// Family of the envelope that was passed in
        found: MessageFamily,
        /// Family the caller tried to map into
        target: MessageFamily,
    },

    /// The mapper has no constructor registered for this payload type.
    #[error("No envelope constructor registered for payload type {0}")]
    UnregisteredPayload(String),

    /// Metadata could not be constructed (e.g. empty correlation id).
    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),

    /// The dispatcher was asked to handle a delivery that carried no envelope.
    #[error("No message to dispatch")]
    NullMessage,

    /// The transport could not be reached.
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// The transport accepted the connection but rejected the publish.
    #[error("Publish failed for {name}: {reason}")]
    PublishFailed {
        /// Envelope name that failed
        name: String,
        /// Reason reported by the transport
        reason: String,
    },

    /// A required configuration value is not set.
    #[error("Configuration missing: {0}")]
    ConfigurationMissing(String),

    /// A configuration value is set but invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// `Outcome::failure` was called with an empty error list.
    #[error("A failed outcome requires at least one error")]
    InvalidResultConstruction,

    /// A handler returned an error while processing an envelope.
    #[error("Handler {handler} failed for {message}: {reason}")]
    HandlerFailed {
        /// Handler name
        handler: String,
        /// Envelope name
        message: String,
        /// Error reported by the handler
        reason: String,
    },

    /// An envelope could not be encoded to or decoded from its wire form.
    #[error("Codec error: {0}")]
    Codec(String),

    /// The operation observed its cancellation signal.
    #[error("Operation cancelled")]
    Cancelled,

    /// The consumer failed for a reason other than cancellation.
    #[error("Consumer failed: {0}")]
    ConsumerFailed(String),

    /// Shutdown did not complete within the allotted time.
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(std::time::Duration),
}

impl MessagingError {
    /// Whether this error is the expected result of a cancellation request.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether retrying the same operation could plausibly succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TransportUnavailable(_) | Self::PublishFailed { .. } | Self::ConsumerFailed(_)
        )
    }
}
