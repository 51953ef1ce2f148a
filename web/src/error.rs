//! Error types for the admin handlers.
//!
//! Every error renders through [`OutcomeResponse`], so clients see the same
//! `{ "success": false, "errors": [...] }` body for every failure.

use crate::response::OutcomeResponse;
use axum::response::{IntoResponse, Response};
use courier_core::error::MessagingError;
use courier_core::message::MessageFamily;
use courier_core::outcome::{ErrorRecord, HttpOutcome, Outcome};
use http::StatusCode;
use thiserror::Error;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, WebError>;

/// Errors raised by web handlers.
#[derive(Debug, Error)]
pub enum WebError {
    /// The path named a family that does not exist.
    #[error("Unknown message family '{0}'")]
    UnknownFamily(String),

    /// No consumer is registered for the family.
    #[error("No consumer registered for the {0} family")]
    ConsumerNotRegistered(MessageFamily),

    /// A messaging operation failed.
    #[error(transparent)]
    Messaging(#[from] MessagingError),
}

impl WebError {
    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::UnknownFamily(_) | Self::ConsumerNotRegistered(_) => StatusCode::NOT_FOUND,
            Self::Messaging(error) => HttpOutcome::<()>::from(Err(error.clone()))
                .status()
                .try_into()
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }

    fn record(&self) -> ErrorRecord {
        match self {
            Self::UnknownFamily(_) => ErrorRecord::new("admin.unknown_family", self.to_string()),
            Self::ConsumerNotRegistered(_) => ErrorRecord::new("admin.consumer_not_registered", self.to_string()),
            Self::Messaging(error) => ErrorRecord::from(error),
        }
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let outcome = HttpOutcome::<()>::new(self.status().as_u16(), Outcome::fail(self.record()));
        OutcomeResponse(outcome).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_family_is_not_found() {
        let err = WebError::UnknownFamily("billing".to_string());
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "Unknown message family 'billing'");
    }

    #[test]
    fn test_messaging_errors_keep_their_status() {
        let err = WebError::from(MessagingError::TransportUnavailable("down".into()));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.record().code, "messaging.transport_unavailable");
    }

    #[test]
    fn test_response_status() {
        let response = WebError::ConsumerNotRegistered(MessageFamily::Integration).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
