//! Railway-oriented result type.
//!
//! [`Outcome<T>`] carries either a value or a non-empty list of [`ErrorRecord`]s.
//! It is the uniform contract for operations that want to report validation
//! problems and failures as values, and [`HttpOutcome<T>`] adds the status code
//! an API boundary returns.
//!
//! # Accessor policy
//!
//! Accessors never panic: [`Outcome::value`] returns `None` on a failed
//! outcome and [`Outcome::errors`] returns an empty slice on a successful one.
//!
//! # Example
//!
//! ```
//! use courier_core::outcome::{ErrorRecord, Outcome};
//!
//! fn parse_quantity(raw: &str) -> Outcome<u32> {
//!     match raw.parse::<u32>() {
//!         Ok(0) => Outcome::fail(ErrorRecord::validation("quantity.zero", "quantity must be positive")),
//!         Ok(n) => Outcome::success(n),
//!         Err(e) => Outcome::fail(ErrorRecord::new("quantity.parse", e.to_string())),
//!     }
//! }
//!
//! let doubled = parse_quantity("21").map(|n| n * 2);
//! assert_eq!(doubled.value(), Some(&42));
//!
//! assert!(parse_quantity("0").has_validation_errors());
//! ```

use crate::error::MessagingError;
use serde::{Deserialize, Serialize, Serializer};

/// Distinguishes validation failures from every other failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Generic failure
    General,
    /// Input validation failure
    Validation,
}

/// A single error: stable machine-readable code plus human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Stable code for client-side handling (e.g. `"order.not_found"`)
    pub code: String,
    /// Human-readable description
    pub message: String,
    /// Validation or general
    pub kind: ErrorKind,
}

impl ErrorRecord {
    /// Create a general error.
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            kind: ErrorKind::General,
        }
    }

    /// Create a validation error.
    #[must_use]
    pub fn validation(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            kind: ErrorKind::Validation,
        }
    }

    /// Whether this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self.kind, ErrorKind::Validation)
    }
}

impl From<&MessagingError> for ErrorRecord {
    fn from(err: &MessagingError) -> Self {
        let code = match err {
            MessagingError::InvalidPayload { .. } => "messaging.invalid_payload",
            MessagingError::UnregisteredPayload(_) => "messaging.unregistered_payload",
            MessagingError::InvalidMetadata(_) => return Self::validation("messaging.invalid_metadata", err.to_string()),
            MessagingError::NullMessage => "messaging.null_message",
            MessagingError::TransportUnavailable(_) => "messaging.transport_unavailable",
            MessagingError::PublishFailed { .. } => "messaging.publish_failed",
            MessagingError::ConfigurationMissing(_) => "messaging.configuration_missing",
            MessagingError::InvalidConfiguration(_) => "messaging.invalid_configuration",
            MessagingError::InvalidResultConstruction => "messaging.invalid_result_construction",
            MessagingError::HandlerFailed { .. } => "messaging.handler_failed",
            MessagingError::Codec(_) => "messaging.codec",
            MessagingError::Cancelled => "messaging.cancelled",
            MessagingError::ConsumerFailed(_) => "messaging.consumer_failed",
            MessagingError::ShutdownTimeout(_) => "messaging.shutdown_timeout",
        };
        Self::new(code, err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Repr<T> {
    Success(T),
    Failure(Vec<ErrorRecord>),
}

/// Success with a value, or failure with at least one error.
///
/// The two states are built by separate constructors and cannot be converted
/// into each other in place.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct Outcome<T> {
    repr: Repr<T>,
}

impl<T> Outcome<T> {
    /// A successful outcome.
    pub const fn success(value: T) -> Self {
        Self {
            repr: Repr::Success(value),
        }
    }

    /// A failed outcome.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::InvalidResultConstruction`] if `errors` is empty.
    pub fn failure(errors: impl IntoIterator<Item = ErrorRecord>) -> Result<Self, MessagingError> {
        let errors: Vec<_> = errors.into_iter().collect();
        if errors.is_empty() {
            return Err(MessagingError::InvalidResultConstruction);
        }
        Ok(Self {
            repr: Repr::Failure(errors),
        })
    }

    /// A failed outcome with a single error. Always valid.
    pub fn fail(error: ErrorRecord) -> Self {
        Self {
            repr: Repr::Failure(vec![error]),
        }
    }

    /// Whether this outcome is a success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.repr, Repr::Success(_))
    }

    /// Whether this outcome is a failure.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        !self.is_success()
    }

    /// The value, or `None` on failure.
    #[must_use]
    pub const fn value(&self) -> Option<&T> {
        match &self.repr {
            Repr::Success(value) => Some(value),
            Repr::Failure(_) => None,
        }
    }

    /// The errors, or an empty slice on success.
    #[must_use]
    pub fn errors(&self) -> &[ErrorRecord] {
        match &self.repr {
            Repr::Success(_) => &[],
            Repr::Failure(errors) => errors,
        }
    }

    /// Whether at least one error is a validation error.
    #[must_use]
    pub fn has_validation_errors(&self) -> bool {
        self.errors().iter().any(ErrorRecord::is_validation)
    }

    /// Transform the value, leaving failures untouched.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self.repr {
            Repr::Success(value) => Outcome::success(f(value)),
            Repr::Failure(errors) => Outcome {
                repr: Repr::Failure(errors),
            },
        }
    }

    /// Chain another fallible step onto a success.
    pub fn and_then<U>(self, f: impl FnOnce(T) -> Outcome<U>) -> Outcome<U> {
        match self.repr {
            Repr::Success(value) => f(value),
            Repr::Failure(errors) => Outcome {
                repr: Repr::Failure(errors),
            },
        }
    }

    /// Convert into a standard `Result`.
    ///
    /// # Errors
    ///
    /// Returns the error list of a failed outcome.
    pub fn into_result(self) -> Result<T, Vec<ErrorRecord>> {
        match self.repr {
            Repr::Success(value) => Ok(value),
            Repr::Failure(errors) => Err(errors),
        }
    }
}

impl<T> From<Outcome<T>> for Result<T, Vec<ErrorRecord>> {
    fn from(outcome: Outcome<T>) -> Self {
        outcome.into_result()
    }
}

impl<T> From<Result<T, MessagingError>> for Outcome<T> {
    fn from(result: Result<T, MessagingError>) -> Self {
        match result {
            Ok(value) => Self::success(value),
            Err(err) => Self::fail(ErrorRecord::from(&err)),
        }
    }
}

#[derive(Serialize)]
struct OutcomeBody<'a, T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<&'a T>,
    #[serde(skip_serializing_if = "is_empty")]
    errors: &'a [ErrorRecord],
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_empty(errors: &&[ErrorRecord]) -> bool {
    errors.is_empty()
}

impl<T: Serialize> Serialize for Outcome<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        OutcomeBody {
            success: self.is_success(),
            value: self.value(),
            errors: self.errors(),
        }
        .serialize(serializer)
    }
}

/// An [`Outcome`] plus the status code an API boundary should return.
///
/// The status is chosen by the producer and is independent of
/// [`Outcome::is_success`]; generic code must not infer success from it.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct HttpOutcome<T> {
    status: u16,
    outcome: Outcome<T>,
}

impl<T> HttpOutcome<T> {
    /// Pair an outcome with a status code.
    pub const fn new(status: u16, outcome: Outcome<T>) -> Self {
        Self { status, outcome }
    }

    /// 200 with a value.
    pub const fn ok(value: T) -> Self {
        Self::new(200, Outcome::success(value))
    }

    /// 201 with a value.
    pub const fn created(value: T) -> Self {
        Self::new(201, Outcome::success(value))
    }

    /// 202 with a value.
    pub const fn accepted(value: T) -> Self {
        Self::new(202, Outcome::success(value))
    }

    /// 400 with a single general error.
    pub fn bad_request(error: ErrorRecord) -> Self {
        Self::new(400, Outcome::fail(error))
    }

    /// 404 with a single general error.
    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(404, Outcome::fail(ErrorRecord::new(code, message)))
    }

    /// 422 with validation errors.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::InvalidResultConstruction`] if `errors` is empty.
    pub fn unprocessable(errors: impl IntoIterator<Item = ErrorRecord>) -> Result<Self, MessagingError> {
        Ok(Self::new(422, Outcome::failure(errors)?))
    }

    /// 500 with a single general error.
    pub fn internal(error: ErrorRecord) -> Self {
        Self::new(500, Outcome::fail(error))
    }

    /// Status code chosen by the producer.
    #[must_use]
    pub const fn status(&self) -> u16 {
        self.status
    }

    /// The wrapped outcome.
    pub const fn outcome(&self) -> &Outcome<T> {
        &self.outcome
    }

    /// Split into status and outcome.
    pub fn into_parts(self) -> (u16, Outcome<T>) {
        (self.status, self.outcome)
    }

    /// Shorthand for `outcome().is_success()`.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

impl<T> From<Result<T, MessagingError>> for HttpOutcome<T> {
    /// `Ok` maps to 200. Errors map to the status a caller would expect for
    /// that failure class.
    fn from(result: Result<T, MessagingError>) -> Self {
        match result {
            Ok(value) => Self::ok(value),
            Err(err) => {
                let status = match &err {
                    MessagingError::InvalidPayload { .. }
                    | MessagingError::InvalidMetadata(_)
                    | MessagingError::NullMessage => 400,
                    MessagingError::UnregisteredPayload(_) => 422,
                    MessagingError::TransportUnavailable(_) => 503,
                    MessagingError::ShutdownTimeout(_) => 504,
                    _ => 500,
                };
                Self::new(status, Outcome::fail(ErrorRecord::from(&err)))
            }
        }
    }
}
