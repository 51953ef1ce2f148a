//! Correlation metadata attached to every envelope.

use crate::environment::Clock;
use crate::error::MessagingError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Correlation id and creation timestamp.
///
/// Immutable once constructed. Publishers synthesize one when the caller does
/// not supply it, and reuse it for every item of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    correlation_id: String,
    created_at: DateTime<Utc>,
}

impl Metadata {
    /// Create metadata with a caller-supplied correlation id.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::InvalidMetadata`] if `correlation_id` is empty
    /// or only whitespace.
    pub fn new(
        correlation_id: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Result<Self, MessagingError> {
        let correlation_id = correlation_id.into();
        if correlation_id.trim().is_empty() {
            return Err(MessagingError::InvalidMetadata(
                "correlation id cannot be empty".to_string(),
            ));
        }
        Ok(Self {
            correlation_id,
            created_at,
        })
    }

    /// Create metadata with a fresh UUID v4 correlation id stamped by `clock`.
    #[must_use]
    pub fn generate(clock: &dyn Clock) -> Self {
        Self {
            correlation_id: uuid::Uuid::new_v4().to_string(),
            created_at: clock.now(),
        }
    }

    pub(crate) fn from_parts(correlation_id: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            created_at,
        }
    }

    /// Correlation identifier.
    #[must_use]
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::SystemClock;

    #[test]
    fn test_new_rejects_empty_correlation_id() {
        assert!(matches!(
            Metadata::new("", Utc::now()),
            Err(MessagingError::InvalidMetadata(_))
        ));
        assert!(matches!(
            Metadata::new("   ", Utc::now()),
            Err(MessagingError::InvalidMetadata(_))
        ));
    }

    #[test]
    fn test_new_keeps_values() -> Result<(), MessagingError> {
        let now = Utc::now();
        let metadata = Metadata::new("order-42", now)?;
        assert_eq!(metadata.correlation_id(), "order-42");
        assert_eq!(metadata.created_at(), now);
        Ok(())
    }

    #[test]
    fn test_generate_produces_distinct_ids() {
        let first = Metadata::generate(&SystemClock);
        let second = Metadata::generate(&SystemClock);
        assert!(!first.correlation_id().is_empty());
        assert_ne!(first.correlation_id(), second.correlation_id());
    }
}
