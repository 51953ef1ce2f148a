//! Messaging configuration.
//!
//! Loaded from environment variables with [`MessagingConfig::from_env`], or
//! deserialized from any serde source. Queue names are optional at load time;
//! a consumer fails with [`MessagingError::ConfigurationMissing`] when it needs
//! one that is not set.
//!
//! | variable | field | default |
//! |---|---|---|
//! | `COURIER_DOMAIN_QUEUE` | `domain_queue` | unset |
//! | `COURIER_INTEGRATION_QUEUE` | `integration_queue` | unset |
//! | `COURIER_DISPATCH_STRATEGY` | `dispatch_strategy` | `fan_out` |
//! | `COURIER_SUPERVISOR_MAX_RETRIES` | `supervisor_retry.max_retries` | 3 |
//! | `COURIER_PUBLISH_MAX_RETRIES` | `publish_retry.max_retries` | 3 |
//! | `COURIER_SHUTDOWN_TIMEOUT_SECS` | `shutdown_timeout_secs` | 30 |

use crate::dispatcher::DispatchStrategy;
use crate::retry::RetryPolicy;
use courier_core::error::MessagingError;
use courier_core::message::MessageFamily;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

const DOMAIN_QUEUE: &str = "COURIER_DOMAIN_QUEUE";
const INTEGRATION_QUEUE: &str = "COURIER_INTEGRATION_QUEUE";
const DISPATCH_STRATEGY: &str = "COURIER_DISPATCH_STRATEGY";
const SUPERVISOR_MAX_RETRIES: &str = "COURIER_SUPERVISOR_MAX_RETRIES";
const PUBLISH_MAX_RETRIES: &str = "COURIER_PUBLISH_MAX_RETRIES";
const SHUTDOWN_TIMEOUT_SECS: &str = "COURIER_SHUTDOWN_TIMEOUT_SECS";

/// Configuration shared by publishers, consumers and supervisors.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Queue consumed for domain messages
    pub domain_queue: Option<String>,
    /// Queue consumed for integration messages
    pub integration_queue: Option<String>,
    /// Handler selection strategy
    pub dispatch_strategy: DispatchStrategy,
    /// Backoff between faulted consumer attempts
    pub supervisor_retry: RetryPolicy,
    /// Backoff between publish attempts of the retrying publisher
    pub publish_retry: RetryPolicy,
    /// Grace period for hosted services on shutdown
    pub shutdown_timeout_secs: u64,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            domain_queue: None,
            integration_queue: None,
            dispatch_strategy: DispatchStrategy::default(),
            supervisor_retry: RetryPolicy::default(),
            publish_retry: RetryPolicy::default(),
            shutdown_timeout_secs: 30,
        }
    }
}

impl MessagingConfig {
    /// Load from `COURIER_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::InvalidConfiguration`] if a variable is set to
    /// an unparsable value or the result fails [`MessagingConfig::validate`].
    pub fn from_env() -> Result<Self, MessagingError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup, using the same keys as
    /// [`MessagingConfig::from_env`].
    ///
    /// # Errors
    ///
    /// See [`MessagingConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, MessagingError> {
        let mut config = Self {
            domain_queue: lookup(DOMAIN_QUEUE),
            integration_queue: lookup(INTEGRATION_QUEUE),
            ..Self::default()
        };

        if let Some(strategy) = lookup(DISPATCH_STRATEGY) {
            config.dispatch_strategy = strategy.parse()?;
        }
        if let Some(retries) = lookup(SUPERVISOR_MAX_RETRIES) {
            config.supervisor_retry.max_retries = parse(SUPERVISOR_MAX_RETRIES, &retries)?;
        }
        if let Some(retries) = lookup(PUBLISH_MAX_RETRIES) {
            config.publish_retry.max_retries = parse(PUBLISH_MAX_RETRIES, &retries)?;
        }
        if let Some(secs) = lookup(SHUTDOWN_TIMEOUT_SECS) {
            config.shutdown_timeout_secs = parse(SHUTDOWN_TIMEOUT_SECS, &secs)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values that are set but unusable.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::InvalidConfiguration`] for blank queue names,
    /// a zero shutdown timeout, or a retry multiplier below 1.
    pub fn validate(&self) -> Result<(), MessagingError> {
        for (key, queue) in [(DOMAIN_QUEUE, &self.domain_queue), (INTEGRATION_QUEUE, &self.integration_queue)] {
            if queue.as_deref().is_some_and(|name| name.trim().is_empty()) {
                return Err(MessagingError::InvalidConfiguration(format!("{key} is blank")));
            }
        }

        if self.shutdown_timeout_secs == 0 {
            return Err(MessagingError::InvalidConfiguration(format!(
                "{SHUTDOWN_TIMEOUT_SECS} must be positive"
            )));
        }

        for policy in [&self.supervisor_retry, &self.publish_retry] {
            if policy.multiplier < 1.0 {
                return Err(MessagingError::InvalidConfiguration(
                    "retry multiplier must be at least 1.0".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Queue consumed for `family`.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::ConfigurationMissing`] if it is not set.
    pub fn queue_name(&self, family: MessageFamily) -> Result<&str, MessagingError> {
        let (key, queue) = match family {
            MessageFamily::Domain => (DOMAIN_QUEUE, &self.domain_queue),
            MessageFamily::Integration => (INTEGRATION_QUEUE, &self.integration_queue),
        };
        queue
            .as_deref()
            .ok_or_else(|| MessagingError::ConfigurationMissing(key.to_string()))
    }

    /// Shutdown grace period.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, MessagingError> {
    value
        .trim()
        .parse()
        .map_err(|_| MessagingError::InvalidConfiguration(format!("{key} has invalid value '{value}'")))
}
