//! # Courier Testing
//!
//! Test doubles for the Courier messaging layer.
//!
//! This crate provides:
//! - [`InMemoryTransport`]: an `ExternalPublisher` and `MessageSource` backed by
//!   in-process channels, with failure injection and ack/nack bookkeeping
//! - [`RecordingHandler`]: a handler for any envelope type that records calls
//! - [`ScriptedConsumer`]: a `MessageConsumer` with scripted faults
//! - [`FixedClock`]: deterministic time
//!
//! ## Example
//!
//! ```ignore
//! use courier_testing::{InMemoryTransport, RecordingHandler};
//!
//! #[tokio::test]
//! async fn test_order_flow() {
//!     let transport = Arc::new(InMemoryTransport::new().route(MessageFamily::Domain, "orders"));
//!     let handler = Arc::new(RecordingHandler::new("reserve-stock"));
//!     // wire publisher, supervisor and consumer ...
//!     handler.wait_for_calls(1, Duration::from_secs(1)).await.unwrap();
//! }
//! ```

pub mod consumers;
pub mod handlers;
pub mod transport;

use courier_core::environment::Clock;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::error::Elapsed;

/// Mock implementations of injected dependencies.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests.
    ///
    /// # Example
    ///
    /// ```
    /// use courier_testing::mocks::FixedClock;
    /// use courier_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Fixed clock at 2025-01-01 00:00:00 UTC.
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::from_timestamp(1_735_689_600, 0).unwrap_or_default())
    }
}

/// Install a `tracing` subscriber honouring `RUST_LOG`, once per process.
///
/// Safe to call from every test; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Re-check `condition` every time `notify` fires until it holds or `timeout`
/// elapses.
pub(crate) async fn wait_until(
    notify: &Notify,
    timeout: Duration,
    mut condition: impl FnMut() -> bool,
) -> Result<(), Elapsed> {
    tokio::time::timeout(timeout, async {
        loop {
            let notified = notify.notified();
            if condition() {
                return;
            }
            notified.await;
        }
    })
    .await
}

/// Await a future that must finish within `timeout`.
///
/// # Errors
///
/// Returns [`Elapsed`] if it does not.
pub async fn within<F: Future>(timeout: Duration, future: F) -> Result<F::Output, Elapsed> {
    tokio::time::timeout(timeout, future).await
}

// Re-export commonly used items
pub use consumers::ScriptedConsumer;
pub use handlers::{CallLog, RecordedCall, RecordingHandler};
pub use mocks::{FixedClock, test_clock};
pub use transport::{InMemoryTransport, NackRecord, PublishedEnvelope};
