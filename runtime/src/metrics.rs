//! Metric names and descriptions.
//!
//! Components record through the `metrics` facade. The library installs no
//! recorder; the host application picks an exporter and may call
//! [`describe_metrics`] once at startup so the exporter carries help text.
//!
//! | metric | kind | labels |
//! |---|---|---|
//! | `courier.publish.total` | counter | `family` |
//! | `courier.publish.failed` | counter | `family` |
//! | `courier.publish.retried` | counter | none |
//! | `courier.dispatch.handled` | counter | `message` |
//! | `courier.dispatch.unhandled` | counter | `message` |
//! | `courier.dispatch.failed` | counter | `message`, `handler` |
//! | `courier.consumer.started` | counter | `consumer` |
//! | `courier.consumer.faulted` | counter | `consumer` |
//! | `courier.consumer.restarts` | counter | `consumer` |
//! | `courier.consumer.rejected` | counter | `consumer`, `family` |
//! | `courier.consumer.running` | gauge | `consumer` |

use metrics::{describe_counter, describe_gauge};

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge};

/// Envelopes handed to the external publisher.
pub const PUBLISH_TOTAL: &str = "courier.publish.total";
/// Publish calls that failed or were cancelled.
pub const PUBLISH_FAILED: &str = "courier.publish.failed";
/// Publish retries made by the retrying decorator.
pub const PUBLISH_RETRIED: &str = "courier.publish.retried";
/// Handler invocations that completed.
pub const DISPATCH_HANDLED: &str = "courier.dispatch.handled";
/// Envelopes with no registered handler.
pub const DISPATCH_UNHANDLED: &str = "courier.dispatch.unhandled";
/// Handler invocations that failed.
pub const DISPATCH_FAILED: &str = "courier.dispatch.failed";
/// Consumer attempts started by a supervisor.
pub const CONSUMER_STARTED: &str = "courier.consumer.started";
/// Consumer attempts that ended in a fault.
pub const CONSUMER_FAULTED: &str = "courier.consumer.faulted";
/// Restart requests issued through a consumer manager.
pub const CONSUMER_RESTARTS: &str = "courier.consumer.restarts";
/// Deliveries refused because their envelope belongs to another family.
pub const CONSUMER_REJECTED: &str = "courier.consumer.rejected";
/// 1 while a supervisor loop is running, 0 otherwise.
pub const CONSUMER_RUNNING: &str = "courier.consumer.running";

/// Register descriptions for every metric above with the installed recorder.
pub fn describe_metrics() {
    describe_counter!(PUBLISH_TOTAL, "Envelopes handed to the external publisher");
    describe_counter!(PUBLISH_FAILED, "Publish calls that failed or were cancelled");
    describe_counter!(PUBLISH_RETRIED, "Publish retries after transient transport failures");
    describe_counter!(DISPATCH_HANDLED, "Handler invocations that completed successfully");
    describe_counter!(DISPATCH_UNHANDLED, "Inbound envelopes with no registered handler");
    describe_counter!(DISPATCH_FAILED, "Handler invocations that returned an error");
    describe_counter!(CONSUMER_STARTED, "Consumer attempts started by a supervisor");
    describe_counter!(CONSUMER_FAULTED, "Consumer attempts that ended in a fault");
    describe_counter!(CONSUMER_RESTARTS, "Restart requests issued through a consumer manager");
    describe_counter!(CONSUMER_REJECTED, "Deliveries refused because their envelope belongs to another family");
    describe_gauge!(CONSUMER_RUNNING, "Whether a supervisor loop is running");
}
