//! HTTP request handlers.

pub mod admin;
pub mod health;

pub use admin::{list_consumers, restart_consumer, stop_consumer};
pub use health::{health_check, readiness};
