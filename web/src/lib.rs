//! Axum integration for the Courier messaging layer.
//!
//! Two pieces:
//!
//! - [`OutcomeResponse`]: renders a `courier_core::outcome::HttpOutcome` with
//!   its producer-chosen status and the serialized outcome as JSON body
//! - [`admin_router`]: restart/stop/list endpoints over the process's
//!   consumers, plus liveness and readiness probes driven by their managers and
//!   supervisors
//!
//! # Example
//!
//! ```ignore
//! use courier_web::{AdminState, admin_router};
//!
//! let state = AdminState::new().with_supervisor(Arc::clone(&orders_supervisor));
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, admin_router(state)).await?;
//! ```

#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
pub mod state;

pub use error::{WebError, WebResult};
pub use response::OutcomeResponse;
pub use router::admin_router;
pub use state::{AdminState, ConsumerReport};
