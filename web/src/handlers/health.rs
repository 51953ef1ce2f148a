//! Health check endpoints.
//!
//! These endpoints are used by load balancers and orchestrators to verify
//! service health.

use crate::state::{AdminState, ConsumerReport};
use axum::Json;
use axum::extract::State;
use http::StatusCode;
use serde::Serialize;

/// Liveness probe. Does not look at consumers.
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Readiness report.
#[derive(Debug, Serialize)]
pub struct Readiness {
    /// `"ready"` or `"degraded"`
    pub status: &'static str,
    /// Per-consumer report
    pub consumers: Vec<ConsumerReport>,
}

/// Readiness probe: 503 while any registered consumer is stopped, or its
/// supervisor is faulted, stopped or not yet started.
///
/// # Endpoint
///
/// ```text
/// GET /health/ready
/// ```
#[allow(clippy::unused_async)]
pub async fn readiness(State(state): State<AdminState>) -> (StatusCode, Json<Readiness>) {
    let consumers = state.reports();
    let ready = consumers.iter().all(ConsumerReport::is_ready);

    let (status, label) = if ready {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (status, Json(Readiness { status: label, consumers }))
}
