//! Router assembly.

use crate::handlers::{health_check, list_consumers, readiness, restart_consumer, stop_consumer};
use crate::state::AdminState;
use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

/// Admin and health routes over `state`.
///
/// Merge into an application router or serve on its own port.
pub fn admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/ready", get(readiness))
        .route("/admin/consumers", get(list_consumers))
        .route("/admin/consumers/:family/restart", post(restart_consumer))
        .route("/admin/consumers/:family/stop", post(stop_consumer))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
