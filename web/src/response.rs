//! `HttpOutcome` as an axum response.
//!
//! The status code is whatever the producer chose; the body is the
//! serialized [`Outcome`](courier_core::outcome::Outcome):
//!
//! ```json
//! { "success": true, "value": { ... } }
//! { "success": false, "errors": [{ "code": "...", "message": "...", "kind": "general" }] }
//! ```

use axum::Json;
use axum::response::{IntoResponse, Response};
use courier_core::outcome::HttpOutcome;
use http::StatusCode;
use serde::Serialize;

/// Response wrapper for [`HttpOutcome`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeResponse<T>(pub HttpOutcome<T>);

impl<T> From<HttpOutcome<T>> for OutcomeResponse<T> {
    fn from(outcome: HttpOutcome<T>) -> Self {
        Self(outcome)
    }
}

impl<T: Serialize> IntoResponse for OutcomeResponse<T> {
    fn into_response(self) -> Response {
        let (status, outcome) = self.0.into_parts();
        let status = StatusCode::from_u16(status).unwrap_or_else(|_| {
            tracing::warn!(status, "Outcome carried an invalid status code");
            StatusCode::INTERNAL_SERVER_ERROR
        });

        if status.is_server_error() {
            for error in outcome.errors() {
                tracing::error!(status = %status, code = %error.code, message = %error.message, "Request failed");
            }
        }

        (status, Json(outcome)).into_response()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use courier_core::outcome::ErrorRecord;

    async fn render<T: Serialize>(outcome: HttpOutcome<T>) -> (StatusCode, serde_json::Value) {
        let response = OutcomeResponse(outcome).into_response();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_success_body() {
        let (status, body) = render(HttpOutcome::created("order-1")).await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body, serde_json::json!({ "success": true, "value": "order-1" }));
    }

    #[tokio::test]
    async fn test_validation_failure_body() {
        let outcome = HttpOutcome::<()>::unprocessable([ErrorRecord::validation("email", "Email is required")]).unwrap();

        let (status, body) = render(outcome).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["success"], false);
        assert_eq!(body["errors"][0]["code"], "email");
        assert_eq!(body["errors"][0]["kind"], "validation");
    }

    #[tokio::test]
    async fn test_invalid_status_becomes_500() {
        let outcome = HttpOutcome::new(42, courier_core::outcome::Outcome::success(1));

        let (status, _) = render(outcome).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
