//! Admin router tests driven through `tower::ServiceExt::oneshot`.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use courier_core::error::MessagingError;
use courier_core::message::MessageFamily;
use courier_runtime::{ConsumerManager, ConsumerSupervisor, RetryPolicy, SupervisorState};
use courier_testing::ScriptedConsumer;
use courier_web::{AdminState, admin_router};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const WAIT: Duration = Duration::from_secs(2);

fn managers() -> (Arc<ConsumerManager>, AdminState) {
    let manager = Arc::new(ConsumerManager::new("orders", MessageFamily::Domain));
    let state = AdminState::new().with_manager(Arc::clone(&manager));
    (manager, state)
}

/// A supervisor whose consumer fails `failures` times and gives up after the
/// first fault.
fn fragile_supervisor(failures: usize) -> (Arc<ScriptedConsumer>, Arc<ConsumerSupervisor>) {
    let consumer = Arc::new(
        ScriptedConsumer::new("orders").fail_first(failures, MessagingError::TransportUnavailable("broker down".into())),
    );
    let manager = Arc::new(ConsumerManager::new("orders", MessageFamily::Domain));
    let supervisor = ConsumerSupervisor::new(consumer.clone(), manager)
        .with_retry_policy(RetryPolicy::builder().max_retries(0).build());
    (consumer, Arc::new(supervisor))
}

async fn wait_for_state(supervisor: &ConsumerSupervisor, expected: SupervisorState) {
    let mut states = supervisor.subscribe_state();
    tokio::time::timeout(WAIT, states.wait_for(|state| *state == expected))
        .await
        .expect("state not reached")
        .unwrap();
}

async fn send(state: AdminState, method: &str, uri: &str) -> (StatusCode, Value) {
    let response = admin_router(state)
        .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

#[tokio::test]
async fn test_restart_replaces_signal() {
    let (manager, state) = managers();
    let before = manager.cancellation_token();

    let (status, body) = send(state, "POST", "/admin/consumers/domain/restart").await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["success"], true);
    assert_eq!(body["value"]["generation"], 1);
    assert_eq!(body["value"]["stopped"], false);
    assert!(before.is_cancelled());
    assert!(!manager.cancellation_token().is_cancelled());
}

#[tokio::test]
async fn test_stop_cancels_current_signal() {
    let (manager, state) = managers();

    let (status, body) = send(state, "POST", "/admin/consumers/domain/stop").await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["value"]["stopped"], true);
    assert!(manager.is_stopped());
}

#[tokio::test]
async fn test_list_consumers() {
    let (_manager, state) = managers();

    let (status, body) = send(state, "GET", "/admin/consumers").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["value"][0]["name"], "orders");
    assert_eq!(body["value"][0]["family"], "domain");
}

#[tokio::test]
async fn test_unregistered_family_is_not_found() {
    let (_manager, state) = managers();

    let (status, body) = send(state, "POST", "/admin/consumers/integration/restart").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["errors"][0]["code"], "admin.consumer_not_registered");
}

#[tokio::test]
async fn test_unknown_family_is_not_found() {
    let (_manager, state) = managers();

    let (status, body) = send(state, "POST", "/admin/consumers/billing/stop").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["errors"][0]["code"], "admin.unknown_family");
}

#[tokio::test]
async fn test_health_routes() {
    let (manager, state) = managers();

    let (status, _) = send(state.clone(), "GET", "/health").await;
    assert_eq!(status, StatusCode::OK);

    manager.stop_execution();
    let (status, body) = send(state, "GET", "/health/ready").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "degraded");
}

#[tokio::test]
async fn test_faulted_supervisor_is_not_ready() {
    let (_consumer, supervisor) = fragile_supervisor(usize::MAX);
    let state = AdminState::new().with_supervisor(Arc::clone(&supervisor));

    supervisor.start().unwrap();
    wait_for_state(&supervisor, SupervisorState::Faulted).await;

    let (status, body) = send(state.clone(), "GET", "/health/ready").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["consumers"][0]["supervisor"], "faulted");
    assert_eq!(body["consumers"][0]["stopped"], false);

    let (status, body) = send(state, "GET", "/admin/consumers").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["value"][0]["supervisor"], "faulted");

    let _ = supervisor.stop(WAIT).await;
}

#[tokio::test]
async fn test_restart_route_revives_faulted_supervisor() {
    let (consumer, supervisor) = fragile_supervisor(1);
    let state = AdminState::new().with_supervisor(Arc::clone(&supervisor));

    supervisor.start().unwrap();
    wait_for_state(&supervisor, SupervisorState::Faulted).await;

    let (status, body) = send(state.clone(), "POST", "/admin/consumers/domain/restart").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["value"]["generation"], 1);

    consumer.wait_for_starts(2, WAIT).await.unwrap();
    wait_for_state(&supervisor, SupervisorState::Running).await;

    let (status, body) = send(state, "GET", "/health/ready").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");

    supervisor.stop(WAIT).await.unwrap();
}

#[tokio::test]
async fn test_stop_route_parks_supervisor_until_restart() {
    let (consumer, supervisor) = fragile_supervisor(0);
    let state = AdminState::new().with_supervisor(Arc::clone(&supervisor));

    supervisor.start().unwrap();
    consumer.wait_for_starts(1, WAIT).await.unwrap();

    let (status, _) = send(state.clone(), "POST", "/admin/consumers/domain/stop").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    wait_for_state(&supervisor, SupervisorState::Stopped).await;

    let (status, _) = send(state.clone(), "GET", "/health/ready").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    send(state, "POST", "/admin/consumers/domain/restart").await;
    consumer.wait_for_starts(2, WAIT).await.unwrap();
    wait_for_state(&supervisor, SupervisorState::Running).await;

    supervisor.stop(WAIT).await.unwrap();
}
