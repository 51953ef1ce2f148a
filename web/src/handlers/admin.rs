//! Consumer control endpoints.
//!
//! ```text
//! GET  /admin/consumers
//! POST /admin/consumers/:family/restart
//! POST /admin/consumers/:family/stop
//! ```
//!
//! Restart and stop act only on the [`ConsumerManager`] signal; the host
//! process keeps running. A supervisor parked after a stop or after running out
//! of retries resumes on restart.

use crate::error::{WebError, WebResult};
use crate::response::OutcomeResponse;
use crate::state::{AdminState, ConsumerReport};
use axum::extract::{Path, State};
use courier_core::message::MessageFamily;
use courier_core::outcome::HttpOutcome;
use courier_runtime::ConsumerManager;
use std::sync::Arc;

fn resolve<'a>(state: &'a AdminState, family: &str) -> Result<(MessageFamily, &'a Arc<ConsumerManager>), WebError> {
    let family = MessageFamily::parse(family).ok_or_else(|| WebError::UnknownFamily(family.to_string()))?;
    let manager = state.manager(family).ok_or(WebError::ConsumerNotRegistered(family))?;
    Ok((family, manager))
}

fn report(state: &AdminState, family: MessageFamily) -> WebResult<OutcomeResponse<ConsumerReport>> {
    let report = state.report(family).ok_or(WebError::ConsumerNotRegistered(family))?;
    Ok(HttpOutcome::accepted(report).into())
}

/// List the status of every registered consumer.
#[allow(clippy::unused_async)]
pub async fn list_consumers(State(state): State<AdminState>) -> OutcomeResponse<Vec<ConsumerReport>> {
    HttpOutcome::ok(state.reports()).into()
}

/// Cancel the consumer's current signal and install a fresh one.
///
/// The reported supervisor state is taken right after the restart and may
/// still show the state the supervisor is leaving.
///
/// # Errors
///
/// 404 if the family is unknown or has no registered consumer.
#[allow(clippy::unused_async)]
pub async fn restart_consumer(
    State(state): State<AdminState>,
    Path(family): Path<String>,
) -> WebResult<OutcomeResponse<ConsumerReport>> {
    let (family, manager) = resolve(&state, &family)?;
    let generation = manager.restart_execution();
    tracing::debug!(consumer = manager.name(), generation, "Restart issued from admin endpoint");
    report(&state, family)
}

/// Cancel the consumer's current signal without replacing it.
///
/// # Errors
///
/// 404 if the family is unknown or has no registered consumer.
#[allow(clippy::unused_async)]
pub async fn stop_consumer(
    State(state): State<AdminState>,
    Path(family): Path<String>,
) -> WebResult<OutcomeResponse<ConsumerReport>> {
    let (family, manager) = resolve(&state, &family)?;
    manager.stop_execution();
    tracing::debug!(consumer = manager.name(), "Stop issued from admin endpoint");
    report(&state, family)
}
