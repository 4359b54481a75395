//! API v0 endpoints.
//!
//! Version 0 signals an unstable API -- breaking changes are expected
//! until the monitor reaches 1.0.

use std::future::Future;
use std::time::Duration;

use axum::{Json, extract::State, http::StatusCode};
use utoipa_axum::{router::OpenApiRouter, routes};

use super::server::SharedState;
use crate::api_client::types::{AcknowledgeResponse, MonitorState};
use crate::app_event::AppEvent;
use crate::tracing::prelude::*;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Build the v0 API routes with OpenAPI metadata.
pub fn routes() -> OpenApiRouter<SharedState> {
    OpenApiRouter::new()
        .routes(routes!(health))
        .routes(routes!(get_monitor))
        .routes(routes!(start_monitor))
        .routes(routes!(stop_monitor))
        .routes(routes!(acknowledge))
        .routes(routes!(sos))
        .routes(routes!(drain_events))
}

/// Await a session command, mapping timeout and a closed session to 500.
async fn session_call<T>(
    command: &'static str,
    call: impl Future<Output = crate::error::Result<T>>,
) -> Result<T, StatusCode> {
    match tokio::time::timeout(COMMAND_TIMEOUT, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            error!(command, error = %e, "Session command failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
        Err(_) => {
            error!(command, "Session command timed out");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn persist_enabled(state: &SharedState, enabled: bool) {
    if let Err(e) = state.prefs.set_enabled(enabled).await {
        warn!(enabled, error = %e, "Failed to persist monitoring preference");
    }
}

/// Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = OK, description = "Server is running", body = String),
    ),
)]
async fn health() -> &'static str {
    "OK"
}

/// Return the current monitor state.
#[utoipa::path(
    get,
    path = "/monitor",
    tag = "monitor",
    responses(
        (status = OK, description = "Current monitor state", body = MonitorState),
        (status = INTERNAL_SERVER_ERROR, description = "Session unavailable"),
    ),
)]
async fn get_monitor(State(state): State<SharedState>) -> Result<Json<MonitorState>, StatusCode> {
    session_call("refresh", state.monitor.refresh())
        .await
        .map(Json)
}

/// Start monitoring and remember to resume it on the next boot.
#[utoipa::path(
    post,
    path = "/monitor/start",
    tag = "monitor",
    responses(
        (status = OK, description = "Monitor state after starting", body = MonitorState),
        (status = INTERNAL_SERVER_ERROR, description = "Session unavailable"),
    ),
)]
async fn start_monitor(State(state): State<SharedState>) -> Result<Json<MonitorState>, StatusCode> {
    persist_enabled(&state, true).await;
    session_call("start", state.monitor.start()).await.map(Json)
}

/// Stop monitoring. Any open check-in is abandoned without escalating.
#[utoipa::path(
    post,
    path = "/monitor/stop",
    tag = "monitor",
    responses(
        (status = OK, description = "Monitor state after stopping", body = MonitorState),
        (status = INTERNAL_SERVER_ERROR, description = "Session unavailable"),
    ),
)]
async fn stop_monitor(State(state): State<SharedState>) -> Result<Json<MonitorState>, StatusCode> {
    persist_enabled(&state, false).await;
    session_call("stop", state.monitor.stop()).await.map(Json)
}

/// Confirm the user is okay, cancelling a pending escalation.
#[utoipa::path(
    post,
    path = "/monitor/acknowledge",
    tag = "monitor",
    responses(
        (status = OK, description = "Whether a check-in was open", body = AcknowledgeResponse),
        (status = INTERNAL_SERVER_ERROR, description = "Session unavailable"),
    ),
)]
async fn acknowledge(
    State(state): State<SharedState>,
) -> Result<Json<AcknowledgeResponse>, StatusCode> {
    let resolved = session_call("acknowledge", state.monitor.acknowledge()).await?;
    Ok(Json(AcknowledgeResponse { resolved }))
}

/// Queue a manual SOS for the app layer, as the home-screen widget does.
#[utoipa::path(
    post,
    path = "/sos",
    tag = "events",
    responses(
        (status = ACCEPTED, description = "SOS queued"),
    ),
)]
async fn sos(State(state): State<SharedState>) -> StatusCode {
    state.app_events.trigger_sos();
    StatusCode::ACCEPTED
}

/// Remove and return every queued app-layer event, oldest first.
#[utoipa::path(
    post,
    path = "/events/drain",
    tag = "events",
    responses(
        (status = OK, description = "Queued events", body = Vec<AppEvent>),
    ),
)]
async fn drain_events(State(state): State<SharedState>) -> Json<Vec<AppEvent>> {
    Json(state.app_events.drain())
}
