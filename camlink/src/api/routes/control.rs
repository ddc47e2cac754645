//! Channel and lifecycle control routes.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::Serialize;

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::scheduler::ChannelSelector;
use crate::supervisor::SupervisorStatus;

/// Create the control router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/start/{selector}", get(start).post(start))
        .route("/stop/{selector}", get(stop).post(stop))
        .route("/restart", post(restart))
        .route("/shutdown", post(shutdown))
        .route("/status", get(status))
}

/// Acknowledgement for control actions.
#[derive(Debug, Serialize)]
pub struct ControlResponse {
    pub action: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<ChannelSelector>,
}

fn parse_selector(raw: &str) -> ApiResult<ChannelSelector> {
    raw.parse().map_err(ApiError::bad_request)
}

async fn start(
    State(state): State<AppState>,
    Path(selector): Path<String>,
) -> ApiResult<Json<ControlResponse>> {
    let selector = parse_selector(&selector)?;
    state.supervisor.start(selector).await?;
    Ok(Json(ControlResponse {
        action: "start",
        selector: Some(selector),
    }))
}

async fn stop(
    State(state): State<AppState>,
    Path(selector): Path<String>,
) -> ApiResult<Json<ControlResponse>> {
    let selector = parse_selector(&selector)?;
    state.supervisor.stop(selector).await?;
    Ok(Json(ControlResponse {
        action: "stop",
        selector: Some(selector),
    }))
}

async fn restart(State(state): State<AppState>) -> ApiResult<(StatusCode, Json<ControlResponse>)> {
    state.supervisor.restart().await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ControlResponse {
            action: "restart",
            selector: None,
        }),
    ))
}

async fn shutdown(State(state): State<AppState>) -> ApiResult<(StatusCode, Json<ControlResponse>)> {
    state.supervisor.shutdown().await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ControlResponse {
            action: "shutdown",
            selector: None,
        }),
    ))
}

/// Body of `GET /status`.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    #[serde(flatten)]
    pub status: SupervisorStatus,
}

async fn status(State(state): State<AppState>) -> ApiResult<Json<StatusResponse>> {
    let status = state.supervisor.status().await?;
    Ok(Json(StatusResponse {
        uptime_secs: state.start_time.elapsed().as_secs(),
        status,
    }))
}
