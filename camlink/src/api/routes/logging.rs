//! Logging API routes.
//!
//! Read and replace the active log filter at runtime.

use axum::{Json, Router, extract::State, routing::get};
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;

/// Create the logging router.
pub fn router() -> Router<AppState> {
    Router::new().route("/", get(get_logging_config).put(update_logging_config))
}

/// Current logging configuration.
#[derive(Debug, Serialize, Deserialize)]
pub struct LoggingConfigResponse {
    pub filter: String,
}

/// Request to replace the filter directive.
#[derive(Debug, Deserialize)]
pub struct UpdateLogFilterRequest {
    /// e.g. `camlink=debug,frame_codec=info`
    pub filter: String,
}

pub async fn get_logging_config(
    State(state): State<AppState>,
) -> ApiResult<Json<LoggingConfigResponse>> {
    let config = state
        .logging_config
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Logging configuration not available"))?;

    Ok(Json(LoggingConfigResponse {
        filter: config.get_filter(),
    }))
}

pub async fn update_logging_config(
    State(state): State<AppState>,
    Json(request): Json<UpdateLogFilterRequest>,
) -> ApiResult<Json<LoggingConfigResponse>> {
    let config = state
        .logging_config
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Logging configuration not available"))?;

    if request.filter.trim().is_empty() {
        return Err(ApiError::bad_request("Filter must not be empty"));
    }
    config.set_filter(&request.filter)?;

    Ok(Json(LoggingConfigResponse {
        filter: config.get_filter(),
    }))
}
