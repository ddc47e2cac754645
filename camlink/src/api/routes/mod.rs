//! API route definitions.

pub mod control;
pub mod health;
pub mod logging;

use axum::Router;

use crate::api::server::AppState;

/// Create the main router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(control::router())
        .nest("/logging", logging::router())
        .with_state(state)
}
