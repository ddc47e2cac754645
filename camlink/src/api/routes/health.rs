//! Liveness route.

use axum::{Router, routing::get};

use crate::api::server::AppState;

/// Create the liveness router.
pub fn router() -> Router<AppState> {
    Router::new().route("/", get(liveness_check))
}

/// Liveness check - is the process up?
async fn liveness_check() -> &'static str {
    "ok"
}
