//! Control API.
//!
//! Routes:
//! - `GET /` liveness
//! - `GET|POST /start/{selector}`, `GET|POST /stop/{selector}` where the
//!   selector is a channel position or `all`
//! - `POST /restart`, `POST /shutdown`
//! - `GET /status`
//! - `GET|PUT /logging`

pub mod error;
pub mod routes;
pub mod server;

pub use error::{ApiError, ApiResult};
pub use server::{ApiServer, AppState};
