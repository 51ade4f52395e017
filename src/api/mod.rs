//! HTTP API module for health, readiness, status and metrics endpoints.

pub mod handlers;
pub mod routes;

pub use handlers::{AppState, PositionView, StatusSnapshot};
pub use routes::create_router;
