//! Axum Router Configuration

use crate::{state::AppState, ws::ws_handler};

use axum::{Router, routing::get};
use std::sync::Arc;

/// Creates the main Axum router for the application.
///
/// Devices connect to `/`; `/ws` is accepted as well.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .with_state(app_state)
}

async fn health() -> &'static str {
    "ok"
}
