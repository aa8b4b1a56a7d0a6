//! Shared Application State

use crate::config::Config;
use dialog_realtime::Connector;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Opens one dialogue connection per device.
    pub connector: Arc<dyn Connector>,
    /// Cancelled on server shutdown; every relay watches it.
    pub shutdown: CancellationToken,
}
