//! Main Entrypoint for the Voicebridge Relay
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Building the dialogue connector shared by all device sessions.
//! 3. Constructing the Axum router.
//! 4. Starting the server and handling graceful shutdown.

use anyhow::Context;
use dialog_realtime::WsConnector;
use std::{net::SocketAddr, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::info;
use voicebridge_relay::{config::Config, router::create_router, state::AppState};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
    shutdown.cancel();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Shared Services ---
    let shutdown = CancellationToken::new();
    let app_state = Arc::new(AppState {
        connector: Arc::new(WsConnector::new(config.dialog.clone())),
        config: Arc::new(config.clone()),
        shutdown: shutdown.clone(),
    });

    let app = create_router(app_state);

    // --- 4. Start Server ---
    info!(
        dialog_url = %config.dialog.url,
        speaker = %config.speaker,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown))
    .await?;

    info!("Server has shut down.");
    Ok(())
}
