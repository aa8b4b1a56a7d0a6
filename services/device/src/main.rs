use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use voicebridge_device::{DeviceClient, DeviceConfig, status::LogIndicator};

/// Listens for the `Ctrl+C` signal to stop reconnecting and exit.
async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down...");
    shutdown.cancel();
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = DeviceConfig::parse();

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();

    // Capture, receive and playback share one thread, like on the board.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build runtime")?;

    runtime.block_on(async move {
        info!(relay_url = %config.relay_url, "Starting device client.");
        let shutdown = CancellationToken::new();
        tokio::spawn(shutdown_signal(shutdown.clone()));
        DeviceClient::new(config, Arc::new(LogIndicator::default()))
            .run(shutdown)
            .await;
    });
    Ok(())
}
