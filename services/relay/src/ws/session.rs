//! Manages the device WebSocket connection lifecycle.

use super::relay::{DeviceFrame, DeviceSink, DeviceStream, run_relay};
use crate::state::AppState;
use axum::{
    extract::{
        ConnectInfo, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt, future};
use std::{net::SocketAddr, sync::Arc};
use tracing::{error, info, instrument};

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, peer, state))
}

/// Relays one device connection until either side ends it.
#[instrument(name = "device", skip_all, fields(%peer))]
async fn handle_socket(socket: WebSocket, peer: SocketAddr, state: Arc<AppState>) {
    info!("Device connected.");
    let (socket_tx, socket_rx) = socket.split();

    let device_rx: DeviceStream = Box::pin(socket_rx.filter_map(|msg| {
        future::ready(match msg {
            Ok(Message::Binary(data)) => Some(Ok(DeviceFrame::Binary(data))),
            Ok(Message::Text(text)) => Some(Ok(DeviceFrame::Text(text.to_string()))),
            Ok(Message::Close(_)) => Some(Ok(DeviceFrame::Close)),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
            Err(e) => Some(Err(e.into())),
        })
    }));
    let device_tx: DeviceSink = Box::pin(
        socket_tx
            .sink_map_err(anyhow::Error::from)
            .with(|frame: DeviceFrame| {
                future::ready(Ok::<_, anyhow::Error>(match frame {
                    DeviceFrame::Binary(data) => Message::Binary(data),
                    DeviceFrame::Text(text) => Message::Text(text.into()),
                    DeviceFrame::Close => Message::Close(None),
                }))
            }),
    );

    match run_relay(
        device_rx,
        device_tx,
        state.connector.as_ref(),
        state.config.session_config(),
        state.config.bridge_options(),
        &state.shutdown,
    )
    .await
    {
        Ok(stats) => info!(
            bytes_up = stats.bytes_up,
            bytes_down = stats.bytes_down,
            "Device session closed."
        ),
        Err(e) => error!(error = ?e, "Device session terminated with error."),
    }
}
