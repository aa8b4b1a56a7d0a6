//! Byte-frame connections to the dialogue service.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        Error as WsError,
        client::IntoClientRequest,
        http::HeaderValue,
        protocol::Message as WsMessage,
    },
};
use tracing::{debug, info};

use crate::error::{DialogError, DialogResult};

/// A bidirectional connection carrying whole binary frames.
///
/// `recv` must be cancel safe: the bridge polls it inside `select!`.
#[async_trait]
pub trait DialogTransport: Send {
    async fn send(&mut self, frame: Vec<u8>) -> DialogResult<()>;
    async fn recv(&mut self) -> DialogResult<Vec<u8>>;
    async fn close(&mut self) -> DialogResult<()>;
}

/// Opens transports to the dialogue service, one per session.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> DialogResult<Box<dyn DialogTransport>>;
}

/// Endpoint and credentials of the dialogue service.
#[derive(Clone, Debug)]
pub struct ConnectConfig {
    pub url: String,
    pub app_id: String,
    pub access_key: String,
    pub resource_id: String,
    pub app_key: String,
}

/// Opens authenticated WebSocket connections.
#[derive(Clone, Debug)]
pub struct WsConnector {
    config: ConnectConfig,
}

impl WsConnector {
    pub fn new(config: ConnectConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> DialogResult<Box<dyn DialogTransport>> {
        let connect_id = uuid::Uuid::new_v4().to_string();
        let mut request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| DialogError::Connection(format!("invalid url {}: {e}", self.config.url)))?;

        let headers = request.headers_mut();
        for (name, value) in [
            ("x-api-app-id", self.config.app_id.as_str()),
            ("x-api-access-key", self.config.access_key.as_str()),
            ("x-api-resource-id", self.config.resource_id.as_str()),
            ("x-api-app-key", self.config.app_key.as_str()),
            ("x-api-connect-id", connect_id.as_str()),
        ] {
            let value = HeaderValue::from_str(value)
                .map_err(|e| DialogError::Connection(format!("invalid {name} header: {e}")))?;
            headers.insert(name, value);
        }

        let (stream, response) = connect_async(request)
            .await
            .map_err(|e| DialogError::Connection(format!("{}: {e}", self.config.url)))?;
        let logid = response
            .headers()
            .get("x-tt-logid")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        info!(url = %self.config.url, %connect_id, ?logid, "Connected to dialogue service.");

        Ok(Box::new(WsTransport { stream, logid }))
    }
}

/// A dialogue connection over a WebSocket.
pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    logid: Option<String>,
}

impl WsTransport {
    /// Server-assigned request id, useful when reporting problems upstream.
    pub fn logid(&self) -> Option<&str> {
        self.logid.as_deref()
    }
}

#[async_trait]
impl DialogTransport for WsTransport {
    async fn send(&mut self, frame: Vec<u8>) -> DialogResult<()> {
        self.stream
            .send(WsMessage::Binary(frame.into()))
            .await
            .map_err(map_ws_error)
    }

    async fn recv(&mut self) -> DialogResult<Vec<u8>> {
        loop {
            match self.stream.next().await {
                Some(Ok(WsMessage::Binary(data))) => return Ok(data.into()),
                Some(Ok(WsMessage::Text(text))) => {
                    debug!(len = text.len(), "Ignoring text frame from dialogue service.");
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    info!(?frame, "Dialogue service closed the connection.");
                    return Err(DialogError::TransportClosed);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(map_ws_error(e)),
                None => return Err(DialogError::TransportClosed),
            }
        }
    }

    async fn close(&mut self) -> DialogResult<()> {
        match self.stream.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(map_ws_error(e)),
        }
    }
}

fn map_ws_error(error: WsError) -> DialogError {
    match error {
        WsError::ConnectionClosed | WsError::AlreadyClosed => DialogError::TransportClosed,
        other => DialogError::Transport(other.to_string()),
    }
}
