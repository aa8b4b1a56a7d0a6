use std::io;

use thiserror::Error;

pub type DeviceResult<T> = Result<T, DeviceError>;

#[derive(Debug, Error)]
pub enum DeviceError {
    /// The relay did not accept the WebSocket upgrade.
    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    /// The relay ended the connection.
    #[error("connection closed")]
    Closed,

    /// The relay sent something that is not valid WebSocket framing.
    #[error("protocol violation: {0}")]
    Protocol(String),
}
