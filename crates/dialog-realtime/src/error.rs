use dialog_protocol::ProtocolError;
use thiserror::Error;

use crate::client::SessionState;

pub type DialogResult<T> = Result<T, DialogError>;

/// Errors surfaced by the dialogue client and the bridge.
#[derive(Debug, Error)]
pub enum DialogError {
    /// The transport could not be opened or a handshake step failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// A frame from the service could not be decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The service answered with an error response.
    #[error("dialogue service error {code}: {message}")]
    Remote { code: u32, message: String },

    /// The peer closed the connection.
    #[error("transport closed")]
    TransportClosed,

    /// Reading from or writing to the transport failed.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("{operation} is not allowed while the session is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
}

impl DialogError {
    /// Whether the session can keep going after this error.
    ///
    /// Only a malformed message is recoverable: it is dropped and the next
    /// frame is read.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DialogError::Protocol(_))
    }
}
