//! Protocol error types.

use thiserror::Error;

/// Result type for codec operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while decoding a frame from the dialogue service.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame ended before a field it declared.
    #[error("incomplete message: {field} needs {expected} bytes, got {received}")]
    Incomplete {
        field: &'static str,
        expected: usize,
        received: usize,
    },

    /// The session id length prefix was negative.
    #[error("invalid session id length: {0}")]
    InvalidSessionIdLength(i32),

    /// The header declared a size smaller than the fixed header.
    #[error("invalid header size: {0} words")]
    InvalidHeaderSize(u8),

    /// Gzip decompression failed.
    #[error("decompression failed: {0}")]
    Decompress(#[source] std::io::Error),

    /// Gzip compression failed.
    #[error("compression failed: {0}")]
    Compress(#[source] std::io::Error),

    /// A JSON payload could not be parsed or produced.
    #[error("json payload: {0}")]
    Json(#[from] serde_json::Error),

    /// A text payload was not valid UTF-8.
    #[error("text payload is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}
