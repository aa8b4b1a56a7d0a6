//! Binary framing for the realtime dialogue service.
//!
//! Every message starts with a 4-byte header followed by an optional header
//! extension and a message-type specific body:
//!
//! ```text
//! byte 0: version (4 bits)        | header size in 32-bit words (4 bits)
//! byte 1: message type (4 bits)   | message type specific flags (4 bits)
//! byte 2: serialization (4 bits)  | compression (4 bits)
//! byte 3: reserved
//! [extension: (header size - 1) * 4 bytes]
//! ```
//!
//! Requests append an optional event code, an optional length-prefixed
//! session id and a length-prefixed payload. See [`codec`] for the exact
//! layout of server responses.

pub mod codec;
pub mod compression;
pub mod error;
pub mod event;
pub mod request;
pub mod response;

pub use codec::{
    EventFrame, ErrorFrame, Header, MessageType, Payload, ServerMessage, Serialization,
    Compression, encode_header, encode_request, parse_response,
};
pub use compression::{gzip_compress, gzip_decompress};
pub use error::{ProtocolError, ProtocolResult};
pub use request::ClientRequest;

/// Protocol version spoken by this crate.
pub const PROTOCOL_VERSION: u8 = 0b0001;

/// Header size, in 32-bit words, of a header without extension.
pub const DEFAULT_HEADER_SIZE: u8 = 0b0001;

/// Message type specific flag bits.
pub mod flags {
    /// No sequence number.
    pub const NO_SEQUENCE: u8 = 0b0000;
    pub const POS_SEQUENCE: u8 = 0b0001;
    /// A 4-byte sequence number follows the header.
    pub const NEG_SEQUENCE: u8 = 0b0010;
    pub const NEG_SEQUENCE_1: u8 = 0b0011;
    /// A 4-byte event code follows the header (after the sequence, if any).
    pub const MSG_WITH_EVENT: u8 = 0b0100;
}
