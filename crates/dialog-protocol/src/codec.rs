//! Header layout, request encoding and response parsing.
//!
//! Server responses are laid out as follows after the header:
//!
//! ```text
//! full response / ack:
//!   [sequence: u32 BE]      if flags & NEG_SEQUENCE
//!   [event: u32 BE]         if flags & MSG_WITH_EVENT
//!   session id length: i32 BE, session id bytes
//!   payload length: u32 BE, payload bytes
//!
//! error response:
//!   error code: u32 BE
//!   payload length: u32 BE, payload bytes
//! ```

use bytes::Bytes;
use serde_json::Value;

use crate::compression::gzip_decompress;
use crate::error::{ProtocolError, ProtocolResult};
use crate::{DEFAULT_HEADER_SIZE, PROTOCOL_VERSION, flags};

/// The 4-bit message type carried in the second header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    ClientFullRequest,
    ClientAudioOnlyRequest,
    ServerFullResponse,
    ServerAck,
    ServerErrorResponse,
    Other(u8),
}

impl MessageType {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x0f {
            0b0001 => Self::ClientFullRequest,
            0b0010 => Self::ClientAudioOnlyRequest,
            0b1001 => Self::ServerFullResponse,
            0b1011 => Self::ServerAck,
            0b1111 => Self::ServerErrorResponse,
            other => Self::Other(other),
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            Self::ClientFullRequest => 0b0001,
            Self::ClientAudioOnlyRequest => 0b0010,
            Self::ServerFullResponse => 0b1001,
            Self::ServerAck => 0b1011,
            Self::ServerErrorResponse => 0b1111,
            Self::Other(bits) => bits & 0x0f,
        }
    }
}

/// How the payload bytes are serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Serialization {
    None,
    Json,
    Thrift,
    Custom,
    Other(u8),
}

impl Serialization {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x0f {
            0b0000 => Self::None,
            0b0001 => Self::Json,
            0b0011 => Self::Thrift,
            0b1111 => Self::Custom,
            other => Self::Other(other),
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            Self::None => 0b0000,
            Self::Json => 0b0001,
            Self::Thrift => 0b0011,
            Self::Custom => 0b1111,
            Self::Other(bits) => bits & 0x0f,
        }
    }
}

/// How the payload bytes are compressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Custom,
    Other(u8),
}

impl Compression {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x0f {
            0b0000 => Self::None,
            0b0001 => Self::Gzip,
            0b1111 => Self::Custom,
            other => Self::Other(other),
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            Self::None => 0b0000,
            Self::Gzip => 0b0001,
            Self::Custom => 0b1111,
            Self::Other(bits) => bits & 0x0f,
        }
    }
}

/// A decoded (or to-be-encoded) message header.
///
/// The header size is not stored: it is always derived from the extension
/// length so the two can never disagree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub message_type: MessageType,
    pub flags: u8,
    pub serialization: Serialization,
    pub compression: Compression,
    pub reserved: u8,
    /// Extension bytes; the length must be a multiple of 4.
    pub extension: Vec<u8>,
}

impl Default for Header {
    /// A gzip-compressed JSON control request carrying an event code.
    fn default() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            message_type: MessageType::ClientFullRequest,
            flags: flags::MSG_WITH_EVENT,
            serialization: Serialization::Json,
            compression: Compression::Gzip,
            reserved: 0,
            extension: Vec::new(),
        }
    }
}

impl Header {
    /// Header for a raw audio request: no serialization, gzip compression.
    pub fn audio_only() -> Self {
        Self {
            message_type: MessageType::ClientAudioOnlyRequest,
            serialization: Serialization::None,
            ..Self::default()
        }
    }

    /// Header size in 32-bit words, including the fixed 4 bytes.
    pub fn size_words(&self) -> u8 {
        (self.extension.len() / 4) as u8 + DEFAULT_HEADER_SIZE
    }

    pub fn has_sequence(&self) -> bool {
        self.flags & flags::NEG_SEQUENCE != 0
    }

    pub fn has_event(&self) -> bool {
        self.flags & flags::MSG_WITH_EVENT != 0
    }
}

/// A decoded response payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Zero-length payload, e.g. a keep-alive.
    Empty,
    Json(Value),
    Text(String),
    /// Unserialized bytes; this is how synthesized audio arrives.
    Binary(Bytes),
}

impl Payload {
    pub fn is_empty(&self) -> bool {
        match self {
            Payload::Empty => true,
            Payload::Json(_) => false,
            Payload::Text(text) => text.is_empty(),
            Payload::Binary(bytes) => bytes.is_empty(),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Converts the payload into a JSON value for event consumers.
    ///
    /// Text becomes a JSON string and binary or empty payloads become `null`.
    pub fn into_json(self) -> Value {
        match self {
            Payload::Json(value) => value,
            Payload::Text(text) => Value::String(text),
            Payload::Empty | Payload::Binary(_) => Value::Null,
        }
    }
}

/// Body of a full response or an ack.
#[derive(Debug, Clone, PartialEq)]
pub struct EventFrame {
    pub sequence: Option<u32>,
    pub event: Option<u32>,
    pub session_id: String,
    pub payload: Payload,
    /// Payload length as declared on the wire (before decompression).
    pub payload_size: u32,
}

/// Body of an error response.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorFrame {
    pub code: u32,
    pub payload: Payload,
    pub payload_size: u32,
}

impl ErrorFrame {
    /// Human readable error message carried by the payload.
    pub fn message(&self) -> String {
        match &self.payload {
            Payload::Json(value) => value
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_owned)
                .unwrap_or_else(|| value.to_string()),
            Payload::Text(text) => text.clone(),
            Payload::Binary(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            Payload::Empty => String::new(),
        }
    }
}

/// One parsed server message.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    FullResponse(EventFrame),
    Ack(EventFrame),
    Error(ErrorFrame),
    /// A message type this codec does not interpret.
    Unrecognized(Header),
}

impl ServerMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            ServerMessage::FullResponse(_) => MessageType::ServerFullResponse,
            ServerMessage::Ack(_) => MessageType::ServerAck,
            ServerMessage::Error(_) => MessageType::ServerErrorResponse,
            ServerMessage::Unrecognized(header) => header.message_type,
        }
    }

    pub fn event(&self) -> Option<u32> {
        match self {
            ServerMessage::FullResponse(frame) | ServerMessage::Ack(frame) => frame.event,
            _ => None,
        }
    }
}

/// Encodes the 4-byte header followed by its extension.
pub fn encode_header(header: &Header) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + header.extension.len());
    out.push(((header.version & 0x0f) << 4) | (header.size_words() & 0x0f));
    out.push((header.message_type.bits() << 4) | (header.flags & 0x0f));
    out.push((header.serialization.bits() << 4) | header.compression.bits());
    out.push(header.reserved);
    out.extend_from_slice(&header.extension);
    out
}

/// Encodes a complete request frame.
///
/// `payload` must already be serialized and compressed as announced by the
/// header.
pub fn encode_request(
    header: &Header,
    event: Option<u32>,
    session_id: Option<&str>,
    payload: &[u8],
) -> Vec<u8> {
    let session_len = session_id.map_or(0, |id| 4 + id.len());
    let mut out = encode_header(header);
    out.reserve(4 + session_len + 4 + payload.len());
    if let Some(event) = event {
        out.extend_from_slice(&event.to_be_bytes());
    }
    if let Some(id) = session_id {
        out.extend_from_slice(&(id.len() as u32).to_be_bytes());
        out.extend_from_slice(id.as_bytes());
    }
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Parses one complete frame received from the server.
pub fn parse_response(data: &[u8]) -> ProtocolResult<ServerMessage> {
    let mut reader = Reader::new(data);
    let fixed = reader.take(4, "header")?;

    let size_words = fixed[0] & 0x0f;
    if size_words == 0 {
        return Err(ProtocolError::InvalidHeaderSize(size_words));
    }
    let extension = reader.take((size_words as usize - 1) * 4, "header extension")?;
    let header = Header {
        version: fixed[0] >> 4,
        message_type: MessageType::from_bits(fixed[1] >> 4),
        flags: fixed[1] & 0x0f,
        serialization: Serialization::from_bits(fixed[2] >> 4),
        compression: Compression::from_bits(fixed[2] & 0x0f),
        reserved: fixed[3],
        extension: extension.to_vec(),
    };

    match header.message_type {
        MessageType::ServerFullResponse | MessageType::ServerAck => {
            let sequence = if header.has_sequence() {
                Some(reader.u32("sequence")?)
            } else {
                None
            };
            let event = if header.has_event() {
                Some(reader.u32("event")?)
            } else {
                None
            };
            let session_len = reader.i32("session id length")?;
            if session_len < 0 {
                return Err(ProtocolError::InvalidSessionIdLength(session_len));
            }
            let session_id =
                String::from_utf8_lossy(reader.take(session_len as usize, "session id")?)
                    .into_owned();
            let payload_size = reader.u32("payload length")?;
            let raw = reader.take(payload_size as usize, "payload")?;
            let frame = EventFrame {
                sequence,
                event,
                session_id,
                payload: decode_payload(&header, raw)?,
                payload_size,
            };
            Ok(match header.message_type {
                MessageType::ServerAck => ServerMessage::Ack(frame),
                _ => ServerMessage::FullResponse(frame),
            })
        }
        MessageType::ServerErrorResponse => {
            let code = reader.u32("error code")?;
            let payload_size = reader.u32("payload length")?;
            let raw = reader.take(payload_size as usize, "payload")?;
            Ok(ServerMessage::Error(ErrorFrame {
                code,
                payload: decode_payload(&header, raw)?,
                payload_size,
            }))
        }
        _ => Ok(ServerMessage::Unrecognized(header)),
    }
}

fn decode_payload(header: &Header, raw: &[u8]) -> ProtocolResult<Payload> {
    if raw.is_empty() {
        return Ok(Payload::Empty);
    }
    let bytes = match header.compression {
        Compression::Gzip => gzip_decompress(raw)?,
        _ => raw.to_vec(),
    };
    Ok(match header.serialization {
        Serialization::None => Payload::Binary(Bytes::from(bytes)),
        Serialization::Json => Payload::Json(serde_json::from_slice(&bytes)?),
        _ => Payload::Text(String::from_utf8(bytes)?),
    })
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize, field: &'static str) -> ProtocolResult<&'a [u8]> {
        let remaining = self.buf.len() - self.pos;
        if remaining < len {
            return Err(ProtocolError::Incomplete {
                field,
                expected: len,
                received: remaining,
            });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn word(&mut self, field: &'static str) -> ProtocolResult<[u8; 4]> {
        let bytes = self.take(4, field)?;
        Ok([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    fn u32(&mut self, field: &'static str) -> ProtocolResult<u32> {
        self.word(field).map(u32::from_be_bytes)
    }

    fn i32(&mut self, field: &'static str) -> ProtocolResult<i32> {
        self.word(field).map(i32::from_be_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::gzip_compress;
    use serde_json::json;

    fn response_header(message_type: MessageType, flags: u8, serialization: Serialization) -> Header {
        Header {
            message_type,
            flags,
            serialization,
            compression: Compression::None,
            ..Header::default()
        }
    }

    #[test]
    fn encode_default_header() {
        let bytes = encode_header(&Header::default());
        assert_eq!(bytes, vec![0x11, 0x14, 0x11, 0x00]);
    }

    #[test]
    fn encode_audio_only_header() {
        let bytes = encode_header(&Header::audio_only());
        assert_eq!(bytes, vec![0x11, 0x24, 0x01, 0x00]);
    }

    #[test]
    fn header_size_follows_extension() {
        let header = Header {
            extension: vec![0xaa; 8],
            ..Header::default()
        };
        let bytes = encode_header(&header);
        assert_eq!(bytes.len(), 12);
        assert_eq!(bytes[0] & 0x0f, 3);
        assert_eq!(&bytes[4..], &[0xaa; 8]);
    }

    #[test]
    fn parses_turn_complete_event() {
        // JSON serialization, no compression.
        let mut data = vec![0x11, 0x94, 0x10, 0x00];
        data.extend_from_slice(&459u32.to_be_bytes());
        data.extend_from_slice(&4u32.to_be_bytes());
        data.extend_from_slice(b"abcd");
        data.extend_from_slice(&2u32.to_be_bytes());
        data.extend_from_slice(b"{}");

        let message = parse_response(&data).unwrap();
        assert_eq!(message.message_type(), MessageType::ServerFullResponse);
        let ServerMessage::FullResponse(frame) = message else {
            panic!("expected a full response");
        };
        assert_eq!(frame.event, Some(459));
        assert_eq!(frame.sequence, None);
        assert_eq!(frame.session_id, "abcd");
        assert_eq!(frame.payload, Payload::Json(json!({})));
        assert_eq!(frame.payload_size, 2);
    }

    #[test]
    fn gzip_flag_with_plain_body_is_rejected() {
        let header = Header {
            message_type: MessageType::ServerFullResponse,
            ..Header::default()
        };
        let frame = encode_request(&header, Some(459), Some("abcd"), b"{}");
        assert!(matches!(parse_response(&frame), Err(ProtocolError::Decompress(_))));
    }

    #[test]
    fn request_encoding_parses_back() {
        let cases = [
            (Serialization::Json, Compression::None, br#"{"content":"hi"}"#.to_vec()),
            (Serialization::Json, Compression::Gzip, br#"{"a":[1,2,3]}"#.to_vec()),
            (Serialization::Thrift, Compression::None, b"plain text".to_vec()),
            (Serialization::None, Compression::Gzip, vec![1, 2, 3, 250, 251]),
        ];
        for (serialization, compression, body) in cases {
            let header = Header {
                message_type: MessageType::ServerFullResponse,
                serialization,
                compression,
                extension: vec![0; 4],
                ..Header::default()
            };
            let wire_body = match compression {
                Compression::Gzip => gzip_compress(&body).unwrap(),
                _ => body.clone(),
            };
            let frame = encode_request(&header, Some(350), Some("session-1"), &wire_body);

            let ServerMessage::FullResponse(parsed) = parse_response(&frame).unwrap() else {
                panic!("expected a full response");
            };
            assert_eq!(parsed.event, Some(350));
            assert_eq!(parsed.session_id, "session-1");
            assert_eq!(parsed.payload_size as usize, wire_body.len());
            match (serialization, parsed.payload) {
                (Serialization::Json, Payload::Json(value)) => {
                    assert_eq!(value, serde_json::from_slice::<Value>(&body).unwrap())
                }
                (Serialization::Thrift, Payload::Text(text)) => assert_eq!(text.as_bytes(), body),
                (Serialization::None, Payload::Binary(bytes)) => assert_eq!(bytes.as_ref(), body),
                (s, other) => panic!("unexpected payload {other:?} for {s:?}"),
            }
        }
    }

    #[test]
    fn parses_ack_with_sequence_and_audio() {
        let header = response_header(
            MessageType::ServerAck,
            flags::NEG_SEQUENCE | flags::MSG_WITH_EVENT,
            Serialization::None,
        );
        let mut data = encode_header(&header);
        data.extend_from_slice(&7u32.to_be_bytes());
        data.extend_from_slice(&352u32.to_be_bytes());
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(&3u32.to_be_bytes());
        data.extend_from_slice(&[9, 8, 7]);

        let ServerMessage::Ack(frame) = parse_response(&data).unwrap() else {
            panic!("expected an ack");
        };
        assert_eq!(frame.sequence, Some(7));
        assert_eq!(frame.event, Some(352));
        assert_eq!(frame.session_id, "");
        assert_eq!(frame.payload, Payload::Binary(Bytes::from_static(&[9, 8, 7])));
    }

    #[test]
    fn parses_error_response() {
        let header = response_header(MessageType::ServerErrorResponse, 0, Serialization::Json);
        let body = br#"{"error":"quota exceeded"}"#;
        let mut data = encode_header(&header);
        data.extend_from_slice(&45000001u32.to_be_bytes());
        data.extend_from_slice(&(body.len() as u32).to_be_bytes());
        data.extend_from_slice(body);

        let ServerMessage::Error(frame) = parse_response(&data).unwrap() else {
            panic!("expected an error response");
        };
        assert_eq!(frame.code, 45000001);
        assert_eq!(frame.message(), "quota exceeded");
    }

    #[test]
    fn empty_payload_is_not_deserialized() {
        let header = Header {
            message_type: MessageType::ServerFullResponse,
            ..Header::default()
        };
        let frame = encode_request(&header, Some(154), Some("s"), &[]);
        let ServerMessage::FullResponse(parsed) = parse_response(&frame).unwrap() else {
            panic!("expected a full response");
        };
        assert_eq!(parsed.payload, Payload::Empty);
        assert!(parsed.payload.is_empty());
    }

    #[test]
    fn unknown_message_type_fails_soft() {
        let message = parse_response(&[0x11, 0x30, 0x00, 0x00, 1, 2, 3]).unwrap();
        assert!(matches!(message, ServerMessage::Unrecognized(_)));
        assert_eq!(message.message_type(), MessageType::Other(3));
    }

    #[test]
    fn client_request_types_are_not_interpreted() {
        let frame = encode_request(&Header::default(), Some(1), None, b"{}");
        assert!(matches!(
            parse_response(&frame).unwrap(),
            ServerMessage::Unrecognized(_)
        ));
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let header = response_header(MessageType::ServerFullResponse, 0, Serialization::Json);
        let mut data = encode_header(&header);
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(&100u32.to_be_bytes());
        data.extend_from_slice(b"{}");

        let err = parse_response(&data).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Incomplete {
                field: "payload",
                expected: 100,
                received: 2
            }
        ));
    }

    #[test]
    fn truncated_header_is_rejected() {
        assert!(matches!(
            parse_response(&[0x11, 0x94]),
            Err(ProtocolError::Incomplete { field: "header", .. })
        ));
        // Header claims one extension word that is missing.
        assert!(matches!(
            parse_response(&[0x12, 0x94, 0x10, 0x00]),
            Err(ProtocolError::Incomplete {
                field: "header extension",
                ..
            })
        ));
    }

    #[test]
    fn negative_session_length_is_rejected() {
        let header = response_header(MessageType::ServerFullResponse, 0, Serialization::Json);
        let mut data = encode_header(&header);
        data.extend_from_slice(&(-1i32).to_be_bytes());
        assert!(matches!(
            parse_response(&data),
            Err(ProtocolError::InvalidSessionIdLength(-1))
        ));
    }

    #[test]
    fn invalid_json_is_rejected() {
        let header = response_header(MessageType::ServerFullResponse, 0, Serialization::Json);
        let frame = encode_request(&header, None, Some("s"), b"{not json");
        assert!(matches!(parse_response(&frame), Err(ProtocolError::Json(_))));
    }
}
