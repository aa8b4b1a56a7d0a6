//! Builders for the requests a client sends.

use serde_json::Value;

use crate::codec::{Header, encode_request};
use crate::compression::gzip_compress;
use crate::error::ProtocolResult;

/// A fully encoded client request, ready to be written to the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRequest {
    pub event: u32,
    pub bytes: Vec<u8>,
}

impl ClientRequest {
    /// A gzip-compressed JSON control request.
    ///
    /// Connection-scoped events (StartConnection, FinishConnection) pass
    /// `None` as the session id; every other event carries it.
    pub fn control(event: u32, session_id: Option<&str>, payload: &Value) -> ProtocolResult<Self> {
        let json = serde_json::to_vec(payload)?;
        let body = gzip_compress(&json)?;
        Ok(Self {
            event,
            bytes: encode_request(&Header::default(), Some(event), session_id, &body),
        })
    }

    /// A gzip-compressed raw audio request.
    pub fn audio(event: u32, session_id: &str, pcm: &[u8]) -> ProtocolResult<Self> {
        let body = gzip_compress(pcm)?;
        Ok(Self {
            event,
            bytes: encode_request(&Header::audio_only(), Some(event), Some(session_id), &body),
        })
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::gzip_decompress;
    use crate::event;
    use serde_json::json;

    fn read_u32(bytes: &[u8], at: usize) -> u32 {
        u32::from_be_bytes(bytes[at..at + 4].try_into().unwrap())
    }

    #[test]
    fn start_connection_has_no_session_id() {
        let request = ClientRequest::control(event::START_CONNECTION, None, &json!({})).unwrap();
        let bytes = request.into_bytes();
        assert_eq!(&bytes[..4], &[0x11, 0x14, 0x11, 0x00]);
        assert_eq!(read_u32(&bytes, 4), 1);
        let len = read_u32(&bytes, 8) as usize;
        assert_eq!(bytes.len(), 12 + len);
        assert_eq!(gzip_decompress(&bytes[12..]).unwrap(), b"{}");
    }

    #[test]
    fn control_request_carries_session_id() {
        let request = ClientRequest::control(
            event::CHAT_TEXT_QUERY,
            Some("abc"),
            &json!({"content": "hello"}),
        )
        .unwrap();
        let bytes = &request.bytes;
        assert_eq!(read_u32(bytes, 4), 501);
        assert_eq!(read_u32(bytes, 8), 3);
        assert_eq!(&bytes[12..15], b"abc");
        let len = read_u32(bytes, 15) as usize;
        let body = gzip_decompress(&bytes[19..19 + len]).unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value, json!({"content": "hello"}));
    }

    #[test]
    fn audio_request_is_unserialized_gzip() {
        let pcm = vec![0u8, 1, 2, 3, 4, 5];
        let request = ClientRequest::audio(event::TASK_REQUEST, "abc", &pcm).unwrap();
        let bytes = &request.bytes;
        assert_eq!(&bytes[..4], &[0x11, 0x24, 0x01, 0x00]);
        assert_eq!(read_u32(bytes, 4), 200);
        let len = read_u32(bytes, 15) as usize;
        assert_eq!(gzip_decompress(&bytes[19..19 + len]).unwrap(), pcm);
    }
}
