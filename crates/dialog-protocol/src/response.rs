//! Builders for the frames a server sends, plus request inspection.
//!
//! The client never needs these; they exist for in-process fakes of the
//! dialogue service.

use serde_json::Value;

use crate::codec::{Compression, Header, MessageType, Serialization, encode_request};
use crate::compression::gzip_compress;
use crate::error::ProtocolResult;
use crate::flags;

/// A `ServerFullResponse` carrying a gzip JSON payload.
pub fn full_response(event: u32, session_id: &str, payload: &Value) -> ProtocolResult<Vec<u8>> {
    let header = Header {
        message_type: MessageType::ServerFullResponse,
        ..Header::default()
    };
    let body = gzip_compress(&serde_json::to_vec(payload)?)?;
    Ok(encode_request(&header, Some(event), Some(session_id), &body))
}

/// A `ServerFullResponse` with a zero-length body.
pub fn empty_response(event: u32, session_id: &str) -> ProtocolResult<Vec<u8>> {
    let header = Header {
        message_type: MessageType::ServerFullResponse,
        ..Header::default()
    };
    Ok(encode_request(&header, Some(event), Some(session_id), &[]))
}

/// A `ServerAck` carrying synthesized audio.
pub fn audio_ack(event: u32, session_id: &str, audio: &[u8]) -> ProtocolResult<Vec<u8>> {
    let header = Header {
        message_type: MessageType::ServerAck,
        serialization: Serialization::None,
        ..Header::default()
    };
    let body = gzip_compress(audio)?;
    Ok(encode_request(&header, Some(event), Some(session_id), &body))
}

/// A `ServerErrorResponse` with an uncompressed JSON body.
pub fn error_response(code: u32, payload: &Value) -> ProtocolResult<Vec<u8>> {
    let header = Header {
        message_type: MessageType::ServerErrorResponse,
        flags: flags::NO_SEQUENCE,
        compression: Compression::None,
        ..Header::default()
    };
    let body = serde_json::to_vec(payload)?;
    // The error code sits where a request carries its event.
    Ok(encode_request(&header, Some(code), None, &body))
}

/// Reads the event code of a client request without decoding the rest.
pub fn peek_event(frame: &[u8]) -> Option<u32> {
    let header_len = usize::from(*frame.first()? & 0x0f) * 4;
    let bits = frame.get(1)? & 0x0f;
    if bits & flags::MSG_WITH_EVENT == 0 {
        return None;
    }
    let bytes = frame.get(header_len..header_len + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Payload, ServerMessage, parse_response};
    use crate::request::ClientRequest;
    use crate::event;
    use serde_json::json;

    #[test]
    fn full_response_parses_back() {
        let frame = full_response(event::ASR_INFO, "s1", &json!({"asr_text": "hi"})).unwrap();
        let ServerMessage::FullResponse(parsed) = parse_response(&frame).unwrap() else {
            panic!("expected a full response");
        };
        assert_eq!(parsed.event, Some(event::ASR_INFO));
        assert_eq!(parsed.session_id, "s1");
        assert_eq!(parsed.payload.as_json(), Some(&json!({"asr_text": "hi"})));
    }

    #[test]
    fn empty_response_has_no_payload() {
        let frame = empty_response(event::VAD_BEGIN, "s1").unwrap();
        let ServerMessage::FullResponse(parsed) = parse_response(&frame).unwrap() else {
            panic!("expected a full response");
        };
        assert_eq!(parsed.event, Some(event::VAD_BEGIN));
        assert_eq!(parsed.payload, Payload::Empty);
        assert_eq!(parsed.payload_size, 0);
    }

    #[test]
    fn audio_ack_carries_raw_bytes() {
        let frame = audio_ack(352, "s1", &[9, 8, 7]).unwrap();
        let ServerMessage::Ack(parsed) = parse_response(&frame).unwrap() else {
            panic!("expected an ack");
        };
        assert_eq!(parsed.payload, Payload::Binary(vec![9u8, 8, 7].into()));
    }

    #[test]
    fn error_response_carries_code_and_message() {
        let frame = error_response(45_000_001, &json!({"error": "quota exceeded"})).unwrap();
        let ServerMessage::Error(parsed) = parse_response(&frame).unwrap() else {
            panic!("expected an error");
        };
        assert_eq!(parsed.code, 45_000_001);
        assert_eq!(parsed.message(), "quota exceeded");
    }

    #[test]
    fn peek_event_reads_requests() {
        let request = ClientRequest::control(event::FINISH_SESSION, Some("s1"), &json!({})).unwrap();
        assert_eq!(peek_event(&request.bytes), Some(event::FINISH_SESSION));
        assert_eq!(peek_event(&[0x11]), None);
    }
}
