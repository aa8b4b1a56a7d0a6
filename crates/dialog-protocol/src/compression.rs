//! Gzip helpers for request and response payloads.

use std::io::{Read, Write};

use flate2::{Compression as Level, read::GzDecoder, write::GzEncoder};

use crate::error::{ProtocolError, ProtocolResult};

/// Gzip-compresses `data` with the default compression level.
pub fn gzip_compress(data: &[u8]) -> ProtocolResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2 + 32), Level::default());
    encoder.write_all(data).map_err(ProtocolError::Compress)?;
    encoder.finish().map_err(ProtocolError::Compress)
}

/// Inflates a gzip member.
pub fn gzip_decompress(data: &[u8]) -> ProtocolResult<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::with_capacity(data.len() * 2);
    decoder
        .read_to_end(&mut out)
        .map_err(ProtocolError::Decompress)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_empty() {
        let packed = gzip_compress(&[]).unwrap();
        assert!(!packed.is_empty(), "gzip always emits a header");
        assert_eq!(gzip_decompress(&packed).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn roundtrip_audio_like_bytes() {
        let pcm: Vec<u8> = (0..4096u32).map(|i| (i * 31 % 251) as u8).collect();
        let packed = gzip_compress(&pcm).unwrap();
        assert_eq!(gzip_decompress(&packed).unwrap(), pcm);
    }

    #[test]
    fn decompress_garbage_fails() {
        let err = gzip_decompress(b"definitely not gzip").unwrap_err();
        assert!(matches!(err, ProtocolError::Decompress(_)));
    }
}
