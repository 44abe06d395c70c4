//! Strict base64 decoding of message payloads.
//!
//! The upstream writer embeds binary image data as a standard base64 string.
//! Decoding is strict: malformed input fails instead of silently producing
//! truncated bytes, and a zero-byte decode is rejected because an empty
//! `image/jpeg` object is never meaningful.

use base64::{engine::general_purpose::STANDARD, Engine};
use thiserror::Error;

/// Errors that can occur while decoding a payload
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("payload decoded to zero bytes")]
    Empty,
}

/// Decode a base64 payload into raw bytes.
///
/// Uses the standard alphabet with strict padding rules. Returns
/// [`DecodeError::Empty`] for the empty string and for any input that
/// decodes to no bytes.
pub fn decode_payload(payload: &str) -> Result<Vec<u8>, DecodeError> {
    let bytes = STANDARD.decode(payload)?;
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_valid_payload() {
        let bytes = decode_payload("SGVsbG8gV29ybGQ=").unwrap();
        assert_eq!(bytes, b"Hello World");
    }

    #[test]
    fn test_decode_jpeg_header_fragment() {
        // base64 of [0xFF, 0xD8, 0xFF]
        let bytes = decode_payload("/9j/").unwrap();
        assert_eq!(bytes, vec![0xFF, 0xD8, 0xFF]);
    }

    #[test]
    fn test_decode_rejects_malformed_input() {
        let err = decode_payload("not base64!!").unwrap_err();
        assert!(matches!(err, DecodeError::InvalidBase64(_)));
    }

    #[test]
    fn test_decode_rejects_bad_padding() {
        let err = decode_payload("SGVsbG8").unwrap_err();
        assert!(matches!(err, DecodeError::InvalidBase64(_)));
    }

    #[test]
    fn test_decode_rejects_empty_string() {
        let err = decode_payload("").unwrap_err();
        assert!(matches!(err, DecodeError::Empty));
    }
}
