//! Base64 text framing for binary audio payloads.
//!
//! The vendor wire format carries every audio frame as a base64 string with
//! the standard alphabet and `=` padding.
//!
//! ```rust
//! use studio_live::codec::{decode_text_to_bytes, encode_bytes_to_text};
//!
//! let text = encode_bytes_to_text(b"hello");
//! assert_eq!(text, "aGVsbG8=");
//! assert_eq!(decode_text_to_bytes(&text).unwrap(), b"hello");
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use super::CodecError;

/// Encode `bytes` as padded standard base64.
pub fn encode_bytes_to_text(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode padded standard base64 back into bytes.
///
/// # Errors
///
/// [`CodecError::Decode`] on characters outside the alphabet or
/// non-canonical padding.
pub fn decode_text_to_bytes(text: &str) -> Result<Vec<u8>, CodecError> {
    Ok(STANDARD.decode(text)?)
}
