//! Wire codecs for the live audio path.
//!
//! * [`text`]: base64 framing of raw byte buffers (standard alphabet, padded).
//! * [`pcm`] : PCM16 little-endian ⇄ normalized `f32` sample conversion.
//!
//! # Pipeline
//!
//! ```text
//! outbound:  f32 samples → encode_pcm16 (clamped) → encode_bytes_to_text → session
//! inbound:   session → decode_text_to_bytes → decode_pcm16 → SampleBuffer → playback
//! ```

pub mod pcm;
pub mod text;

use thiserror::Error;

pub use pcm::{decode_pcm16, encode_pcm16, SampleBuffer};
pub use text::{decode_text_to_bytes, encode_bytes_to_text};

// ---------------------------------------------------------------------------
// CodecError
// ---------------------------------------------------------------------------

/// Errors raised while decoding audio payloads.
///
/// Both variants are per-frame failures: the caller drops the offending frame
/// and carries on with the session.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    /// The text payload is not valid base64 (bad alphabet or padding).
    #[error("invalid base64 payload: {0}")]
    Decode(String),

    /// The byte length does not fit the sample width / channel layout.
    #[error("malformed PCM16 audio: {0}")]
    MalformedAudio(String),
}

impl From<base64::DecodeError> for CodecError {
    fn from(e: base64::DecodeError) -> Self {
        CodecError::Decode(e.to_string())
    }
}
