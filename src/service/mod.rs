//! Model Service: request/response operations over the vendor API.
//!
//! # Operations
//!
//! ```text
//!  chat(history, message, settings) ──▶ ChatReply { text, thinking, sources }
//!  generate_image(prompt, settings) ──▶ GeneratedImage { mime_type, bytes }
//!  generate_video(prompt, image, aspect) ──▶ Vec<u8>   (long-running, polled)
//!  transcribe_audio(bytes, mime) ──▶ String
//!  generate_speech(text) ──▶ Vec<u8>                   (PCM16 24 kHz mono)
//! ```
//!
//! The live session factory lives in [`crate::session::GeminiLiveChannel`]
//! and is built from the same [`crate::config::ServiceConfig`].

pub mod gemini;
pub mod wire;

use async_trait::async_trait;
use thiserror::Error;

pub use gemini::GeminiClient;

// ---------------------------------------------------------------------------
// ServiceError
// ---------------------------------------------------------------------------

/// Errors that can occur while calling the Model Service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// No API key was configured.
    #[error("no API key configured")]
    MissingApiKey,

    /// HTTP transport or connection error.
    #[error("HTTP request failed: {0}")]
    Request(String),

    /// The request did not complete within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// The vendor answered with a non-success status.
    #[error("API returned {status}: {message}")]
    Api { status: u16, message: String },

    /// The response body could not be parsed as expected JSON.
    #[error("failed to parse response: {0}")]
    Parse(String),

    /// The response parsed but carried nothing usable.
    #[error("response contained no {0}")]
    Empty(&'static str),

    /// A long-running operation finished with an error.
    #[error("operation failed: {0}")]
    Operation(String),

    /// Inline data in the response was not valid base64.
    #[error(transparent)]
    Codec(#[from] crate::codec::CodecError),
}

impl From<reqwest::Error> for ServiceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ServiceError::Timeout
        } else if e.is_decode() {
            ServiceError::Parse(e.to_string())
        } else {
            ServiceError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Request / reply types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
    /// Local notices (errors shown to the user).  Never sent to the model.
    System,
}

impl Role {
    /// Role name on the wire; `None` for roles that are not sent.
    pub fn wire_name(self) -> Option<&'static str> {
        match self {
            Role::User => Some("user"),
            Role::Assistant => Some("model"),
            Role::System => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AspectRatio {
    Square,
    Portrait3x4,
    Landscape4x3,
    Portrait9x16,
    #[default]
    Landscape16x9,
    Ultrawide21x9,
    Landscape3x2,
    Portrait2x3,
}

impl AspectRatio {
    pub fn as_str(self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Portrait3x4 => "3:4",
            AspectRatio::Landscape4x3 => "4:3",
            AspectRatio::Portrait9x16 => "9:16",
            AspectRatio::Landscape16x9 => "16:9",
            AspectRatio::Ultrawide21x9 => "21:9",
            AspectRatio::Landscape3x2 => "3:2",
            AspectRatio::Portrait2x3 => "2:3",
        }
    }

    /// Video generation only supports the two 16:9 orientations.
    pub fn is_video_supported(self) -> bool {
        matches!(self, AspectRatio::Landscape16x9 | AspectRatio::Portrait9x16)
    }
}

impl std::str::FromStr for AspectRatio {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "1:1" => AspectRatio::Square,
            "3:4" => AspectRatio::Portrait3x4,
            "4:3" => AspectRatio::Landscape4x3,
            "9:16" => AspectRatio::Portrait9x16,
            "16:9" => AspectRatio::Landscape16x9,
            "21:9" => AspectRatio::Ultrawide21x9,
            "3:2" => AspectRatio::Landscape3x2,
            "2:3" => AspectRatio::Portrait2x3,
            other => return Err(format!("unsupported aspect ratio '{other}'")),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ImageSize {
    #[default]
    OneK,
    TwoK,
    FourK,
}

impl ImageSize {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageSize::OneK => "1K",
            ImageSize::TwoK => "2K",
            ImageSize::FourK => "4K",
        }
    }
}

impl std::str::FromStr for ImageSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "1K" => Ok(ImageSize::OneK),
            "2K" => Ok(ImageSize::TwoK),
            "4K" => Ok(ImageSize::FourK),
            other => Err(format!("unsupported image size '{other}'")),
        }
    }
}

/// Per-request generation switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerationSettings {
    pub aspect_ratio: AspectRatio,
    pub image_size: ImageSize,
    pub thinking_mode: bool,
    pub use_search: bool,
    pub use_maps: bool,
}

/// A grounding citation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub title: String,
    pub uri: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatReply {
    pub text: String,
    /// Thought summary, when the model returned one.
    pub thinking: Option<String>,
    pub sources: Vec<Source>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Reference image for image-to-video generation.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageInput {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

// ---------------------------------------------------------------------------
// ModelService trait
// ---------------------------------------------------------------------------

/// Async request/response surface of the hosted model.
///
/// Implementors must be `Send + Sync` so they can be shared as
/// `Arc<dyn ModelService>`.
#[async_trait]
pub trait ModelService: Send + Sync {
    async fn chat(
        &self,
        history: &[ChatMessage],
        message: &str,
        settings: &GenerationSettings,
    ) -> Result<ChatReply, ServiceError>;

    async fn generate_image(
        &self,
        prompt: &str,
        settings: &GenerationSettings,
    ) -> Result<GeneratedImage, ServiceError>;

    /// Generate a video and return the downloaded file bytes (MP4).
    async fn generate_video(
        &self,
        prompt: &str,
        image: Option<&ImageInput>,
        aspect_ratio: AspectRatio,
    ) -> Result<Vec<u8>, ServiceError>;

    async fn transcribe_audio(&self, audio: &[u8], mime_type: &str)
        -> Result<String, ServiceError>;

    /// Speak `text`; returns raw PCM16 at 24 kHz mono.
    async fn generate_speech(&self, text: &str) -> Result<Vec<u8>, ServiceError>;
}

const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn ModelService>) {}
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_role_is_model_on_the_wire() {
        assert_eq!(Role::Assistant.wire_name(), Some("model"));
        assert_eq!(Role::User.wire_name(), Some("user"));
        assert_eq!(Role::System.wire_name(), None);
    }

    #[test]
    fn aspect_ratio_parses_all_names() {
        for name in ["1:1", "3:4", "4:3", "9:16", "16:9", "21:9", "3:2", "2:3"] {
            let parsed: AspectRatio = name.parse().unwrap();
            assert_eq!(parsed.as_str(), name);
        }
        assert!("5:4".parse::<AspectRatio>().is_err());
    }

    #[test]
    fn only_wide_and_tall_are_video_ratios() {
        assert!(AspectRatio::Landscape16x9.is_video_supported());
        assert!(AspectRatio::Portrait9x16.is_video_supported());
        assert!(!AspectRatio::Square.is_video_supported());
    }

    #[test]
    fn image_size_parse_is_case_insensitive() {
        assert_eq!("2k".parse::<ImageSize>(), Ok(ImageSize::TwoK));
        assert!("8K".parse::<ImageSize>().is_err());
    }
}
