//! Live session contract: the bidirectional streaming channel to the model.
//!
//! # Architecture
//!
//! ```text
//!                       ┌──────────────────────────────┐
//!  OutboundFrame ──────▶│ SendQueue / run_writer task  │──send──▶ LiveSession
//!  (capture order)      │ buffers until the handle     │
//!                       │ exists, then flushes in order│
//!                       └──────────────────────────────┘
//!
//!  SessionChannel::open ──▶ SessionEvent (mpsc) ──▶ pipeline
//!      Open | Message(ServerEvent) | Close | Error
//! ```
//!
//! The channel owns the transport.  Lifecycle callbacks (`onOpen`,
//! `onMessage`, `onClose`, `onError`) are delivered as [`SessionEvent`]s over
//! an unbounded tokio channel supplied to [`SessionChannel::open`].

pub mod gemini;
#[cfg(test)]
pub mod mock;
pub mod queue;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::codec::{encode_bytes_to_text, encode_pcm16};

pub use gemini::GeminiLiveChannel;
pub use queue::{run_writer, SendQueue};

// ---------------------------------------------------------------------------
// SessionError
// ---------------------------------------------------------------------------

/// Errors raised by a live session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No API key was configured for the vendor endpoint.
    #[error("no API key configured for the live session")]
    MissingApiKey,

    /// The transport could not be established.
    #[error("failed to connect live session: {0}")]
    Connect(String),

    /// The remote side rejected or never acknowledged the setup message.
    #[error("live session setup failed: {0}")]
    Setup(String),

    /// A frame could not be delivered.  Fatal to the session.
    #[error("failed to send on live session: {0}")]
    Send(String),

    /// The session has already been closed.
    #[error("live session is closed")]
    Closed,

    /// A message could not be encoded or decoded.
    #[error("live session protocol error: {0}")]
    Protocol(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Frames and events
// ---------------------------------------------------------------------------

/// One encoded capture frame, ready for the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundFrame {
    /// Position in capture order, starting at 0 for each session.
    pub sequence: u64,
    /// Base64-encoded little-endian PCM16.
    pub data: String,
    /// MIME-style descriptor, e.g. `audio/pcm;rate=16000`.
    pub mime_type: String,
}

impl OutboundFrame {
    /// Clamp, pack and base64-encode mono `samples` captured at `sample_rate`.
    pub fn from_samples(sequence: u64, samples: &[f32], sample_rate: u32) -> Self {
        Self {
            sequence,
            data: encode_bytes_to_text(&encode_pcm16(samples)),
            mime_type: format!("audio/pcm;rate={sample_rate}"),
        }
    }
}

/// A decoded server message, split into the parts the pipeline cares about.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Base64 PCM16 audio (24 kHz mono) to be played.
    Audio { data: String },
    /// Text emitted by the model alongside or instead of audio.
    Text(String),
    /// The user started speaking over the model; stop playback now.
    Interrupted,
    /// The model finished its turn.
    TurnComplete,
}

/// Lifecycle callbacks of a live session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The remote side is ready; capture may begin.
    Open,
    /// A server message.
    Message(ServerEvent),
    /// The session closed.  Terminal.
    Close,
    /// The session failed.  Terminal.
    Error(String),
}

impl SessionEvent {
    /// `true` for events that end the session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionEvent::Close | SessionEvent::Error(_))
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Handle to one open session.
///
/// `send` must preserve call order for a single handle.
#[async_trait]
pub trait LiveSession: Send + Sync {
    async fn send(&self, frame: &OutboundFrame) -> Result<(), SessionError>;

    /// Close the session.  Idempotent.
    async fn close(&self);
}

/// Factory for live sessions.
///
/// `open` resolves once the remote side is ready; by then the channel must
/// have emitted [`SessionEvent::Open`] on `events`.  Every later server
/// message, close and error is reported on `events` too.
#[async_trait]
pub trait SessionChannel: Send + Sync {
    async fn open(
        &self,
        system_instruction: &str,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Arc<dyn LiveSession>, SessionError>;
}

// Compile-time assertion: both traits must be usable as trait objects.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn LiveSession>, _: Box<dyn SessionChannel>) {}
};

#[cfg(test)]
pub use mock::{MockChannel, MockSession};

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
