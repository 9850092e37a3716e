//! Playback of inbound model audio.
//!
//! - [`scheduler`] decodes inbound frames and queues them back to back on
//!   the sink clock; it also implements barge-in interruption.
//! - [`sink`] is the output-device seam ([`AudioSink`]).
//! - [`device`] implements the sink on a cpal output stream.

pub mod device;
pub mod scheduler;
pub mod sink;

pub use device::{CpalSink, Mixer, PlaybackError, PreparedVoice};
pub use scheduler::{PlaybackHandle, PlaybackScheduler, INBOUND_SAMPLE_RATE};
pub use sink::{AudioSink, SourceId};

#[cfg(test)]
pub use sink::MockSink;
