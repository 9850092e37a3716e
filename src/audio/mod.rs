//! Capture side of the live pipeline: microphone → 16 kHz mono frames.
//!
//! # Pipeline
//!
//! ```text
//! Microphone → cpal callback → AudioChunk (mpsc) → stereo_to_mono
//!           → StreamResampler(→16 kHz) → FrameSlicer → 4096-sample frames
//! ```
//!
//! The frames are handed to [`crate::session::OutboundFrame`] for PCM16 and
//! base64 encoding.

pub mod capture;
pub mod framer;
pub mod resample;

pub use capture::{AudioCapture, AudioChunk, CaptureError, CaptureSource, StreamHandle};
pub use framer::{CapturePath, FrameSlicer};
pub use resample::{resample, stereo_to_mono, ResampleError, StreamResampler};

#[cfg(test)]
pub use capture::MockCapture;
