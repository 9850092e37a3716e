//! Fixed-size framing of the capture stream.
//!
//! Hardware callbacks deliver buffers of whatever size the driver picks.
//! The live session wants fixed 16 kHz mono frames (4096 samples by
//! default), so [`CapturePath`] downmixes, resamples and re-slices:
//!
//! ```text
//! AudioChunk (device rate, N ch) → stereo_to_mono → StreamResampler(→16 kHz)
//!          → FrameSlicer → [f32; frame_size] frames in capture order
//! ```
//!
//! The resampler lives as long as the capture session, so buffer boundaries
//! never add or drop samples.

use super::capture::AudioChunk;
use super::resample::{stereo_to_mono, ResampleError, StreamResampler};

// ---------------------------------------------------------------------------
// FrameSlicer
// ---------------------------------------------------------------------------

/// Accumulates samples and yields complete frames of `frame_size`.
///
/// Leftover samples are kept for the next push; nothing is dropped or
/// reordered.
#[derive(Debug)]
pub struct FrameSlicer {
    frame_size: usize,
    pending: Vec<f32>,
}

impl FrameSlicer {
    /// # Panics
    ///
    /// Panics if `frame_size == 0`.
    pub fn new(frame_size: usize) -> Self {
        assert!(frame_size > 0, "FrameSlicer frame size must be > 0");
        Self {
            frame_size,
            pending: Vec::with_capacity(frame_size * 2),
        }
    }

    /// Append `samples` and return every frame completed by them.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.pending.extend_from_slice(samples);

        let complete = self.pending.len() / self.frame_size;
        if complete == 0 {
            return Vec::new();
        }

        let split = complete * self.frame_size;
        let frames = self.pending[..split]
            .chunks_exact(self.frame_size)
            .map(<[f32]>::to_vec)
            .collect();
        self.pending.drain(..split);
        frames
    }

    /// Samples waiting for the next frame boundary.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Drop any partial frame.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

// ---------------------------------------------------------------------------
// CapturePath
// ---------------------------------------------------------------------------

/// Turns raw device chunks into fixed-size mono frames at `target_rate`.
#[derive(Debug)]
pub struct CapturePath {
    target_rate: u32,
    resampler: Option<StreamResampler>,
    slicer: FrameSlicer,
}

impl CapturePath {
    pub fn new(target_rate: u32, frame_size: usize) -> Self {
        Self {
            target_rate,
            resampler: None,
            slicer: FrameSlicer::new(frame_size),
        }
    }

    /// Convert one chunk and return the frames it completes.
    ///
    /// The resampler is built on the first chunk (and rebuilt if the device
    /// rate ever changes).
    pub fn process(&mut self, chunk: &AudioChunk) -> Result<Vec<Vec<f32>>, ResampleError> {
        let stale = self
            .resampler
            .as_ref()
            .map_or(true, |r| r.source_rate() != chunk.sample_rate);
        if stale {
            self.resampler = Some(StreamResampler::new(chunk.sample_rate, self.target_rate)?);
        }
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(Vec::new());
        };

        let mono = stereo_to_mono(&chunk.samples, chunk.channels);
        let resampled = resampler.process(&mono)?;
        Ok(self.slicer.push(&resampled))
    }

    /// Rate of the frames this path produces.
    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }

    /// Forget any partial frame and the resampler state (used between
    /// sessions).
    pub fn reset(&mut self) {
        self.resampler = None;
        self.slicer.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
