//! Channel mixing and sample-rate conversion.
//!
//! The live session expects **16 kHz mono** on the way up and delivers
//! **24 kHz mono** on the way down, while hardware usually runs at 44.1 or
//! 48 kHz with one or two channels.  This module provides the conversion
//! steps used on both sides:
//!
//! 1. [`stereo_to_mono`]: downmix any number of interleaved channels to mono.
//! 2. [`StreamResampler`]: stateful `rubato` FFT resampler for a continuous
//!    stream delivered in arbitrary-sized buffers (capture).
//! 3. [`resample`]: one-shot conversion of a complete buffer (playback
//!    voices), delay-compensated and trimmed to the exact output length.
//!
//! The stream resampler consumes input in fixed blocks whose size is a
//! whole number of `source_rate / gcd` frames, so every block yields an
//! exact integer number of output frames.  Samples short of a block wait in
//! an accumulator for the next buffer, and the total output tracks
//! `input * target_rate / source_rate` regardless of how the device slices
//! its callbacks.

use rubato::{FftFixedIn, Resampler};
use thiserror::Error;

// ---------------------------------------------------------------------------
// ResampleError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ResampleError {
    #[error("sample rate must be non-zero (source {source_rate} Hz, target {target_rate} Hz)")]
    ZeroRate { source_rate: u32, target_rate: u32 },

    #[error("failed to build resampler: {0}")]
    Setup(#[from] rubato::ResamplerConstructionError),

    #[error("resampling failed: {0}")]
    Process(#[from] rubato::ResampleError),
}

// ---------------------------------------------------------------------------
// stereo_to_mono
// ---------------------------------------------------------------------------

/// Mix interleaved multi-channel audio down to mono by averaging all channels.
///
/// The output length is `samples.len() / channels`.
///
/// * If `channels == 1` the input slice is returned as an owned `Vec`.
/// * If `channels == 0` an empty vector is returned.
///
/// ```rust
/// use studio_live::audio::stereo_to_mono;
///
/// let stereo = vec![0.5_f32, -0.5, 0.2, -0.2]; // L R L R
/// let mono = stereo_to_mono(&stereo, 2);
/// assert_eq!(mono.len(), 2);
/// assert!((mono[0] - 0.0).abs() < 1e-6);
/// ```
pub fn stereo_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = n as usize;
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

// ---------------------------------------------------------------------------
// StreamResampler
// ---------------------------------------------------------------------------

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Input block size for `source_rate → target_rate`: the largest multiple of
/// the rational unit (`source_rate / gcd`) not above 10 ms, and at least one
/// unit.
fn block_frames(source_rate: u32, target_rate: u32) -> usize {
    let unit = (source_rate / gcd(source_rate, target_rate)) as usize;
    let ten_ms = (source_rate / 100) as usize;
    unit * (ten_ms / unit).max(1)
}

/// Continuous mono resampler that keeps filter state and leftover input
/// between calls.
///
/// Equal rates pass samples straight through.
pub struct StreamResampler {
    source_rate: u32,
    target_rate: u32,
    inner: Option<FftFixedIn<f32>>,
    pending: Vec<f32>,
}

impl std::fmt::Debug for StreamResampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResampler")
            .field("source_rate", &self.source_rate)
            .field("target_rate", &self.target_rate)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl StreamResampler {
    pub fn new(source_rate: u32, target_rate: u32) -> Result<Self, ResampleError> {
        if source_rate == 0 || target_rate == 0 {
            return Err(ResampleError::ZeroRate {
                source_rate,
                target_rate,
            });
        }

        let inner = if source_rate == target_rate {
            None
        } else {
            let block = block_frames(source_rate, target_rate);
            log::debug!(
                "resample: {source_rate} Hz → {target_rate} Hz in blocks of {block} frame(s)"
            );
            Some(FftFixedIn::<f32>::new(
                source_rate as usize,
                target_rate as usize,
                block,
                1,
                1,
            )?)
        };

        Ok(Self {
            source_rate,
            target_rate,
            inner,
            pending: Vec::new(),
        })
    }

    pub fn source_rate(&self) -> u32 {
        self.source_rate
    }

    /// Input frames consumed per resampler block (0 for pass-through).
    pub fn block_frames(&self) -> usize {
        self.inner.as_ref().map_or(0, |r| r.input_frames_next())
    }

    /// Output frames of filter delay at the start of the stream.
    pub fn output_delay(&self) -> usize {
        self.inner.as_ref().map_or(0, |r| r.output_delay())
    }

    /// Input samples waiting for a complete block.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Feed `samples` and return every output frame completed by them.
    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>, ResampleError> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(samples.to_vec());
        };

        self.pending.extend_from_slice(samples);
        let block = inner.input_frames_next();

        let mut out = Vec::new();
        let mut consumed = 0;
        while self.pending.len() - consumed >= block {
            let frames = inner.process(&[&self.pending[consumed..consumed + block]], None)?;
            if let Some(mono) = frames.first() {
                out.extend_from_slice(mono);
            }
            consumed += block;
        }
        self.pending.drain(..consumed);
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// resample
// ---------------------------------------------------------------------------

/// Resample a complete mono buffer from `source_rate` to `target_rate` Hz.
///
/// * Equal rates return a copy.
/// * Empty input, or a zero rate on either side, returns an empty vector.
///
/// The output is aligned to the input (filter delay removed) and is exactly
/// `ceil(samples.len() * target_rate / source_rate)` frames long.
///
/// ```rust
/// use studio_live::audio::resample;
///
/// let hi = vec![0.5_f32; 480];          // 10 ms @ 48 kHz
/// let lo = resample(&hi, 48_000, 16_000).unwrap();
/// assert_eq!(lo.len(), 160);            // 10 ms @ 16 kHz
/// ```
pub fn resample(
    samples: &[f32],
    source_rate: u32,
    target_rate: u32,
) -> Result<Vec<f32>, ResampleError> {
    if source_rate == target_rate {
        return Ok(samples.to_vec());
    }
    if samples.is_empty() || source_rate == 0 || target_rate == 0 {
        return Ok(Vec::new());
    }

    let expected =
        (samples.len() as u64 * target_rate as u64).div_ceil(source_rate as u64) as usize;

    let mut stream = StreamResampler::new(source_rate, target_rate)?;
    let delay = stream.output_delay();
    let mut out = stream.process(samples)?;

    // Flush the tail out of the filter with silence.
    let silence = vec![0.0_f32; stream.block_frames()];
    while out.len() < delay + expected {
        out.extend(stream.process(&silence)?);
    }

    out.drain(..delay);
    out.truncate(expected);
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
