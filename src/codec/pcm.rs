//! PCM16 ⇄ normalized `f32` conversion.
//!
//! Samples travel on the wire as little-endian signed 16-bit integers.
//! Decoding divides by 32 768 so full scale maps to `[-1.0, 1.0)`.
//! Encoding multiplies by 32 768 and clamps to the `i16` range so that
//! full-scale input (`1.0` or louder) never wraps around.

use super::CodecError;

/// Full-scale divisor shared by both directions.
const PCM16_SCALE: f32 = 32_768.0;

// ---------------------------------------------------------------------------
// SampleBuffer
// ---------------------------------------------------------------------------

/// De-interleaved, normalized audio ready for playback.
///
/// Holds one `Vec<f32>` per channel; every channel has the same length.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl SampleBuffer {
    /// Wrap already de-interleaved channel data.
    ///
    /// # Panics
    ///
    /// Panics if `channels` is empty or the channels differ in length.
    pub fn new(sample_rate: u32, channels: Vec<Vec<f32>>) -> Self {
        assert!(!channels.is_empty(), "SampleBuffer needs at least one channel");
        let frames = channels[0].len();
        assert!(
            channels.iter().all(|c| c.len() == frames),
            "SampleBuffer channels must have equal length"
        );
        Self {
            sample_rate,
            channels,
        }
    }

    /// Single-channel buffer.
    pub fn mono(sample_rate: u32, samples: Vec<f32>) -> Self {
        Self::new(sample_rate, vec![samples])
    }

    /// `frames` samples of digital silence, mono.
    pub fn silence(sample_rate: u32, frames: usize) -> Self {
        Self::mono(sample_rate, vec![0.0; frames])
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Samples of channel `index`.
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    /// Number of sample frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.channels[0].len()
    }

    /// Playback length in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Average all channels into a single mono track.
    pub fn mixdown(&self) -> Vec<f32> {
        if self.channels.len() == 1 {
            return self.channels[0].clone();
        }
        let n = self.channels.len() as f32;
        (0..self.frames())
            .map(|i| self.channels.iter().map(|c| c[i]).sum::<f32>() / n)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// decode_pcm16
// ---------------------------------------------------------------------------

/// Reinterpret `bytes` as interleaved little-endian PCM16 and split it into
/// normalized per-channel sample arrays.
///
/// # Errors
///
/// [`CodecError::MalformedAudio`] when `channels == 0` or when the byte
/// length is not a multiple of `2 * channels`.
///
/// ```rust
/// use studio_live::codec::decode_pcm16;
///
/// // Two samples: 16384 (0x4000) and -32768 (0x8000).
/// let buf = decode_pcm16(&[0x00, 0x40, 0x00, 0x80], 24_000, 1).unwrap();
/// assert_eq!(buf.channel(0), &[0.5, -1.0]);
/// ```
pub fn decode_pcm16(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<SampleBuffer, CodecError> {
    if channels == 0 {
        return Err(CodecError::MalformedAudio(
            "channel count must be at least 1".into(),
        ));
    }

    let channels = channels as usize;
    let frame_bytes = 2 * channels;
    if bytes.len() % frame_bytes != 0 {
        return Err(CodecError::MalformedAudio(format!(
            "{} bytes is not a multiple of {frame_bytes} ({channels} ch × 2 bytes)",
            bytes.len()
        )));
    }

    let frames = bytes.len() / frame_bytes;
    let mut out: Vec<Vec<f32>> = (0..channels).map(|_| Vec::with_capacity(frames)).collect();

    for (i, pair) in bytes.chunks_exact(2).enumerate() {
        let sample = i16::from_le_bytes([pair[0], pair[1]]);
        out[i % channels].push(sample as f32 / PCM16_SCALE);
    }

    Ok(SampleBuffer::new(sample_rate, out))
}

// ---------------------------------------------------------------------------
// encode_pcm16
// ---------------------------------------------------------------------------

/// Pack normalized samples as little-endian PCM16, clamping to the `i16`
/// range.
///
/// ```rust
/// use studio_live::codec::encode_pcm16;
///
/// let bytes = encode_pcm16(&[1.0, -1.0]);
/// assert_eq!(bytes, vec![0xFF, 0x7F, 0x00, 0x80]);
/// ```
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let scaled = (s * PCM16_SCALE).clamp(i16::MIN as f32, i16::MAX as f32);
        out.extend_from_slice(&(scaled as i16).to_le_bytes());
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn pack(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    // ---- decode_pcm16 ------------------------------------------------------

    #[test]
    fn decode_known_samples() {
        let samples: Vec<i16> = vec![0, 1, -1, 16_384, -16_384, i16::MAX, i16::MIN, 1234];
        let buf = decode_pcm16(&pack(&samples), 24_000, 1).unwrap();

        assert_eq!(buf.frames(), samples.len());
        for (got, &raw) in buf.channel(0).iter().zip(&samples) {
            let expected = raw as f32 / 32_768.0;
            assert!((got - expected).abs() < 1e-7, "{got} vs {expected}");
        }
    }

    #[test]
    fn decode_deinterleaves_stereo() {
        // L R L R
        let buf = decode_pcm16(&pack(&[16_384, -16_384, 8_192, -8_192]), 48_000, 2).unwrap();
        assert_eq!(buf.channel_count(), 2);
        assert_eq!(buf.channel(0), &[0.5, 0.25]);
        assert_eq!(buf.channel(1), &[-0.5, -0.25]);
    }

    #[test]
    fn decode_empty_is_zero_length() {
        let buf = decode_pcm16(&[], 24_000, 1).unwrap();
        assert_eq!(buf.frames(), 0);
        assert_eq!(buf.duration(), 0.0);
    }

    #[test]
    fn decode_rejects_odd_length() {
        assert!(matches!(
            decode_pcm16(&[0, 0, 0], 24_000, 1),
            Err(CodecError::MalformedAudio(_))
        ));
    }

    #[test]
    fn decode_rejects_partial_stereo_frame() {
        // 6 bytes = 3 samples, not a whole number of stereo frames.
        assert!(matches!(
            decode_pcm16(&[0; 6], 24_000, 2),
            Err(CodecError::MalformedAudio(_))
        ));
    }

    #[test]
    fn decode_rejects_zero_channels() {
        assert!(matches!(
            decode_pcm16(&[0; 4], 24_000, 0),
            Err(CodecError::MalformedAudio(_))
        ));
    }

    #[test]
    fn duration_of_half_second() {
        let buf = decode_pcm16(&vec![0u8; 24_000], 24_000, 1).unwrap();
        assert_eq!(buf.frames(), 12_000);
        assert!((buf.duration() - 0.5).abs() < 1e-9);
    }

    // ---- encode_pcm16 ------------------------------------------------------

    #[test]
    fn encode_clamps_full_scale() {
        let bytes = encode_pcm16(&[1.0, -1.0, 2.0, -3.5]);
        let ints: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(ints, vec![32_767, -32_768, 32_767, -32_768]);
    }

    #[test]
    fn encode_then_decode_is_close() {
        let input = vec![0.0_f32, 0.25, -0.25, 0.5, -0.999];
        let buf = decode_pcm16(&encode_pcm16(&input), 16_000, 1).unwrap();
        for (a, b) in input.iter().zip(buf.channel(0)) {
            assert!((a - b).abs() < 1.0 / 32_768.0 + 1e-7);
        }
    }

    // ---- SampleBuffer ------------------------------------------------------

    #[test]
    fn mixdown_averages_channels() {
        let buf = SampleBuffer::new(24_000, vec![vec![1.0, 0.5], vec![-1.0, 0.5]]);
        assert_eq!(buf.mixdown(), vec![0.0, 0.5]);
    }

    #[test]
    #[should_panic(expected = "SampleBuffer channels must have equal length")]
    fn unequal_channels_panic() {
        let _ = SampleBuffer::new(24_000, vec![vec![0.0; 2], vec![0.0; 3]]);
    }
}
