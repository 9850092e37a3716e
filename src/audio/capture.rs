//! Microphone capture via `cpal`.
//!
//! [`AudioCapture`] wraps the cpal host/device/stream lifecycle behind the
//! [`CaptureSource`] trait so the live pipeline can be driven by a test
//! double.  Capture is split in two steps:
//!
//! 1. [`CaptureSource::open`] acquires the device and starts the hardware
//!    stream with its delivery gate closed.  Permission or device failures
//!    surface here, before any session is opened.
//! 2. [`CaptureSource::resume`] opens the gate; from then on every hardware
//!    buffer is forwarded as an [`AudioChunk`].
//!
//! [`CaptureSource::close`] drops the stream and its callback together.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use thiserror::Error;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// AudioChunk
// ---------------------------------------------------------------------------

/// A single buffer of raw audio as delivered by the cpal callback.
///
/// Samples are interleaved `f32` in the range `[-1.0, 1.0]` at the device's
/// native rate.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Interleaved PCM samples in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
    /// Sample rate of this chunk in Hz (e.g. 44100, 48000, 16000).
    pub sample_rate: u32,
    /// Number of interleaved channels (1 = mono, 2 = stereo, …).
    pub channels: u16,
}

// ---------------------------------------------------------------------------
// StreamHandle
// ---------------------------------------------------------------------------

/// RAII guard that keeps the cpal stream alive.
///
/// Dropping this value stops the underlying hardware stream.
pub struct StreamHandle {
    _stream: cpal::Stream,
}

// ---------------------------------------------------------------------------
// CaptureError
// ---------------------------------------------------------------------------

/// Errors that can occur while setting up or running the audio capture.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no input device found on the default audio host")]
    NoDevice,

    #[error("input device not found: {0}")]
    DeviceNotFound(String),

    #[error("failed to enumerate input devices: {0}")]
    Devices(#[from] cpal::DevicesError),

    #[error("failed to query default input config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("unsupported input sample format: {0}")]
    SampleFormat(String),

    #[error("failed to build input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("capture has not been opened")]
    NotOpen,
}

// ---------------------------------------------------------------------------
// CaptureSource
// ---------------------------------------------------------------------------

/// A microphone-like producer of [`AudioChunk`]s.
///
/// Not `Send`: cpal streams must stay on the thread that built them, so the
/// pipeline that owns a capture source is driven without `tokio::spawn`.
pub trait CaptureSource {
    /// Acquire the device and prepare delivery to `tx` (gate closed).
    fn open(&mut self, tx: mpsc::UnboundedSender<AudioChunk>) -> Result<(), CaptureError>;

    /// Start forwarding chunks.  Fails with [`CaptureError::NotOpen`] when
    /// called before [`open`](Self::open).
    fn resume(&mut self) -> Result<(), CaptureError>;

    /// Release the stream.  Safe to call repeatedly.
    fn close(&mut self);

    /// `true` between a successful `open` and `close`.
    fn is_open(&self) -> bool;
}

// ---------------------------------------------------------------------------
// AudioCapture
// ---------------------------------------------------------------------------

/// Microphone capture device wrapper built on top of `cpal`.
pub struct AudioCapture {
    device: cpal::Device,
    config: cpal::StreamConfig,
    format: cpal::SampleFormat,
    /// Native sample rate reported by the device (Hz).
    sample_rate: u32,
    /// Number of interleaved channels reported by the device.
    channels: u16,
    stream: Option<StreamHandle>,
    gate: Arc<AtomicBool>,
}

impl AudioCapture {
    /// Select an input device.
    ///
    /// `device_name = None` picks the system default; otherwise the first
    /// input device whose name matches exactly.  The device's preferred
    /// stream configuration is used as-is; conversion to 16 kHz mono
    /// happens downstream.
    pub fn new(device_name: Option<&str>) -> Result<Self, CaptureError> {
        let host = cpal::default_host();
        let device = match device_name {
            None => host.default_input_device().ok_or(CaptureError::NoDevice)?,
            Some(name) => host
                .input_devices()?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| CaptureError::DeviceNotFound(name.to_string()))?,
        };

        let supported = device.default_input_config()?;

        let channels = supported.channels();
        let sample_rate = supported.sample_rate().0;
        let format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();

        Ok(Self {
            device,
            config,
            format,
            sample_rate,
            channels,
            stream: None,
            gate: Arc::new(AtomicBool::new(false)),
        })
    }
}

/// Convert one hardware buffer to normalized `f32`.
fn to_f32_samples<T>(data: &[T]) -> Vec<f32>
where
    T: Sample,
    f32: FromSample<T>,
{
    data.iter().map(|&s| s.to_sample::<f32>()).collect()
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    gate: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<AudioChunk>,
) -> Result<cpal::Stream, CaptureError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let sample_rate = config.sample_rate.0;
    let channels = config.channels;
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            if !gate.load(Ordering::Relaxed) {
                return;
            }
            let chunk = AudioChunk {
                samples: to_f32_samples(data),
                sample_rate,
                channels,
            };
            // Receiver gone means the pipeline is tearing down.
            let _ = tx.send(chunk);
        },
        |err: cpal::StreamError| {
            log::error!("capture: cpal stream error: {err}");
        },
        None,
    )?;
    Ok(stream)
}

impl CaptureSource for AudioCapture {
    fn open(&mut self, tx: mpsc::UnboundedSender<AudioChunk>) -> Result<(), CaptureError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let gate = Arc::clone(&self.gate);
        gate.store(false, Ordering::SeqCst);

        let stream = match self.format {
            cpal::SampleFormat::F32 => build_stream::<f32>(&self.device, &self.config, gate, tx)?,
            cpal::SampleFormat::I16 => build_stream::<i16>(&self.device, &self.config, gate, tx)?,
            cpal::SampleFormat::U16 => build_stream::<u16>(&self.device, &self.config, gate, tx)?,
            other => return Err(CaptureError::SampleFormat(format!("{other:?}"))),
        };

        stream.play()?;
        log::info!(
            "capture: input stream open ({} Hz, {} ch, {:?})",
            self.sample_rate,
            self.channels,
            self.format
        );
        self.stream = Some(StreamHandle { _stream: stream });
        Ok(())
    }

    fn resume(&mut self) -> Result<(), CaptureError> {
        if self.stream.is_none() {
            return Err(CaptureError::NotOpen);
        }
        self.gate.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) {
        self.gate.store(false, Ordering::SeqCst);
        if self.stream.take().is_some() {
            log::info!("capture: input stream released");
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.close();
    }
}

// ---------------------------------------------------------------------------
// MockCapture  (test-only)
// ---------------------------------------------------------------------------

/// Scripted capture source: `resume` delivers a fixed list of chunks.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockCapture {
    fail_open: bool,
    on_resume: Vec<AudioChunk>,
    tx: Option<mpsc::UnboundedSender<AudioChunk>>,
    pub resumed: bool,
    pub close_calls: usize,
}

#[cfg(test)]
impl MockCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// A source whose `open` fails as if the device were missing.
    pub fn unavailable() -> Self {
        Self {
            fail_open: true,
            ..Self::default()
        }
    }

    /// Chunks delivered when the pipeline resumes capture.
    pub fn with_chunks(mut self, chunks: Vec<AudioChunk>) -> Self {
        self.on_resume = chunks;
        self
    }
}

#[cfg(test)]
impl CaptureSource for MockCapture {
    fn open(&mut self, tx: mpsc::UnboundedSender<AudioChunk>) -> Result<(), CaptureError> {
        if self.fail_open {
            return Err(CaptureError::NoDevice);
        }
        self.tx = Some(tx);
        Ok(())
    }

    fn resume(&mut self) -> Result<(), CaptureError> {
        let tx = self.tx.as_ref().ok_or(CaptureError::NotOpen)?;
        self.resumed = true;
        for chunk in self.on_resume.drain(..) {
            let _ = tx.send(chunk);
        }
        Ok(())
    }

    fn close(&mut self) {
        self.close_calls += 1;
        self.tx = None;
    }

    fn is_open(&self) -> bool {
        self.tx.is_some()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// `AudioChunk` must be `Send` so it can cross from the cpal thread.
    #[test]
    fn audio_chunk_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<AudioChunk>();
    }

    #[test]
    fn capture_error_messages() {
        assert_eq!(
            CaptureError::DeviceNotFound("USB Mic".into()).to_string(),
            "input device not found: USB Mic"
        );
        assert_eq!(CaptureError::NotOpen.to_string(), "capture has not been opened");
    }

    #[test]
    fn integer_buffers_are_normalized() {
        let from_i16 = to_f32_samples(&[i16::MIN, 0, 16_384]);
        assert_eq!(from_i16[0], -1.0);
        assert_eq!(from_i16[1], 0.0);
        assert!((from_i16[2] - 0.5).abs() < 1e-4);

        let from_u16 = to_f32_samples(&[0u16, 32_768, u16::MAX]);
        assert_eq!(from_u16[0], -1.0);
        assert_eq!(from_u16[1], 0.0);
        assert!((from_u16[2] - 1.0).abs() < 1e-4);
    }

    #[test]
    fn float_buffers_pass_through() {
        assert_eq!(to_f32_samples(&[0.25_f32, -0.5]), vec![0.25, -0.5]);
    }
}
