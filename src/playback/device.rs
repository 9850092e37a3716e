//! `CpalSink`: [`AudioSink`] on a cpal output stream.
//!
//! ```text
//!  PlaybackScheduler ──create/schedule/stop──▶ Arc<Mutex<Mixer>> ◀── cpal output callback
//!                                                 │                   (render + advance clock)
//!                                                 └─ clock = frames rendered / device rate
//! ```
//!
//! Sources are resampled to the device rate when created, before the mixer
//! lock is taken, so the callback only sums and copies.  Mono voices are
//! written to every output channel.
//!
//! A voice scheduled at `at` for `duration` seconds covers device frames
//! `[floor(at · rate), floor((at + duration) · rate))`.  The scheduler places
//! the next voice at exactly `at + duration`, so consecutive voices share a
//! boundary frame and never overlap.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;

use super::sink::{AudioSink, SourceId};
use crate::audio::resample;
use crate::codec::SampleBuffer;

// ---------------------------------------------------------------------------
// PlaybackError
// ---------------------------------------------------------------------------

/// Errors that can occur while opening the output device.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("no output device found on the default audio host")]
    NoDevice,

    #[error("output device not found: {0}")]
    DeviceNotFound(String),

    #[error("failed to enumerate output devices: {0}")]
    Devices(#[from] cpal::DevicesError),

    #[error("failed to query default output config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("unsupported output sample format: {0}")]
    SampleFormat(String),

    #[error("failed to build output stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start output stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),
}

// ---------------------------------------------------------------------------
// Mixer
// ---------------------------------------------------------------------------

/// A source converted to the device rate, ready for [`Mixer::add`].
#[derive(Debug)]
pub struct PreparedVoice {
    samples: Vec<f32>,
    /// Length of the source in seconds at its own rate.
    duration: f64,
}

impl PreparedVoice {
    /// Mix `buffer` down to mono and resample it to `device_rate`.
    pub fn new(buffer: &SampleBuffer, device_rate: u32) -> Self {
        let duration = buffer.duration();
        let mono = buffer.mixdown();
        let samples = match resample(&mono, buffer.sample_rate(), device_rate) {
            Ok(samples) => samples,
            Err(e) => {
                log::error!("playback: resampling failed, source will be silent: {e}");
                vec![0.0; (duration * device_rate as f64).ceil() as usize]
            }
        };
        Self { samples, duration }
    }
}

#[derive(Debug)]
struct Voice {
    samples: Vec<f32>,
    duration: f64,
    /// Device frames `[start, end)`; `None` until scheduled.
    span: Option<(u64, u64)>,
}

/// Device-rate voice mixer with a sample-accurate clock.
#[derive(Debug)]
pub struct Mixer {
    device_rate: u32,
    frames_rendered: u64,
    voices: HashMap<SourceId, Voice>,
    next_id: SourceId,
}

impl Mixer {
    pub fn new(device_rate: u32) -> Self {
        Self {
            device_rate,
            frames_rendered: 0,
            voices: HashMap::new(),
            next_id: 0,
        }
    }

    pub fn add(&mut self, voice: PreparedVoice) -> SourceId {
        let id = self.next_id;
        self.next_id += 1;
        self.voices.insert(
            id,
            Voice {
                samples: voice.samples,
                duration: voice.duration,
                span: None,
            },
        );
        id
    }

    /// Place a voice at `at` seconds.  A start already in the past is moved
    /// to the current frame, keeping the voice's length.
    pub fn schedule(&mut self, id: SourceId, at: f64) {
        let rate = self.device_rate as f64;
        let now = self.frames_rendered;
        let Some(voice) = self.voices.get_mut(&id) else {
            return;
        };

        let at = at.max(0.0);
        let start = (at * rate).floor() as u64;
        let end = ((at + voice.duration) * rate).floor() as u64;
        let len = end.saturating_sub(start).min(voice.samples.len() as u64);

        let start = start.max(now);
        voice.span = Some((start, start + len));
    }

    pub fn remove(&mut self, id: SourceId) {
        self.voices.remove(&id);
    }

    pub fn clear(&mut self) {
        self.voices.clear();
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    pub fn current_time(&self) -> f64 {
        self.frames_rendered as f64 / self.device_rate as f64
    }

    /// Fill `out` (interleaved, `channels` wide) with the sum of all playing
    /// voices and advance the clock.  Finished voices are dropped.
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let frames = out.len() / channels;
        out.fill(0.0);

        let base = self.frames_rendered;
        for voice in self.voices.values() {
            let Some((start, end)) = voice.span else {
                continue;
            };
            let from = start.max(base);
            let to = end.min(base + frames as u64);
            for t in from..to {
                let sample = voice.samples[(t - start) as usize];
                let frame = (t - base) as usize;
                for slot in &mut out[frame * channels..(frame + 1) * channels] {
                    *slot += sample;
                }
            }
        }

        self.frames_rendered += frames as u64;
        let now = self.frames_rendered;
        self.voices.retain(|_, v| match v.span {
            Some((_, end)) => end > now,
            None => true,
        });

        for s in out.iter_mut() {
            *s = s.clamp(-1.0, 1.0);
        }
    }
}

// ---------------------------------------------------------------------------
// CpalSink
// ---------------------------------------------------------------------------

/// Output device sink.  Holds the cpal stream alive for its lifetime.
pub struct CpalSink {
    device_rate: u32,
    mixer: Arc<Mutex<Mixer>>,
    _stream: cpal::Stream,
}

fn lock(mixer: &Mutex<Mixer>) -> MutexGuard<'_, Mixer> {
    mixer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mixer: Arc<Mutex<Mixer>>,
) -> Result<cpal::Stream, PlaybackError>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels = config.channels as usize;
    let mut scratch: Vec<f32> = Vec::new();
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            scratch.resize(data.len(), 0.0);
            lock(&mixer).render(&mut scratch, channels);
            for (dst, src) in data.iter_mut().zip(scratch.iter()) {
                *dst = T::from_sample(*src);
            }
        },
        |err: cpal::StreamError| {
            log::error!("playback: cpal stream error: {err}");
        },
        None,
    )?;
    Ok(stream)
}

impl CpalSink {
    /// Open `device_name` (or the default output) and start the stream.
    pub fn new(device_name: Option<&str>) -> Result<Self, PlaybackError> {
        let host = cpal::default_host();
        let device = match device_name {
            None => host.default_output_device().ok_or(PlaybackError::NoDevice)?,
            Some(name) => host
                .output_devices()?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| PlaybackError::DeviceNotFound(name.to_string()))?,
        };

        let supported = device.default_output_config()?;
        let format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();
        let mixer = Arc::new(Mutex::new(Mixer::new(config.sample_rate.0)));

        let stream = match format {
            cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, Arc::clone(&mixer))?,
            cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, Arc::clone(&mixer))?,
            cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, Arc::clone(&mixer))?,
            other => return Err(PlaybackError::SampleFormat(format!("{other:?}"))),
        };
        stream.play()?;

        log::info!(
            "playback: output stream open ({} Hz, {} ch, {format:?})",
            config.sample_rate.0,
            config.channels
        );

        Ok(Self {
            device_rate: config.sample_rate.0,
            mixer,
            _stream: stream,
        })
    }
}

impl AudioSink for CpalSink {
    fn create_source(&mut self, buffer: SampleBuffer) -> SourceId {
        let voice = PreparedVoice::new(&buffer, self.device_rate);
        lock(&self.mixer).add(voice)
    }

    fn schedule(&mut self, source: SourceId, at: f64) {
        lock(&self.mixer).schedule(source, at);
    }

    fn stop(&mut self, source: SourceId) {
        lock(&self.mixer).remove(source);
    }

    fn stop_all(&mut self) {
        lock(&self.mixer).clear();
    }

    fn current_time(&self) -> f64 {
        lock(&self.mixer).current_time()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn voice(rate: u32, samples: Vec<f32>) -> PreparedVoice {
        PreparedVoice::new(&SampleBuffer::mono(rate, samples), rate)
    }

    #[test]
    fn unscheduled_voice_is_silent() {
        let mut mixer = Mixer::new(8);
        mixer.add(voice(8, vec![0.5; 4]));
        let mut out = [1.0f32; 4];
        mixer.render(&mut out, 1);
        assert_eq!(out, [0.0; 4]);
        assert_eq!(mixer.voice_count(), 1);
    }

    #[test]
    fn voice_starts_at_scheduled_frame_on_all_channels() {
        let mut mixer = Mixer::new(4);
        let id = mixer.add(voice(4, vec![0.25, 0.5]));
        mixer.schedule(id, 0.5); // frame 2

        let mut out = [0.0f32; 8]; // 4 frames, stereo
        mixer.render(&mut out, 2);
        assert_eq!(out, [0.0, 0.0, 0.0, 0.0, 0.25, 0.25, 0.5, 0.5]);
        assert_eq!(mixer.current_time(), 1.0);
        assert_eq!(mixer.voice_count(), 0, "finished voices are dropped");
    }

    #[test]
    fn voice_spans_callbacks() {
        let mut mixer = Mixer::new(4);
        let id = mixer.add(voice(4, vec![0.1, 0.2, 0.3]));
        mixer.schedule(id, 0.0);

        let mut out = [0.0f32; 2];
        mixer.render(&mut out, 1);
        assert_eq!(out, [0.1, 0.2]);
        mixer.render(&mut out, 1);
        assert_eq!(out, [0.3, 0.0]);
    }

    #[test]
    fn past_start_clamps_to_now() {
        let mut mixer = Mixer::new(4);
        let mut out = [0.0f32; 4];
        mixer.render(&mut out, 1);

        let id = mixer.add(voice(4, vec![0.5]));
        mixer.schedule(id, 0.0);
        mixer.render(&mut out, 1);
        assert_eq!(out, [0.5, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn removed_voice_goes_silent() {
        let mut mixer = Mixer::new(4);
        let id = mixer.add(voice(4, vec![0.5; 8]));
        mixer.schedule(id, 0.0);
        mixer.remove(id);
        let mut out = [0.0f32; 4];
        mixer.render(&mut out, 1);
        assert_eq!(out, [0.0; 4]);
    }

    #[test]
    fn sum_is_clamped() {
        let mut mixer = Mixer::new(4);
        for _ in 0..3 {
            let id = mixer.add(voice(4, vec![0.6]));
            mixer.schedule(id, 0.0);
        }
        let mut out = [0.0f32; 1];
        mixer.render(&mut out, 1);
        assert_eq!(out[0], 1.0);
    }

    #[test]
    fn back_to_back_voices_share_a_boundary_at_uneven_rates() {
        let mut mixer = Mixer::new(44_100);
        let buffer = SampleBuffer::mono(24_000, vec![0.25; 1001]);

        let mut at = 0.0;
        let mut ids = Vec::new();
        for _ in 0..3 {
            let id = mixer.add(PreparedVoice::new(&buffer, 44_100));
            mixer.schedule(id, at);
            at += buffer.duration();
            ids.push(id);
        }

        let spans: Vec<(u64, u64)> = ids
            .iter()
            .map(|id| mixer.voices[id].span.unwrap())
            .collect();
        assert_eq!(spans[0].0, 0);
        assert_eq!(spans[0].1, spans[1].0);
        assert_eq!(spans[1].1, spans[2].0);
        for (id, (start, end)) in ids.iter().zip(&spans) {
            assert!(end - start <= mixer.voices[id].samples.len() as u64);
        }

        // No frame is covered by two voices.
        let total = spans[2].1;
        for t in 0..total {
            let covering = spans.iter().filter(|(s, e)| (*s..*e).contains(&t)).count();
            assert_eq!(covering, 1, "frame {t} covered by {covering} voices");
        }
    }

    #[test]
    fn prepared_voice_is_resampled_to_device_rate() {
        let v = PreparedVoice::new(&SampleBuffer::mono(24_000, vec![0.0; 12_000]), 48_000);
        assert_eq!(v.samples.len(), 24_000);
        assert_eq!(v.duration, 0.5);
    }
}
