//! Gapless playback scheduling and barge-in interruption.
//!
//! ```text
//!  inbound base64 ──decode──▶ SampleBuffer (24 kHz mono)
//!                                 │
//!             target = max(next_start, sink.now)
//!                                 │
//!          sink.create_source ─▶ sink.schedule(target) ─▶ active set
//!                                 │
//!                    next_start = target + duration
//!
//!  interrupt(): stop every active source, clear the set, next_start = 0
//! ```
//!
//! The clock and the active set belong to one scheduler and are only
//! mutated through `&mut self`.

use super::sink::{AudioSink, SourceId};
use crate::codec::{decode_pcm16, decode_text_to_bytes, CodecError, SampleBuffer};

/// Sample rate of inbound model audio.
pub const INBOUND_SAMPLE_RATE: u32 = 24_000;

/// One scheduled inbound frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackHandle {
    pub source: SourceId,
    /// Start on the sink clock, in seconds.
    pub start: f64,
    /// Length in seconds.
    pub duration: f64,
}

impl PlaybackHandle {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

pub struct PlaybackScheduler<S: AudioSink> {
    sink: S,
    sample_rate: u32,
    next_start: f64,
    active: Vec<PlaybackHandle>,
}

impl<S: AudioSink> PlaybackScheduler<S> {
    /// Scheduler for mono PCM16 at `sample_rate` played on `sink`.
    pub fn new(sink: S, sample_rate: u32) -> Self {
        Self {
            sink,
            sample_rate,
            next_start: 0.0,
            active: Vec::new(),
        }
    }

    /// Decode a base64 PCM16 mono frame and schedule it.
    ///
    /// A frame that fails to decode is not scheduled and leaves the clock
    /// untouched.
    pub fn schedule_encoded(&mut self, data: &str) -> Result<PlaybackHandle, CodecError> {
        let bytes = decode_text_to_bytes(data)?;
        let buffer = decode_pcm16(&bytes, self.sample_rate, 1)?;
        Ok(self.schedule(buffer))
    }

    /// Schedule `buffer` right after everything already queued, or now if
    /// the queue has drained.
    pub fn schedule(&mut self, buffer: SampleBuffer) -> PlaybackHandle {
        self.prune();

        let now = self.sink.current_time();
        let start = self.next_start.max(now);
        let duration = buffer.duration();

        let source = self.sink.create_source(buffer);
        self.sink.schedule(source, start);

        let handle = PlaybackHandle {
            source,
            start,
            duration,
        };
        self.active.push(handle);
        self.next_start = start + duration;

        log::trace!(
            "playback: scheduled source {source} at {start:.3}s for {duration:.3}s"
        );
        handle
    }

    /// Hard-stop every in-flight source and reset the clock.
    ///
    /// Returns the number of sources stopped.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.active.len();
        for handle in self.active.drain(..) {
            self.sink.stop(handle.source);
        }
        self.next_start = 0.0;
        log::debug!("playback: interrupted, stopped {stopped} source(s)");
        stopped
    }

    /// Interrupt and additionally silence anything the sink still holds.
    pub fn stop_all(&mut self) {
        self.interrupt();
        self.sink.stop_all();
    }

    /// Handles that have not finished yet.
    pub fn active(&mut self) -> &[PlaybackHandle] {
        self.prune();
        &self.active
    }

    /// The next free start time.
    pub fn clock(&self) -> f64 {
        self.next_start
    }

    /// Seconds of queued audio left to play.
    pub fn remaining(&self) -> f64 {
        (self.next_start - self.sink.current_time()).max(0.0)
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    fn prune(&mut self) {
        let now = self.sink.current_time();
        self.active.retain(|h| h.end() > now);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
