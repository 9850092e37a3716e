//! `AudioSink`: the output-device seam of the playback scheduler.
//!
//! A sink owns decoded sources and plays them at absolute times on its own
//! monotonic clock (seconds since the sink started).  The scheduler never
//! touches device buffers directly.

use crate::codec::SampleBuffer;

/// Identifier of a source created on a sink.
pub type SourceId = u64;

/// Output device abstraction.
pub trait AudioSink {
    /// Register `buffer` for playback.  It stays silent until scheduled.
    fn create_source(&mut self, buffer: SampleBuffer) -> SourceId;

    /// Start `source` at `at` seconds on the sink clock.  A time already in
    /// the past starts it immediately.
    fn schedule(&mut self, source: SourceId, at: f64);

    /// Stop `source` immediately.  Unknown or finished ids are ignored.
    fn stop(&mut self, source: SourceId);

    /// Stop every source.
    fn stop_all(&mut self);

    /// Current position of the sink clock in seconds.
    fn current_time(&self) -> f64;
}

// ---------------------------------------------------------------------------
// MockSink
// ---------------------------------------------------------------------------

/// Sink with a manually advanced clock that records every call.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockSink {
    pub now: f64,
    pub created: Vec<(SourceId, f64)>,
    pub scheduled: Vec<(SourceId, f64)>,
    pub stopped: Vec<SourceId>,
    pub stop_all_calls: usize,
    next_id: SourceId,
}

#[cfg(test)]
impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(now: f64) -> Self {
        Self {
            now,
            ..Self::default()
        }
    }
}

#[cfg(test)]
impl AudioSink for MockSink {
    fn create_source(&mut self, buffer: SampleBuffer) -> SourceId {
        let id = self.next_id;
        self.next_id += 1;
        self.created.push((id, buffer.duration()));
        id
    }

    fn schedule(&mut self, source: SourceId, at: f64) {
        self.scheduled.push((source, at));
    }

    fn stop(&mut self, source: SourceId) {
        self.stopped.push(source);
    }

    fn stop_all(&mut self) {
        self.stop_all_calls += 1;
    }

    fn current_time(&self) -> f64 {
        self.now
    }
}
