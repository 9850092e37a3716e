//! Pipeline state machine and session counters.
//!
//! [`PipelineState`] is the lifecycle of one live conversation.
//! [`PipelineStats`] counts what happened during it; the CLI prints them on
//! shutdown.

// ---------------------------------------------------------------------------
// PipelineState
// ---------------------------------------------------------------------------

/// States of the live pipeline.
///
/// ```text
/// Idle ──start──▶ Connecting ──session open──▶ Active
///                      │                         │
///                      └──stop / session close───┴──▶ Idle
/// any state ──session error──▶ Error ──start──▶ Connecting
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PipelineState {
    /// No session; capture and playback released.
    #[default]
    Idle,

    /// Capture device acquired; waiting for the session to open.
    Connecting,

    /// Session open; microphone frames are streaming.
    Active,

    /// The last session failed.  A new `start` is allowed.
    Error,
}

impl PipelineState {
    /// `true` while a session is being opened or is open.
    ///
    /// ```
    /// use studio_live::pipeline::PipelineState;
    ///
    /// assert!(!PipelineState::Idle.is_busy());
    /// assert!(PipelineState::Connecting.is_busy());
    /// assert!(PipelineState::Active.is_busy());
    /// assert!(!PipelineState::Error.is_busy());
    /// ```
    pub fn is_busy(&self) -> bool {
        matches!(self, PipelineState::Connecting | PipelineState::Active)
    }

    /// A short label for status output.
    pub fn label(&self) -> &'static str {
        match self {
            PipelineState::Idle => "Idle",
            PipelineState::Connecting => "Connecting",
            PipelineState::Active => "Live",
            PipelineState::Error => "Error",
        }
    }
}

// ---------------------------------------------------------------------------
// PipelineStats
// ---------------------------------------------------------------------------

/// Counters for one session.  Reset by every `start`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Capture frames produced and handed to the session writer.
    pub frames_captured: u64,
    /// Frames the session accepted.
    pub frames_sent: u64,
    /// Inbound audio frames received.
    pub frames_received: u64,
    /// Inbound frames dropped because they failed to decode.
    pub frames_dropped: u64,
    /// Barge-in interruptions handled.
    pub interruptions: u64,
}

impl std::fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} sent / {} captured, {} received, {} dropped, {} interruption(s)",
            self.frames_sent,
            self.frames_captured,
            self.frames_received,
            self.frames_dropped,
            self.interruptions
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pipeline_state_is_idle() {
        assert_eq!(PipelineState::default(), PipelineState::Idle);
    }

    #[test]
    fn labels() {
        assert_eq!(PipelineState::Idle.label(), "Idle");
        assert_eq!(PipelineState::Connecting.label(), "Connecting");
        assert_eq!(PipelineState::Active.label(), "Live");
        assert_eq!(PipelineState::Error.label(), "Error");
    }

    #[test]
    fn stats_display() {
        let stats = PipelineStats {
            frames_captured: 5,
            frames_sent: 4,
            frames_received: 3,
            frames_dropped: 1,
            interruptions: 2,
        };
        assert_eq!(
            stats.to_string(),
            "4 sent / 5 captured, 3 received, 1 dropped, 2 interruption(s)"
        );
    }
}
