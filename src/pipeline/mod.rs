//! Live pipeline orchestrator.
//!
//! Wires microphone capture, the live session and playback together and
//! exposes the lifecycle state the CLI reports.
//!
//! # Architecture
//!
//! ```text
//! AudioCapture ──AudioChunk──▶ LivePipeline ──OutboundFrame──▶ run_writer ──▶ LiveSession
//!                                   ▲                                            │
//!                                   └────────────── SessionEvent ◀───────────────┘
//!                                   │
//!                                   ▼
//!                          PlaybackScheduler ──▶ AudioSink (cpal output)
//! ```

pub mod runner;
pub mod state;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use runner::{LivePipeline, PipelineCommand, PipelineError};
pub use state::{PipelineState, PipelineStats};
