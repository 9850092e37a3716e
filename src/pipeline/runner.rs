//! Live pipeline orchestrator: microphone ⇄ session ⇄ speakers.
//!
//! [`LivePipeline`] owns the capture source, the playback scheduler and the
//! session factory.  It runs as one cooperative loop over three inputs:
//!
//! ```text
//!  SessionEvent (mpsc) ─┐
//!  AudioChunk  (mpsc) ──┼─▶ LivePipeline::step()
//!  PipelineCommand ─────┘
//!
//!  Open               → resume capture                          [Active]
//!  Message(Audio)     → PlaybackScheduler::schedule_encoded
//!  Message(Interrupt) → PlaybackScheduler::interrupt
//!  Close / Stop       → teardown                                [Idle]
//!  Error              → teardown                                [Error]
//!  AudioChunk         → CapturePath → OutboundFrame → writer task
//! ```
//!
//! The session writer ([`run_writer`]) is the only task spawned; it holds the
//! session handle.  The capture stream is not `Send`, so the pipeline itself
//! is awaited on the calling task.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::audio::{AudioChunk, CaptureError, CapturePath, CaptureSource};
use crate::config::AppConfig;
use crate::playback::{AudioSink, PlaybackScheduler};
use crate::session::{run_writer, OutboundFrame, ServerEvent, SessionChannel, SessionEvent};

use super::state::{PipelineState, PipelineStats};

/// How long teardown waits for the writer to close the session.
const WRITER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// PipelineError / PipelineCommand
// ---------------------------------------------------------------------------

/// Errors returned by [`LivePipeline`] operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("a live session is already running")]
    AlreadyRunning,

    /// The microphone could not be acquired.  The pipeline stays idle.
    #[error("microphone unavailable: {0}")]
    Capture(#[from] CaptureError),
}

/// Requests from the owner of the pipeline (CLI, Ctrl-C handler).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineCommand {
    Stop,
}

// ---------------------------------------------------------------------------
// LivePipeline
// ---------------------------------------------------------------------------

/// Channels and task of the session in progress.
struct ActiveSession {
    events: mpsc::UnboundedReceiver<SessionEvent>,
    chunks: mpsc::UnboundedReceiver<AudioChunk>,
    chunks_open: bool,
    frames: mpsc::UnboundedSender<OutboundFrame>,
    writer: JoinHandle<usize>,
    next_sequence: u64,
}

/// One input picked by the select loop.
enum Input {
    Session(Option<SessionEvent>),
    Chunk(Option<AudioChunk>),
    Command(Option<PipelineCommand>),
}

/// Drives one live conversation at a time.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use studio_live::audio::AudioCapture;
/// use studio_live::config::AppConfig;
/// use studio_live::pipeline::LivePipeline;
/// use studio_live::playback::CpalSink;
/// use studio_live::session::GeminiLiveChannel;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = AppConfig::load()?;
/// let capture = AudioCapture::new(config.audio.input_device.as_deref())?;
/// let sink = CpalSink::new(config.audio.output_device.as_deref())?;
/// let channel = Arc::new(GeminiLiveChannel::from_config(&config.service, &config.live));
///
/// let mut pipeline = LivePipeline::new(&config, capture, sink, channel);
/// let (_stop_tx, mut stop_rx) = tokio::sync::mpsc::unbounded_channel();
/// pipeline.start()?;
/// let stats = pipeline.run(&mut stop_rx).await;
/// println!("{stats}");
/// # Ok(())
/// # }
/// ```
pub struct LivePipeline<C: CaptureSource, S: AudioSink> {
    capture: C,
    capture_path: CapturePath,
    scheduler: PlaybackScheduler<S>,
    channel: Arc<dyn SessionChannel>,
    system_instruction: String,
    state: PipelineState,
    stats: PipelineStats,
    last_error: Option<String>,
    session: Option<ActiveSession>,
}

impl<C: CaptureSource, S: AudioSink> LivePipeline<C, S> {
    pub fn new(config: &AppConfig, capture: C, sink: S, channel: Arc<dyn SessionChannel>) -> Self {
        Self {
            capture,
            capture_path: CapturePath::new(
                config.audio.capture_sample_rate,
                config.audio.frame_size,
            ),
            scheduler: PlaybackScheduler::new(sink, config.audio.playback_sample_rate),
            channel,
            system_instruction: config.live.system_instruction.clone(),
            state: PipelineState::Idle,
            stats: PipelineStats::default(),
            last_error: None,
            session: None,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Message of the last session error, if the last session failed.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn scheduler(&self) -> &PlaybackScheduler<S> {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut PlaybackScheduler<S> {
        &mut self.scheduler
    }

    pub fn capture(&self) -> &C {
        &self.capture
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Acquire the microphone, then begin opening a session.
    ///
    /// The device is acquired first so a missing or denied microphone is
    /// reported before any network traffic; in that case the pipeline stays
    /// [`PipelineState::Idle`].  Must be called from within a tokio runtime.
    pub fn start(&mut self) -> Result<(), PipelineError> {
        if self.state.is_busy() {
            return Err(PipelineError::AlreadyRunning);
        }

        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        if let Err(e) = self.capture.open(chunk_tx) {
            log::error!("pipeline: capture unavailable: {e}");
            self.state = PipelineState::Idle;
            return Err(e.into());
        }

        self.stats = PipelineStats::default();
        self.last_error = None;
        self.capture_path.reset();

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(run_writer(
            Arc::clone(&self.channel),
            self.system_instruction.clone(),
            event_tx,
            frame_rx,
        ));

        self.session = Some(ActiveSession {
            events: event_rx,
            chunks: chunk_rx,
            chunks_open: true,
            frames: frame_tx,
            writer,
            next_sequence: 0,
        });
        self.state = PipelineState::Connecting;
        log::info!("pipeline: Idle → Connecting");
        Ok(())
    }

    /// Run until the session ends or a [`PipelineCommand::Stop`] arrives (a
    /// closed command channel counts as stop).  Returns the session counters.
    pub async fn run(
        &mut self,
        commands: &mut mpsc::UnboundedReceiver<PipelineCommand>,
    ) -> PipelineStats {
        while self.step(commands).await {}
        self.stats
    }

    /// Process one input.  Returns `false` once the session is over.
    async fn step(&mut self, commands: &mut mpsc::UnboundedReceiver<PipelineCommand>) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };

        let input = tokio::select! {
            biased;
            event = session.events.recv() => Input::Session(event),
            chunk = session.chunks.recv(), if session.chunks_open => Input::Chunk(chunk),
            command = commands.recv() => Input::Command(command),
        };

        match input {
            Input::Session(Some(event)) => self.handle_event(event).await,
            // Every event sender is gone: writer and reader both ended.
            Input::Session(None) => {
                self.teardown(PipelineState::Idle).await;
                false
            }
            Input::Chunk(Some(chunk)) => {
                self.handle_chunk(&chunk);
                true
            }
            Input::Chunk(None) => {
                if let Some(session) = self.session.as_mut() {
                    session.chunks_open = false;
                }
                true
            }
            Input::Command(Some(PipelineCommand::Stop)) | Input::Command(None) => {
                log::info!("pipeline: stop requested");
                self.teardown(PipelineState::Idle).await;
                false
            }
        }
    }

    // -----------------------------------------------------------------------
    // Event handlers
    // -----------------------------------------------------------------------

    async fn handle_event(&mut self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::Open => {
                if let Err(e) = self.capture.resume() {
                    log::error!("pipeline: could not resume capture: {e}");
                    self.last_error = Some(e.to_string());
                    self.teardown(PipelineState::Error).await;
                    return false;
                }
                self.state = PipelineState::Active;
                log::info!("pipeline: Connecting → Active");
                true
            }
            SessionEvent::Message(message) => {
                self.handle_message(message);
                true
            }
            SessionEvent::Close => {
                log::info!("pipeline: session closed");
                self.teardown(PipelineState::Idle).await;
                false
            }
            SessionEvent::Error(message) => {
                log::error!("pipeline: session error: {message}");
                self.last_error = Some(message);
                self.teardown(PipelineState::Error).await;
                false
            }
        }
    }

    fn handle_message(&mut self, message: ServerEvent) {
        match message {
            ServerEvent::Audio { data } => {
                self.stats.frames_received += 1;
                if let Err(e) = self.scheduler.schedule_encoded(&data) {
                    self.stats.frames_dropped += 1;
                    log::warn!("pipeline: dropping inbound audio frame: {e}");
                }
            }
            ServerEvent::Text(text) => log::info!("model: {text}"),
            ServerEvent::Interrupted => {
                self.stats.interruptions += 1;
                self.scheduler.interrupt();
            }
            ServerEvent::TurnComplete => log::debug!("pipeline: turn complete"),
        }
    }

    fn handle_chunk(&mut self, chunk: &AudioChunk) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let frames = match self.capture_path.process(chunk) {
            Ok(frames) => frames,
            Err(e) => {
                log::error!("pipeline: dropping capture chunk: {e}");
                return;
            }
        };
        let rate = self.capture_path.target_rate();
        for samples in frames {
            let frame = OutboundFrame::from_samples(session.next_sequence, &samples, rate);
            session.next_sequence += 1;
            if session.frames.send(frame).is_err() {
                // Writer already ended; its error event is on the way.
                log::debug!("pipeline: writer gone, discarding capture frame");
                return;
            }
            self.stats.frames_captured += 1;
        }
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Release capture, silence playback, close the session and settle in
    /// `final_state`.
    async fn teardown(&mut self, final_state: PipelineState) {
        self.capture.close();
        self.scheduler.stop_all();
        self.capture_path.reset();

        if let Some(session) = self.session.take() {
            let ActiveSession {
                frames, mut writer, ..
            } = session;
            drop(frames);

            match tokio::time::timeout(WRITER_SHUTDOWN_TIMEOUT, &mut writer).await {
                Ok(Ok(sent)) => self.stats.frames_sent = sent as u64,
                Ok(Err(e)) => log::error!("pipeline: session writer failed: {e}"),
                Err(_) => {
                    log::warn!("pipeline: session writer did not finish, aborting it");
                    writer.abort();
                }
            }
        }

        log::info!("pipeline: {} → {}", self.state.label(), final_state.label());
        self.state = final_state;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
