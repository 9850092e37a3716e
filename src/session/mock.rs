//! In-memory session channel for tests.
//!
//! [`MockChannel`] emits [`SessionEvent::Open`] followed by a scripted list
//! of events when opened, records every frame sent, and can be told to hold
//! the open until released, to fail the open, or to fail the N-th send.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use super::{LiveSession, OutboundFrame, SessionChannel, SessionError, SessionEvent};

pub type SentFrames = Arc<Mutex<Vec<OutboundFrame>>>;

pub struct MockChannel {
    script: Mutex<Vec<SessionEvent>>,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
    fail_open: bool,
    fail_send_after: Option<usize>,
    sent: SentFrames,
    closed: Arc<AtomicBool>,
    instructions: Arc<Mutex<Vec<String>>>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Vec::new()),
            gate: Mutex::new(None),
            fail_open: false,
            fail_send_after: None,
            sent: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
            instructions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A channel whose `open` waits until the returned sender fires.
    pub fn gated() -> (Self, oneshot::Sender<()>) {
        let (tx, rx) = oneshot::channel();
        let channel = Self::new();
        *channel.gate.lock().unwrap() = Some(rx);
        (channel, tx)
    }

    pub fn failing_open() -> Self {
        Self {
            fail_open: true,
            ..Self::new()
        }
    }

    /// Events emitted right after `Open`.
    pub fn with_script(self, events: Vec<SessionEvent>) -> Self {
        *self.script.lock().unwrap() = events;
        self
    }

    /// Let `n` sends succeed, then fail every later one.
    pub fn fail_send_after(mut self, n: usize) -> Self {
        self.fail_send_after = Some(n);
        self
    }

    pub fn sent(&self) -> SentFrames {
        Arc::clone(&self.sent)
    }

    pub fn closed(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }

    pub fn instructions(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.instructions)
    }
}

#[async_trait]
impl SessionChannel for MockChannel {
    async fn open(
        &self,
        system_instruction: &str,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Arc<dyn LiveSession>, SessionError> {
        self.instructions
            .lock()
            .unwrap()
            .push(system_instruction.to_string());

        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }

        if self.fail_open {
            return Err(SessionError::Connect("mock refused".into()));
        }

        let _ = events.send(SessionEvent::Open);
        for event in self.script.lock().unwrap().drain(..) {
            let _ = events.send(event);
        }

        Ok(Arc::new(MockSession {
            sent: Arc::clone(&self.sent),
            closed: Arc::clone(&self.closed),
            fail_after: self.fail_send_after,
            attempts: AtomicUsize::new(0),
        }))
    }
}

pub struct MockSession {
    sent: SentFrames,
    closed: Arc<AtomicBool>,
    fail_after: Option<usize>,
    attempts: AtomicUsize,
}

#[async_trait]
impl LiveSession for MockSession {
    async fn send(&self, frame: &OutboundFrame) -> Result<(), SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }
        let n = self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_after.is_some_and(|limit| n >= limit) {
            return Err(SessionError::Send("mock transport down".into()));
        }
        self.sent.lock().unwrap().push(frame.clone());
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
