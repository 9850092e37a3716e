//! Ordered outbound delivery.
//!
//! Capture may produce frames before the session handle exists (the open
//! handshake is still in flight).  [`SendQueue`] holds them until the handle
//! arrives and then releases them strictly in arrival order.  Frames are
//! never dropped and never reordered.
//!
//! [`run_writer`] is the task that owns the in-flight open future, the
//! queue, and (once resolved) the session handle.  It is the only caller
//! of [`LiveSession::send`], so sends are issued one at a time in capture
//! order.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc;

use super::{LiveSession, OutboundFrame, SessionChannel, SessionEvent};

// ---------------------------------------------------------------------------
// SendQueue
// ---------------------------------------------------------------------------

/// FIFO that withholds frames until the session is open.
#[derive(Debug, Default)]
pub struct SendQueue {
    pending: VecDeque<OutboundFrame>,
    open: bool,
}

impl SendQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a frame behind everything already queued.
    pub fn push(&mut self, frame: OutboundFrame) {
        self.pending.push_back(frame);
    }

    /// Allow frames to leave the queue.
    pub fn mark_open(&mut self) {
        self.open = true;
    }

    /// Next frame to send, or `None` while closed or empty.
    pub fn next_ready(&mut self) -> Option<OutboundFrame> {
        if !self.open {
            return None;
        }
        self.pending.pop_front()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

// ---------------------------------------------------------------------------
// run_writer
// ---------------------------------------------------------------------------

/// Open a session on `channel` and forward every frame from `frames` to it.
///
/// * Frames received while the open is pending are queued.
/// * Once open, the queue is flushed in order, then frames are sent as they
///   arrive.
/// * When `frames` closes (pipeline stop) the session is closed.  If the
///   open is still pending it is awaited first so the handle is never leaked.
/// * An open or send failure is reported as [`SessionEvent::Error`] and ends
///   the task; a failed session is closed before returning.
///
/// Returns the number of frames delivered.
pub async fn run_writer(
    channel: Arc<dyn SessionChannel>,
    system_instruction: String,
    events: mpsc::UnboundedSender<SessionEvent>,
    mut frames: mpsc::UnboundedReceiver<OutboundFrame>,
) -> usize {
    let mut queue = SendQueue::new();

    let open = channel.open(&system_instruction, events.clone());
    tokio::pin!(open);

    let mut stop_requested = false;
    let session: Arc<dyn LiveSession> = loop {
        tokio::select! {
            result = &mut open => match result {
                Ok(session) => break session,
                Err(e) => {
                    log::error!("session: open failed: {e}");
                    let _ = events.send(SessionEvent::Error(e.to_string()));
                    return 0;
                }
            },
            frame = frames.recv(), if !stop_requested => match frame {
                Some(frame) => queue.push(frame),
                None => stop_requested = true,
            },
        }
    };

    log::debug!("session: handle ready, flushing {} queued frame(s)", queue.len());
    queue.mark_open();

    let mut sent = 0usize;
    while let Some(frame) = queue.next_ready() {
        if !deliver(&*session, &frame, &events).await {
            return sent;
        }
        sent += 1;
    }

    if !stop_requested {
        while let Some(frame) = frames.recv().await {
            if !deliver(&*session, &frame, &events).await {
                return sent;
            }
            sent += 1;
        }
    }

    log::debug!("session: writer finished after {sent} frame(s), closing");
    session.close().await;
    sent
}

/// Send one frame; on failure report the error and close the session.
async fn deliver(
    session: &dyn LiveSession,
    frame: &OutboundFrame,
    events: &mpsc::UnboundedSender<SessionEvent>,
) -> bool {
    match session.send(frame).await {
        Ok(()) => true,
        Err(e) => {
            log::error!("session: send of frame {} failed: {e}", frame.sequence);
            let _ = events.send(SessionEvent::Error(e.to_string()));
            session.close().await;
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MockChannel;

    fn frame(seq: u64) -> OutboundFrame {
        OutboundFrame::from_samples(seq, &[0.0; 4], 16_000)
    }

    // ---- SendQueue ---------------------------------------------------------

    #[test]
    fn queue_withholds_until_open() {
        let mut q = SendQueue::new();
        q.push(frame(0));
        q.push(frame(1));
        assert!(q.next_ready().is_none());
        assert_eq!(q.len(), 2);

        q.mark_open();
        assert_eq!(q.next_ready().map(|f| f.sequence), Some(0));
        assert_eq!(q.next_ready().map(|f| f.sequence), Some(1));
        assert!(q.next_ready().is_none());
        assert!(q.is_empty());
    }

    // ---- run_writer --------------------------------------------------------

    #[tokio::test]
    async fn frames_sent_before_open_are_flushed_in_order() {
        let (channel, release) = MockChannel::gated();
        let sent = channel.sent();
        let closed = channel.closed();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();

        let writer = tokio::spawn(run_writer(
            Arc::new(channel),
            "be brief".into(),
            events_tx,
            frames_rx,
        ));

        for seq in 0..5 {
            frames_tx.send(frame(seq)).unwrap();
        }
        tokio::task::yield_now().await;
        assert!(sent.lock().unwrap().is_empty(), "nothing may leave before open");

        release.send(()).unwrap();
        assert_eq!(events_rx.recv().await, Some(SessionEvent::Open));

        for seq in 5..8 {
            frames_tx.send(frame(seq)).unwrap();
        }
        drop(frames_tx);

        assert_eq!(writer.await.unwrap(), 8);
        let order: Vec<u64> = sent.lock().unwrap().iter().map(|f| f.sequence).collect();
        assert_eq!(order, (0..8).collect::<Vec<_>>());
        assert!(closed.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn open_failure_reports_error() {
        let channel = MockChannel::failing_open();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (_frames_tx, frames_rx) = mpsc::unbounded_channel();

        let sent = run_writer(Arc::new(channel), String::new(), events_tx, frames_rx).await;

        assert_eq!(sent, 0);
        assert!(matches!(events_rx.recv().await, Some(SessionEvent::Error(_))));
    }

    #[tokio::test]
    async fn send_failure_is_fatal_to_session() {
        let channel = MockChannel::new().fail_send_after(2);
        let closed = channel.closed();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();

        for seq in 0..4 {
            frames_tx.send(frame(seq)).unwrap();
        }

        let sent = run_writer(Arc::new(channel), String::new(), events_tx, frames_rx).await;

        assert_eq!(sent, 2);
        assert_eq!(events_rx.recv().await, Some(SessionEvent::Open));
        assert!(matches!(events_rx.recv().await, Some(SessionEvent::Error(_))));
        assert!(closed.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn stop_before_open_still_closes_handle() {
        let (channel, release) = MockChannel::gated();
        let closed = channel.closed();
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();

        frames_tx.send(frame(0)).unwrap();
        drop(frames_tx);

        let writer = tokio::spawn(run_writer(Arc::new(channel), String::new(), events_tx, frames_rx));
        tokio::task::yield_now().await;
        release.send(()).unwrap();

        assert_eq!(writer.await.unwrap(), 1);
        assert!(closed.load(std::sync::atomic::Ordering::SeqCst));
    }
}
