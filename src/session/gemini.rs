//! `GeminiLiveChannel`: WebSocket client of the vendor's bidirectional
//! `BidiGenerateContent` endpoint.
//!
//! ```text
//!  open()
//!    │  connect_async(live_url?key=…)
//!    │  ──▶ {"setup": {model, generationConfig, systemInstruction}}
//!    │  ◀── {"setupComplete": {}}          (bounded by setup_timeout)
//!    │  emit SessionEvent::Open
//!    ▼
//!  reader task:  serverContent ──▶ SessionEvent::Message(ServerEvent)…
//!                close frame / EOF ──▶ SessionEvent::Close
//!                transport error  ──▶ SessionEvent::Error
//!
//!  GeminiLiveSession::send(frame)
//!       ──▶ {"realtimeInput": {"mediaChunks": [{mimeType, data}]}}
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::{LiveSession, OutboundFrame, ServerEvent, SessionChannel, SessionError, SessionEvent};
use crate::config::{LiveConfig, ServiceConfig};
use crate::service::wire::ServerMessage;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<Socket, Message>;
type WsStream = SplitStream<Socket>;

// ---------------------------------------------------------------------------
// Message translation
// ---------------------------------------------------------------------------

/// Build the first message of a session.
pub fn setup_message(model: &str, voice_name: &str, system_instruction: &str) -> serde_json::Value {
    json!({
        "setup": {
            "model": format!("models/{model}"),
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": voice_name } }
                }
            },
            "systemInstruction": { "parts": [ { "text": system_instruction } ] }
        }
    })
}

/// Wrap one capture frame as realtime input.
pub fn realtime_input_message(frame: &OutboundFrame) -> serde_json::Value {
    json!({
        "realtimeInput": {
            "mediaChunks": [ { "mimeType": frame.mime_type, "data": frame.data } ]
        }
    })
}

/// Split a server message into the events the pipeline routes.
///
/// Audio parts come first, then text parts, then `Interrupted`, then
/// `TurnComplete`.  Parts with neither audio nor text are skipped.
pub fn server_events(msg: &ServerMessage) -> Vec<ServerEvent> {
    let Some(content) = &msg.server_content else {
        return Vec::new();
    };

    let parts = content
        .model_turn
        .as_ref()
        .map(|t| t.parts.as_slice())
        .unwrap_or(&[]);

    let mut events: Vec<ServerEvent> = parts
        .iter()
        .filter_map(|p| p.inline_data.as_ref())
        .filter(|d| !d.data.is_empty())
        .map(|d| ServerEvent::Audio {
            data: d.data.clone(),
        })
        .collect();

    events.extend(
        parts
            .iter()
            .filter_map(|p| p.text.as_ref())
            .filter(|t| !t.is_empty())
            .map(|t| ServerEvent::Text(t.clone())),
    );

    if content.interrupted {
        events.push(ServerEvent::Interrupted);
    }
    if content.turn_complete {
        events.push(ServerEvent::TurnComplete);
    }
    events
}

/// Parse the payload of a text or binary frame.  Other frame kinds yield
/// `Ok(None)`.
fn parse_frame(msg: &Message) -> Result<Option<ServerMessage>, serde_json::Error> {
    match msg {
        Message::Text(text) => serde_json::from_str(text).map(Some),
        Message::Binary(bytes) => serde_json::from_slice(bytes).map(Some),
        _ => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// GeminiLiveChannel
// ---------------------------------------------------------------------------

/// Session factory for the live endpoint.  Cheap to clone the config into;
/// each `open` makes a fresh connection.
pub struct GeminiLiveChannel {
    live_url: String,
    api_key: String,
    model: String,
    voice_name: String,
    setup_timeout: Duration,
}

impl GeminiLiveChannel {
    pub fn from_config(service: &ServiceConfig, live: &LiveConfig) -> Self {
        Self {
            live_url: service.live_url.clone(),
            api_key: service.api_key.clone().unwrap_or_default(),
            model: live.model.clone(),
            voice_name: live.voice_name.clone(),
            setup_timeout: Duration::from_secs(live.setup_timeout_secs),
        }
    }

    async fn await_setup_complete(stream: &mut WsStream) -> Result<(), SessionError> {
        while let Some(msg) = stream.next().await {
            let msg = msg.map_err(|e| SessionError::Setup(e.to_string()))?;
            if let Message::Close(frame) = &msg {
                let reason = frame
                    .as_ref()
                    .map(|f| f.reason.to_string())
                    .unwrap_or_else(|| "closed during setup".into());
                return Err(SessionError::Setup(reason));
            }
            match parse_frame(&msg) {
                Ok(Some(parsed)) if parsed.setup_complete.is_some() => return Ok(()),
                Ok(_) => continue,
                Err(e) => log::warn!("session: ignoring unparseable setup reply: {e}"),
            }
        }
        Err(SessionError::Setup("connection ended before setup completed".into()))
    }
}

#[async_trait]
impl SessionChannel for GeminiLiveChannel {
    async fn open(
        &self,
        system_instruction: &str,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Arc<dyn LiveSession>, SessionError> {
        if self.api_key.is_empty() {
            return Err(SessionError::MissingApiKey);
        }

        let url = format!("{}?key={}", self.live_url, self.api_key);
        log::info!("session: connecting to live model {}", self.model);
        let (socket, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| SessionError::Connect(e.to_string()))?;
        let (mut sink, mut stream) = socket.split();

        let setup = setup_message(&self.model, &self.voice_name, system_instruction);
        sink.send(Message::Text(setup.to_string()))
            .await
            .map_err(|e| SessionError::Setup(e.to_string()))?;

        tokio::time::timeout(self.setup_timeout, Self::await_setup_complete(&mut stream))
            .await
            .map_err(|_| SessionError::Setup("timed out waiting for setupComplete".into()))??;

        log::info!("session: live session open");
        let _ = events.send(SessionEvent::Open);

        let closed = Arc::new(AtomicBool::new(false));
        tokio::spawn(read_loop(stream, events, Arc::clone(&closed)));

        Ok(Arc::new(GeminiLiveSession {
            sink: Mutex::new(sink),
            closed,
        }))
    }
}

/// Forward server messages as events until the socket ends.
///
/// A locally requested close ends the loop silently after emitting
/// `Close`; transport errors after a local close are not reported.
async fn read_loop(
    mut stream: WsStream,
    events: mpsc::UnboundedSender<SessionEvent>,
    closed: Arc<AtomicBool>,
) {
    while let Some(msg) = stream.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                if !closed.load(Ordering::SeqCst) {
                    log::error!("session: transport error: {e}");
                    let _ = events.send(SessionEvent::Error(e.to_string()));
                    return;
                }
                break;
            }
        };

        if let Message::Close(frame) = &msg {
            log::info!("session: server closed the session ({frame:?})");
            break;
        }

        match parse_frame(&msg) {
            Ok(Some(parsed)) => {
                for event in server_events(&parsed) {
                    if events.send(SessionEvent::Message(event)).is_err() {
                        return;
                    }
                }
            }
            Ok(None) => {}
            Err(e) => log::warn!("session: skipping malformed server message: {e}"),
        }
    }
    let _ = events.send(SessionEvent::Close);
}

// ---------------------------------------------------------------------------
// GeminiLiveSession
// ---------------------------------------------------------------------------

struct GeminiLiveSession {
    sink: Mutex<WsSink>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl LiveSession for GeminiLiveSession {
    async fn send(&self, frame: &OutboundFrame) -> Result<(), SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }
        let payload = realtime_input_message(frame).to_string();
        self.sink
            .lock()
            .await
            .send(Message::Text(payload))
            .await
            .map_err(|e| SessionError::Send(e.to_string()))
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.sink.lock().await.close().await {
            log::debug!("session: close handshake failed: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
