//! Realtime voice backend session.
//!
//! Manages the WebSocket connection lifecycle for the bidirectional voice
//! protocol.
//!
//! # Connection flow
//!
//! 1. `connect()` - establish the WebSocket, send the setup frame, wait for
//!    the remote's explicit setup-complete signal
//! 2. `send_audio_frame()` / `send_text()` - stream outbound frames
//! 3. inbound events arrive on the channel returned by `connect()`
//! 4. `close()` - clean shutdown
//!
//! Open failures are surfaced to the caller and never retried; a hung remote
//! is bounded by the connect and setup timeouts.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};

use crate::config::SessionConfig;

use super::protocol::{RealtimeInput, ServerFrame, SetupFrame};
use super::{SessionError, SessionEvent};

/// Default endpoint of the realtime voice backend.
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Default native-audio model.
pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-09-2025";

/// Prebuilt voice requested at setup.
const VOICE_NAME: &str = "Zephyr";

/// Bound on the WebSocket handshake.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on the wait for the remote's setup-complete signal.
const SETUP_TIMEOUT: Duration = Duration::from_secs(5);

type WsSink = futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Handle to an open realtime voice session.
///
/// Owns the write half of the WebSocket; the read half is drained by a
/// background task that demultiplexes frames onto the event channel.
pub struct RealtimeVoiceSession {
    write: WsSink,
    receiver_task: tokio::task::JoinHandle<()>,
}

impl RealtimeVoiceSession {
    /// Connect, send setup, and wait for the remote open signal.
    ///
    /// Returns the session handle and the inbound event stream. The session
    /// counts as connected only once the remote has explicitly signaled
    /// setup completion.
    pub async fn connect(
        config: &SessionConfig,
        instruction: &str,
    ) -> Result<(Self, mpsc::Receiver<SessionEvent>), SessionError> {
        let endpoint = config.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT);
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        let url = format!("{}?key={}", endpoint, config.api_key);

        log::info!("Connecting to realtime voice backend...");

        let (ws_stream, _response) = timeout(CONNECT_TIMEOUT, connect_async(url))
            .await
            .map_err(|_| SessionError::Transport("Connection timeout".to_string()))?
            .map_err(|e| SessionError::Transport(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();

        let setup = SetupFrame::new(model, instruction, VOICE_NAME);
        let json = serde_json::to_string(&setup)
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        write
            .send(Message::Text(json))
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;

        log::info!("Setup sent, waiting for remote open signal...");

        timeout(SETUP_TIMEOUT, async {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(msg) => match frame_from_message(&msg) {
                        Some(Ok(frame)) if frame.is_setup_complete() => {
                            return Ok(());
                        }
                        Some(Ok(frame)) => {
                            if let Some(error) = frame.error {
                                return Err(SessionError::Transport(error.message));
                            }
                            log::debug!("Ignoring frame while waiting for setup-complete");
                        }
                        Some(Err(e)) => {
                            log::warn!("Dropping malformed frame during setup: {}", e);
                        }
                        None => {
                            if matches!(msg, Message::Close(_)) {
                                return Err(SessionError::Transport(
                                    "Connection closed before setup completed".to_string(),
                                ));
                            }
                        }
                    },
                    Err(e) => return Err(SessionError::Transport(e.to_string())),
                }
            }
            Err(SessionError::Transport("Stream ended during setup".to_string()))
        })
        .await
        .map_err(|_| SessionError::Transport("Setup timeout".to_string()))??;

        log::info!("Realtime voice session open");

        let (events_tx, events_rx) = mpsc::channel(100);

        let receiver_task = tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Close(_)) => {
                        log::info!("Realtime voice session closed by remote");
                        let _ = events_tx.send(SessionEvent::Closed).await;
                        break;
                    }
                    Ok(msg) => match frame_from_message(&msg) {
                        Some(Ok(frame)) => {
                            for event in frame.into_events() {
                                if events_tx.send(event).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Some(Err(e)) => {
                            // Recovered locally: drop the frame, keep the session.
                            log::warn!("Dropping malformed inbound frame: {}", e);
                        }
                        None => {}
                    },
                    Err(e) => {
                        log::warn!("WebSocket error: {}", e);
                        let _ = events_tx
                            .send(SessionEvent::TransportError(e.to_string()))
                            .await;
                        break;
                    }
                }
            }
            log::debug!("Realtime receiver task exiting");
        });

        Ok((
            Self {
                write,
                receiver_task,
            },
            events_rx,
        ))
    }

    /// Send one encoded capture frame (base64 PCM16 @16 kHz).
    pub async fn send_audio_frame(&mut self, encoded: &str) -> Result<(), SessionError> {
        self.send_frame(&RealtimeInput::audio(encoded)).await
    }

    /// Send an out-of-band text turn.
    pub async fn send_text(&mut self, text: &str) -> Result<(), SessionError> {
        self.send_frame(&RealtimeInput::text(text)).await
    }

    async fn send_frame(&mut self, frame: &RealtimeInput) -> Result<(), SessionError> {
        let json =
            serde_json::to_string(frame).map_err(|e| SessionError::Transport(e.to_string()))?;
        self.write
            .send(Message::Text(json))
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))
    }

    /// Gracefully close the session and stop the receiver task.
    pub async fn close(mut self) {
        log::info!("Closing realtime voice session...");
        self.receiver_task.abort();
        if let Err(e) = self.write.close().await {
            log::warn!("Error closing WebSocket: {}", e);
        }
    }
}

impl Drop for RealtimeVoiceSession {
    fn drop(&mut self) {
        // Covers teardown paths that never reached close().
        self.receiver_task.abort();
    }
}

/// Parse a WebSocket message into a server frame. The backend may deliver
/// JSON as text or as binary payloads; everything else is ignored.
fn frame_from_message(msg: &Message) -> Option<Result<ServerFrame, serde_json::Error>> {
    match msg {
        Message::Text(text) => Some(serde_json::from_str(text)),
        Message::Binary(bytes) => Some(serde_json::from_slice(bytes)),
        _ => None,
    }
}
