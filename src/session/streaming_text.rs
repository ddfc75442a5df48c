//! Streaming text backend session.
//!
//! Stateless between turns: every user turn is one HTTP request against a
//! chat-completions endpoint with `stream: true`, carrying the full
//! instruction and the role-mapped transcript. The response body is an event
//! stream of `data: <json>` lines; each incremental content delta is
//! surfaced as a [`SessionEvent::TextFragment`] until the `[DONE]` sentinel.
//!
//! No persistent connection is ever opened, and audio input is not
//! supported: voice capture is never started for this provider.

use std::sync::OnceLock;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::SessionConfig;
use crate::transcript::{Message, Role};

use super::{SessionError, SessionEvent};

/// Default endpoint of the streaming text backend.
pub const DEFAULT_ENDPOINT: &str = "https://ark.cn-beijing.volces.com/api/v3/chat/completions";

/// Global HTTP client for reuse across requests (avoids TLS handshake
/// overhead).
static HTTP_CLIENT: OnceLock<Client> = OnceLock::new();

fn http_client() -> &'static Client {
    HTTP_CLIENT.get_or_init(|| {
        Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to build HTTP client")
    })
}

/// Request body for the chat-completions endpoint.
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

/// One role-mapped chat message.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// One decoded `data:` payload of the response stream.
#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StreamDelta {
    content: Option<String>,
}

/// What one event-stream line means.
#[derive(Debug, PartialEq)]
enum SseLine {
    /// Incremental content to append.
    Delta(String),
    /// Terminator sentinel; the turn is complete.
    Done,
    /// Comment, keep-alive, or a payload without usable content.
    Skip,
}

/// Decode one line of the event stream.
///
/// Malformed JSON data lines are skipped (logged by the caller), never
/// fatal: the stream continues with the next line.
fn parse_sse_line(line: &str) -> SseLine {
    let Some(payload) = line.trim().strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let payload = payload.trim_start();

    if payload == "[DONE]" {
        return SseLine::Done;
    }

    match serde_json::from_str::<StreamChunk>(payload) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .filter(|content| !content.is_empty())
            .map(SseLine::Delta)
            .unwrap_or(SseLine::Skip),
        Err(e) => {
            log::warn!("Skipping malformed stream line: {}", e);
            SseLine::Skip
        }
    }
}

/// Handle to the streaming text backend.
///
/// Holds only configuration; each turn is an independent request whose task
/// feeds the shared event channel.
pub struct StreamingTextSession {
    endpoint: String,
    api_key: String,
    model: String,
    instruction: String,
    events_tx: mpsc::Sender<SessionEvent>,
    /// In-flight turn, aborted on close.
    turn_task: Option<tokio::task::JoinHandle<()>>,
}

impl StreamingTextSession {
    /// Validate the configuration and set up the event channel. No network
    /// traffic happens until the first turn.
    pub fn open(
        config: &SessionConfig,
        instruction: &str,
    ) -> Result<(Self, mpsc::Receiver<SessionEvent>), SessionError> {
        let model = config.model.clone().ok_or_else(|| {
            SessionError::Configuration(
                "A model id is required for the streaming text provider".to_string(),
            )
        })?;

        let (events_tx, events_rx) = mpsc::channel(100);

        Ok((
            Self {
                endpoint: config
                    .endpoint
                    .clone()
                    .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
                api_key: config.api_key.clone(),
                model,
                instruction: instruction.to_string(),
                events_tx,
                turn_task: None,
            },
            events_rx,
        ))
    }

    /// Run one turn: POST the instruction plus role-mapped history and
    /// stream the reply's deltas onto the event channel.
    ///
    /// `history` must already end with the user's new turn.
    pub fn send_text(&mut self, history: &[Message]) -> Result<(), SessionError> {
        let mut messages = vec![ChatMessage {
            role: "system".to_string(),
            content: self.instruction.clone(),
        }];
        messages.extend(history.iter().map(|m| ChatMessage {
            role: match m.role {
                Role::User => "user".to_string(),
                Role::Ai => "assistant".to_string(),
            },
            content: m.content.clone(),
        }));

        let request = ChatRequest {
            model: self.model.clone(),
            messages,
            stream: true,
        };

        let endpoint = self.endpoint.clone();
        let api_key = self.api_key.clone();
        let events_tx = self.events_tx.clone();

        self.turn_task = Some(tokio::spawn(async move {
            if let Err(e) = run_turn(&endpoint, &api_key, &request, &events_tx).await {
                log::error!("Streaming turn failed: {}", e);
                let _ = events_tx
                    .send(SessionEvent::TransportError(e.to_string()))
                    .await;
            }
        }));

        Ok(())
    }

    /// Abort any in-flight turn. There is no connection to tear down.
    pub fn close(&mut self) {
        if let Some(task) = self.turn_task.take() {
            task.abort();
        }
    }
}

impl Drop for StreamingTextSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Issue the request and pump deltas until `[DONE]` or end of body.
async fn run_turn(
    endpoint: &str,
    api_key: &str,
    request: &ChatRequest,
    events_tx: &mpsc::Sender<SessionEvent>,
) -> Result<(), SessionError> {
    let response = http_client()
        .post(endpoint)
        .header("Authorization", format!("Bearer {}", api_key))
        .json(request)
        .send()
        .await
        .map_err(|e| SessionError::Transport(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(SessionError::Transport(format!("HTTP {}: {}", status, body)));
    }

    let mut stream = response.bytes_stream();
    let mut buffer = String::new();
    let mut fragments = 0u64;

    'stream: while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| SessionError::Transport(e.to_string()))?;
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(line_end) = buffer.find('\n') {
            let line = buffer[..line_end].to_string();
            buffer.drain(..=line_end);

            match parse_sse_line(&line) {
                SseLine::Delta(content) => {
                    fragments += 1;
                    if events_tx
                        .send(SessionEvent::TextFragment(content))
                        .await
                        .is_err()
                    {
                        break 'stream;
                    }
                }
                SseLine::Done => break 'stream,
                SseLine::Skip => {}
            }
        }
    }

    log::debug!("Streaming turn complete, {} fragments", fragments);
    Ok(())
}
