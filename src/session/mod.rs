//! Backend session management.
//!
//! Two heterogeneous AI backends live behind one adapter interface: a
//! bidirectional realtime voice protocol over WebSocket and a unidirectional
//! streaming text protocol over HTTP/SSE. The session controller owns the
//! adapter and every native resource (microphone, playback sink, monitor
//! task) and exposes the unified external contract to the UI layer.

pub mod adapter;
pub mod controller;
pub mod protocol;
pub mod realtime;
pub mod state;
pub mod streaming_text;

pub use adapter::SessionAdapter;
pub use controller::SessionController;
pub use state::ConnectionState;

/// Inbound events delivered by either backend adapter, demultiplexed onto
/// one stream and handled strictly in arrival order.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Base64 PCM16 audio from the backend (24 kHz mono).
    AudioChunk(String),
    /// Incremental fragment of the AI's textual reply.
    TextFragment(String),
    /// Completed transcription of the user's speech.
    UserTranscript(String),
    /// The model's output was cut off by user speech.
    Interrupted,
    /// Remote closed the session without error.
    Closed,
    /// Remote or transport failure; the session is unusable.
    TransportError(String),
}

/// Errors surfaced by the session engine.
#[derive(Debug, Clone)]
pub enum SessionError {
    /// `start()` was called while a session is already running.
    AlreadyActive,
    /// Microphone access was refused or no capture device is usable.
    PermissionDenied(String),
    /// Missing or invalid configuration for the chosen provider.
    Configuration(String),
    /// Adapter open failure, mid-session remote error or malformed response.
    Transport(String),
    /// Malformed inbound audio or streamed fragment.
    Decode(String),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::AlreadyActive => {
                write!(f, "A session is already active; call stop() first")
            }
            SessionError::PermissionDenied(e) => {
                write!(f, "Microphone permission denied: {}", e)
            }
            SessionError::Configuration(e) => write!(f, "Configuration error: {}", e),
            SessionError::Transport(e) => write!(f, "Transport error: {}", e),
            SessionError::Decode(e) => write!(f, "Decode error: {}", e),
        }
    }
}

impl std::error::Error for SessionError {}
