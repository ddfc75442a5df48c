//! Real-time AI mock-interview session engine.
//!
//! Captures microphone audio, streams it to a conversational AI backend,
//! plays back spoken replies and maintains a live transcript. Two backend
//! styles live behind one adapter interface:
//!
//! ```text
//! microphone ─▶ resample (16kHz) ─▶ PCM16/base64 ─▶ realtime voice session
//!     │                                                    │
//!     └─▶ volume monitor                    audio ─▶ PCM decode ─▶ playback
//!                                           text  ─▶ transcript ─▶ UI
//!
//! send_text ─▶ streaming text session (SSE) ─▶ deltas ─▶ transcript ─▶ UI
//! ```
//!
//! The [`session::SessionController`] owns every native resource and exposes
//! the external contract: `start`, `stop`, `send_text_message`, plus the
//! observed `connection_state`, `messages`, `volume` and `last_error`.

pub mod audio;
pub mod config;
pub mod session;
pub mod transcript;

pub use config::{ContextSource, InterviewMode, OutputMode, Provider, SessionConfig};
pub use session::{ConnectionState, SessionController, SessionError};
pub use transcript::{Message, Role, Transcript};
