//! Unified adapter over the two backend session styles.
//!
//! The controller talks only to this interface; it never branches on the
//! provider itself. Both variants deliver inbound traffic on the same
//! [`SessionEvent`] channel, so downstream handling is identical regardless
//! of which protocol produced an event.

use tokio::sync::mpsc;

use crate::config::{Provider, SessionConfig};
use crate::transcript::Message;

use super::realtime::RealtimeVoiceSession;
use super::streaming_text::StreamingTextSession;
use super::{SessionError, SessionEvent};

/// A live backend session, one of the two protocol styles.
pub enum SessionAdapter {
    RealtimeVoice(RealtimeVoiceSession),
    StreamingText(StreamingTextSession),
}

impl SessionAdapter {
    /// Open a session for the configured provider.
    ///
    /// For the voice variant this resolves only after the remote explicitly
    /// signaled open; for the text variant after local validation (each turn
    /// is its own request later).
    pub async fn open(
        config: &SessionConfig,
        instruction: &str,
    ) -> Result<(Self, mpsc::Receiver<SessionEvent>), SessionError> {
        match config.provider {
            Provider::RealtimeVoice => {
                let (session, events) = RealtimeVoiceSession::connect(config, instruction).await?;
                Ok((SessionAdapter::RealtimeVoice(session), events))
            }
            Provider::StreamingText => {
                let (session, events) = StreamingTextSession::open(config, instruction)?;
                Ok((SessionAdapter::StreamingText(session), events))
            }
        }
    }

    /// Whether this adapter consumes live audio input (and therefore whether
    /// the capture pipeline should run at all).
    pub fn supports_audio_input(&self) -> bool {
        matches!(self, SessionAdapter::RealtimeVoice(_))
    }

    /// Push one encoded audio frame. Unsupported on the text variant.
    pub async fn send_audio_frame(&mut self, encoded: &str) -> Result<(), SessionError> {
        match self {
            SessionAdapter::RealtimeVoice(session) => session.send_audio_frame(encoded).await,
            SessionAdapter::StreamingText(_) => Err(SessionError::Transport(
                "Audio input is not supported by the streaming text backend".to_string(),
            )),
        }
    }

    /// Send a user text turn.
    ///
    /// `history` is the transcript snapshot ending with the new turn; the
    /// voice variant sends only the text, the text variant replays the
    /// role-mapped history per request.
    pub async fn send_text(
        &mut self,
        text: &str,
        history: &[Message],
    ) -> Result<(), SessionError> {
        match self {
            SessionAdapter::RealtimeVoice(session) => session.send_text(text).await,
            SessionAdapter::StreamingText(session) => session.send_text(history),
        }
    }

    /// Close the session, releasing any network resources.
    pub async fn close(self) {
        match self {
            SessionAdapter::RealtimeVoice(session) => session.close().await,
            SessionAdapter::StreamingText(mut session) => session.close(),
        }
    }
}
