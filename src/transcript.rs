//! Transcript accumulation for the live interview.
//!
//! AI replies arrive as many small independent fragments that must render as
//! one growing message, while genuinely separate AI turns stay separate.
//! Coalescing is id-based: fragments append to the message whose id matches
//! the currently tracked streaming id; anything that closes the turn (a user
//! message, an interruption) clears that id so the next fragment starts a
//! fresh message.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Ai,
}

/// One transcript entry. `id` is immutable once created; `content` grows
/// only while the message is the currently streaming AI turn.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, content: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content,
            timestamp: Utc::now(),
        }
    }
}

/// Ordered message list with AI-fragment coalescing.
#[derive(Debug, Default)]
pub struct Transcript {
    messages: Vec<Message>,
    /// Id of the AI message currently receiving fragments, if any.
    streaming_ai_id: Option<Uuid>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an incoming AI fragment.
    ///
    /// If the last message is the tracked streaming AI message, the fragment
    /// is appended in place (id preserved). Otherwise a new AI message is
    /// created and becomes the streaming target.
    pub fn append_ai_fragment(&mut self, text: &str) {
        if let Some(last) = self.messages.last_mut() {
            if last.role == Role::Ai && Some(last.id) == self.streaming_ai_id {
                last.content.push_str(text);
                return;
            }
        }

        let message = Message::new(Role::Ai, text.to_string());
        self.streaming_ai_id = Some(message.id);
        self.messages.push(message);
    }

    /// Append a user message. User messages are never coalesced, and a user
    /// turn closes out any in-progress AI turn.
    pub fn append_user_message(&mut self, text: &str) {
        self.streaming_ai_id = None;
        self.messages.push(Message::new(Role::User, text.to_string()));
    }

    /// The model's output was interrupted: the next AI fragment must start a
    /// new message. Transcript content is left untouched.
    pub fn note_interruption(&mut self) {
        self.streaming_ai_id = None;
    }

    /// Drop all messages and streaming state (new session).
    pub fn clear(&mut self) {
        self.messages.clear();
        self.streaming_ai_id = None;
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragments_coalesce_into_one_message() {
        let mut t = Transcript::new();
        t.append_ai_fragment("Hel");
        t.append_ai_fragment("lo");

        assert_eq!(t.len(), 1);
        assert_eq!(t.messages()[0].content, "Hello");
        assert_eq!(t.messages()[0].role, Role::Ai);
    }

    #[test]
    fn coalescing_preserves_message_id() {
        let mut t = Transcript::new();
        t.append_ai_fragment("Hel");
        let id = t.messages()[0].id;
        t.append_ai_fragment("lo");
        assert_eq!(t.messages()[0].id, id);
    }

    #[test]
    fn user_message_splits_ai_turns() {
        let mut t = Transcript::new();
        t.append_ai_fragment("First question.");
        t.append_user_message("My answer");
        t.append_ai_fragment("Second question.");

        assert_eq!(t.len(), 3);
        assert_eq!(t.messages()[0].role, Role::Ai);
        assert_eq!(t.messages()[1].role, Role::User);
        assert_eq!(t.messages()[2].role, Role::Ai);
        assert_ne!(t.messages()[0].id, t.messages()[2].id);
    }

    #[test]
    fn user_messages_never_coalesce() {
        let mut t = Transcript::new();
        t.append_user_message("one");
        t.append_user_message("two");

        assert_eq!(t.len(), 2);
        assert_eq!(t.messages()[0].content, "one");
        assert_eq!(t.messages()[1].content, "two");
    }

    #[test]
    fn interruption_starts_new_ai_message() {
        let mut t = Transcript::new();
        t.append_ai_fragment("As I was say");
        t.note_interruption();
        t.append_ai_fragment("Let me rephrase");

        assert_eq!(t.len(), 2);
        assert_eq!(t.messages()[0].content, "As I was say");
        assert_eq!(t.messages()[1].content, "Let me rephrase");
    }

    #[test]
    fn interruption_leaves_content_untouched() {
        let mut t = Transcript::new();
        t.append_ai_fragment("partial");
        t.note_interruption();
        assert_eq!(t.messages()[0].content, "partial");
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn clear_resets_everything() {
        let mut t = Transcript::new();
        t.append_ai_fragment("text");
        t.append_user_message("reply");
        t.clear();

        assert!(t.is_empty());

        // After clearing, fragments start a fresh message.
        t.append_ai_fragment("new");
        assert_eq!(t.len(), 1);
        assert_eq!(t.messages()[0].content, "new");
    }
}
