//! Session configuration and interview context.
//!
//! A `SessionConfig` is supplied by the caller at `start()` and is immutable
//! for the lifetime of the session. The `ContextSource` is an immutable
//! snapshot consumed once to build the system instruction.

use serde::{Deserialize, Serialize};

/// Which AI backend the session talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Provider {
    /// Bidirectional low-latency voice protocol (WebSocket).
    RealtimeVoice,
    /// Unidirectional streaming text protocol (SSE over HTTP).
    StreamingText,
}

/// Interview style requested by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InterviewMode {
    /// Realistic end-to-end technical interview.
    Tech,
    /// Focused practice on a single module/topic.
    Module,
}

/// How the AI's replies are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutputMode {
    Voice,
    Text,
}

/// Candidate-supplied context used to steer the interviewer.
///
/// Captured once at session start; never mutated mid-session.
#[derive(Debug, Clone, Default)]
pub enum ContextSource {
    #[default]
    None,
    /// A project URL the interviewer should ask about.
    Url(String),
    /// A single uploaded file.
    File { name: String, data: Vec<u8> },
    /// An uploaded project folder.
    Folder { name: String, files: Vec<Vec<u8>> },
}

/// Immutable per-session configuration supplied by the caller.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub provider: Provider,
    /// API key for the chosen provider.
    pub api_key: String,
    /// Override for the backend endpoint; provider default when `None`.
    pub endpoint: Option<String>,
    /// Model identifier; provider default when `None` (required for the
    /// streaming text provider, which has no usable default).
    pub model: Option<String>,
    pub interview_mode: InterviewMode,
    pub output_mode: OutputMode,
}

/// Scripted first turn sent right after open so the AI speaks first.
pub const OPENING_LINE: &str = "Hello, I am ready for the interview.";

/// Build the system instruction from the interview mode and context snapshot.
pub fn system_instruction(mode: InterviewMode, context: &ContextSource) -> String {
    let mut instruction = format!(
        "You are an expert technical interviewer conducting a {}. ",
        match mode {
            InterviewMode::Tech => "realistic technical interview",
            InterviewMode::Module => "module practice session",
        }
    );

    match context {
        ContextSource::None => {}
        ContextSource::Url(url) => {
            instruction.push_str(&format!(
                "The candidate has provided this GitHub URL as context: {}. \
                 Please ask questions related to this project. ",
                url
            ));
        }
        ContextSource::File { name, .. } => {
            instruction.push_str(&format!(
                "The candidate has provided a file named {} as context. ",
                name
            ));
        }
        ContextSource::Folder { name, .. } => {
            instruction.push_str(&format!(
                "The candidate has provided a project folder ({}) as context. ",
                name
            ));
        }
    }

    instruction.push_str(
        "Keep your responses concise, professional, and conversational. \
         Start by briefly introducing yourself and asking the first question.",
    );
    instruction
}
