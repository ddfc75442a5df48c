//! Realtime voice protocol types.
//!
//! JSON message shapes for the bidirectional voice backend. Outbound: one
//! setup frame at open (system instruction, audio-only response modality,
//! voice selection), then realtime input frames carrying base64 PCM16 audio
//! at 16 kHz or out-of-band text. Inbound: a single multiplexed stream of
//! audio, text, user transcription and control signals, demultiplexed into
//! [`SessionEvent`]s.
//!
//! Unknown inbound fields are ignored so new server event types never break
//! deserialization.

use serde::{Deserialize, Serialize};

use super::SessionEvent;

/// MIME type for outbound capture frames. The rate is a fixed protocol
/// property, unrelated to the 24 kHz inbound audio.
pub const SEND_AUDIO_MIME: &str = "audio/pcm;rate=16000";

// ============================================================================
// Outbound frames (sent to the backend)
// ============================================================================

/// Base64 audio payload with its MIME type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaBlob {
    pub data: String,
    pub mime_type: String,
}

/// A piece of instruction or reply content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<MediaBlob>,
}

/// Instruction content as `{ parts: [{ text }] }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Content {
    pub parts: Vec<Part>,
}

impl Content {
    pub fn from_text(text: &str) -> Self {
        Self {
            parts: vec![Part {
                text: Some(text.to_string()),
                inline_data: None,
            }],
        }
    }
}

/// Session setup sent once at open.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    /// Requests transcription of the user's speech alongside audio replies.
    pub input_audio_transcription: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

/// Envelope for the setup frame.
#[derive(Debug, Clone, Serialize)]
pub struct SetupFrame {
    pub setup: Setup,
}

impl SetupFrame {
    pub fn new(model: &str, instruction: &str, voice: &str) -> Self {
        Self {
            setup: Setup {
                model: model.to_string(),
                generation_config: GenerationConfig {
                    response_modalities: vec!["AUDIO".to_string()],
                    speech_config: SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: voice.to_string(),
                            },
                        },
                    },
                },
                system_instruction: Content::from_text(instruction),
                input_audio_transcription: serde_json::Map::new(),
            },
        }
    }
}

/// One realtime input frame: encoded audio or out-of-band text.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaBlob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl RealtimeInput {
    /// Frame carrying one encoded capture frame.
    pub fn audio(encoded: &str) -> Self {
        Self {
            media: Some(MediaBlob {
                data: encoded.to_string(),
                mime_type: SEND_AUDIO_MIME.to_string(),
            }),
            text: None,
        }
    }

    /// Frame carrying a text turn.
    pub fn text(text: &str) -> Self {
        Self {
            media: None,
            text: Some(text.to_string()),
        }
    }
}

// ============================================================================
// Inbound frames (received from the backend)
// ============================================================================

/// Top-level inbound message. All fields optional; servers interleave them.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerFrame {
    pub setup_complete: Option<serde_json::Value>,
    pub server_content: Option<ServerContent>,
    pub error: Option<ServerError>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerContent {
    pub model_turn: Option<Content>,
    pub input_transcription: Option<TranscriptionText>,
    pub interrupted: bool,
    pub turn_complete: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TranscriptionText {
    pub text: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerError {
    pub message: String,
    pub code: Option<i64>,
}

impl ServerFrame {
    /// Is this the remote's explicit open signal?
    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Demultiplex this frame into session events, in wire order:
    /// model-turn parts first (audio/text as interleaved by the server),
    /// then user transcription, then the interruption signal.
    pub fn into_events(self) -> Vec<SessionEvent> {
        let mut events = Vec::new();

        if let Some(error) = self.error {
            events.push(SessionEvent::TransportError(error.message));
            return events;
        }

        if let Some(content) = self.server_content {
            if let Some(turn) = content.model_turn {
                for part in turn.parts {
                    if let Some(blob) = part.inline_data {
                        events.push(SessionEvent::AudioChunk(blob.data));
                    }
                    if let Some(text) = part.text {
                        if !text.is_empty() {
                            events.push(SessionEvent::TextFragment(text));
                        }
                    }
                }
            }

            if let Some(transcription) = content.input_transcription {
                if !transcription.text.is_empty() {
                    events.push(SessionEvent::UserTranscript(transcription.text));
                }
            }

            if content.interrupted {
                events.push(SessionEvent::Interrupted);
            }
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_frame_carries_instruction_modality_and_voice() {
        let frame = SetupFrame::new("models/test", "You are an interviewer.", "Zephyr");
        let json = serde_json::to_string(&frame).unwrap();

        assert!(json.contains("\"setup\""));
        assert!(json.contains("\"model\":\"models/test\""));
        assert!(json.contains("\"responseModalities\":[\"AUDIO\"]"));
        assert!(json.contains("\"voiceName\":\"Zephyr\""));
        assert!(json.contains("\"parts\":[{\"text\":\"You are an interviewer.\"}]"));
        assert!(json.contains("\"inputAudioTranscription\":{}"));
    }

    #[test]
    fn audio_frame_matches_wire_shape() {
        let frame = RealtimeInput::audio("AAAA");
        let json = serde_json::to_string(&frame).unwrap();
        assert_eq!(
            json,
            "{\"media\":{\"data\":\"AAAA\",\"mimeType\":\"audio/pcm;rate=16000\"}}"
        );
    }

    #[test]
    fn text_frame_omits_media() {
        let frame = RealtimeInput::text("Hello");
        let json = serde_json::to_string(&frame).unwrap();
        assert_eq!(json, "{\"text\":\"Hello\"}");
    }

    #[test]
    fn setup_complete_is_detected() {
        let frame: ServerFrame = serde_json::from_str("{\"setupComplete\":{}}").unwrap();
        assert!(frame.is_setup_complete());
        assert!(frame.into_events().is_empty());
    }

    #[test]
    fn model_turn_demuxes_audio_and_text() {
        let json = r#"{
            "serverContent": {
                "modelTurn": {
                    "parts": [
                        {"inlineData": {"data": "UENN", "mimeType": "audio/pcm;rate=24000"}},
                        {"text": "Hello"}
                    ]
                }
            }
        }"#;
        let frame: ServerFrame = serde_json::from_str(json).unwrap();
        let events = frame.into_events();

        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], SessionEvent::AudioChunk(d) if d == "UENN"));
        assert!(matches!(&events[1], SessionEvent::TextFragment(t) if t == "Hello"));
    }

    #[test]
    fn user_transcription_becomes_event() {
        let json = r#"{"serverContent": {"inputTranscription": {"text": "my answer"}}}"#;
        let frame: ServerFrame = serde_json::from_str(json).unwrap();
        let events = frame.into_events();
        assert!(matches!(&events[0], SessionEvent::UserTranscript(t) if t == "my answer"));
    }

    #[test]
    fn interruption_becomes_event() {
        let json = r#"{"serverContent": {"interrupted": true}}"#;
        let frame: ServerFrame = serde_json::from_str(json).unwrap();
        assert!(matches!(frame.into_events()[0], SessionEvent::Interrupted));
    }

    #[test]
    fn error_preempts_other_events() {
        let json = r#"{
            "error": {"message": "quota exceeded", "code": 429},
            "serverContent": {"modelTurn": {"parts": [{"text": "late"}]}}
        }"#;
        let frame: ServerFrame = serde_json::from_str(json).unwrap();
        let events = frame.into_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], SessionEvent::TransportError(m) if m == "quota exceeded"));
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let json = r#"{"usageMetadata": {"tokens": 5}, "serverContent": {"turnComplete": true}}"#;
        let frame: ServerFrame = serde_json::from_str(json).unwrap();
        assert!(frame.into_events().is_empty());
    }
}
