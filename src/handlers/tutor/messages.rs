//! Tutor WebSocket message types
//!
//! All messages are JSON objects tagged by `type`. Binary frames carry raw
//! little-endian f32 microphone samples at 24kHz mono.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::core::status::SessionStatus;
use crate::core::tutor::conversation::Role;
use crate::core::tutor::page::PageContent;

/// Maximum allowed size for a custom system prompt (100 KB)
pub const MAX_PROMPT_SIZE: usize = 100 * 1024;

/// Maximum allowed size for transcript text (50 KB)
pub const MAX_TEXT_SIZE: usize = 50 * 1024;

/// Maximum allowed size for page text and screenshot together (8 MB)
pub const MAX_PAGE_SIZE: usize = 8 * 1024 * 1024;

// =============================================================================
// Incoming Messages (Client -> Server)
// =============================================================================

/// Settings shared by both ways of starting a session.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StartSession {
    #[serde(default)]
    pub page: PageContent,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub voice: Option<String>,
    /// OpenAI key supplied by the tab; the server key is used otherwise
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Incoming WebSocket messages from the tab
#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[allow(clippy::large_enum_variant)]
pub enum TutorIncomingMessage {
    /// Open a realtime session for this tab
    StartRealtime(StartSession),

    StopRealtime,

    /// Base64 PCM16 audio for the realtime session
    RealtimeAudio { audio: String },

    /// Raw provider event forwarded to the realtime session
    RealtimeMessage { message: Value },

    /// Start a turn-based session and speak a greeting
    StartTutor(StartSession),

    /// The student pressed talk
    StartTalking,

    /// The student released talk; transcribe what the server recorded, or stop
    /// relaying the microphone in realtime mode
    StopTalking,

    /// Text recognized by the tab itself
    Transcript { text: String },

    /// The tab's recognizer ended without text (`no-speech`, `network`, ...)
    RecognitionError { error: String },

    /// Reply to `capture_snapshot`
    Snapshot {
        request_id: Uuid,
        #[serde(default)]
        screenshot: Option<String>,
    },

    /// Reply to `play_audio` or `speak_locally`
    PlaybackFinished {
        request_id: Uuid,
        #[serde(default)]
        error: Option<String>,
    },

    /// A realtime audio segment finished rendering
    SegmentFinished { segment_id: u64 },

    /// Silence all tutor audio
    StopAudio,

    StopTutor,
}

// =============================================================================
// Outgoing Messages (Server -> Client)
// =============================================================================

/// Outgoing WebSocket messages to the tab
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TutorOutgoingMessage {
    RealtimeStarted { session_id: Uuid },

    RealtimeStopped { reason: String },

    /// Provider event not handled by the gateway
    RealtimeEvent { event: Value },

    /// Render one realtime audio segment, then answer `segment_finished`
    PlaySegment {
        segment_id: u64,
        sample_rate: u32,
        /// Base64 PCM16
        audio: String,
    },

    /// Partial tutor transcript while realtime audio streams in
    TranscriptDelta { delta: String },

    Status {
        status: SessionStatus,
        message: String,
    },

    Message { role: Role, content: String },

    CaptureSnapshot { request_id: Uuid },

    /// Play encoded audio, then answer `playback_finished`
    PlayAudio {
        request_id: Uuid,
        format: String,
        /// Base64 encoded audio
        audio: String,
    },

    /// Speak with the tab's own voice, then answer `playback_finished`
    SpeakLocally { request_id: Uuid, text: String },

    /// Halt any audio playing in the tab
    StopAudio,

    /// Cancel local speech synthesis
    CancelSpeech,

    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        message: String,
    },
}

impl TutorOutgoingMessage {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: Some(code.to_string()),
            message: message.into(),
        }
    }
}

// =============================================================================
// Message Routing
// =============================================================================

/// Work for the socket writer task
#[derive(Debug)]
pub enum TutorMessageRoute {
    Outgoing(TutorOutgoingMessage),
    Close,
}

// =============================================================================
// Validation
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TutorValidationError {
    #[error("System prompt too large: {size} bytes (max: {max} bytes)")]
    PromptTooLarge { size: usize, max: usize },
    #[error("Text too large: {size} bytes (max: {max} bytes)")]
    TextTooLarge { size: usize, max: usize },
    #[error("Page content too large: {size} bytes (max: {max} bytes)")]
    PageTooLarge { size: usize, max: usize },
}

impl StartSession {
    fn validate_size(&self) -> Result<(), TutorValidationError> {
        if let Some(prompt) = &self.system_prompt
            && prompt.len() > MAX_PROMPT_SIZE
        {
            return Err(TutorValidationError::PromptTooLarge {
                size: prompt.len(),
                max: MAX_PROMPT_SIZE,
            });
        }
        let page_size = self.page.text_content.len()
            + self.page.screenshot.as_ref().map_or(0, String::len);
        if page_size > MAX_PAGE_SIZE {
            return Err(TutorValidationError::PageTooLarge {
                size: page_size,
                max: MAX_PAGE_SIZE,
            });
        }
        Ok(())
    }
}

impl TutorIncomingMessage {
    /// Validates message field sizes to prevent resource exhaustion.
    pub fn validate_size(&self) -> Result<(), TutorValidationError> {
        match self {
            Self::StartRealtime(start) | Self::StartTutor(start) => start.validate_size(),
            Self::Transcript { text } if text.len() > MAX_TEXT_SIZE => {
                Err(TutorValidationError::TextTooLarge {
                    size: text.len(),
                    max: MAX_TEXT_SIZE,
                })
            }
            Self::Snapshot {
                screenshot: Some(shot),
                ..
            } if shot.len() > MAX_PAGE_SIZE => Err(TutorValidationError::PageTooLarge {
                size: shot.len(),
                max: MAX_PAGE_SIZE,
            }),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_start_realtime_deserialization() {
        let json = r#"{
            "type": "start_realtime",
            "page": {"title": "Fractions", "textContent": "Add the fractions", "hasScreenshot": false},
            "voice": "nova"
        }"#;
        let msg: TutorIncomingMessage = serde_json::from_str(json).expect("Should deserialize");
        match msg {
            TutorIncomingMessage::StartRealtime(start) => {
                assert_eq!(start.page.title, "Fractions");
                assert_eq!(start.page.text_content, "Add the fractions");
                assert_eq!(start.voice.as_deref(), Some("nova"));
                assert!(start.api_key.is_none());
            }
            other => panic!("Expected StartRealtime, got {other:?}"),
        }
    }

    #[test]
    fn test_unit_messages() {
        let msg: TutorIncomingMessage =
            serde_json::from_str(r#"{"type": "start_talking"}"#).expect("Should deserialize");
        assert!(matches!(msg, TutorIncomingMessage::StartTalking));
        let msg: TutorIncomingMessage =
            serde_json::from_str(r#"{"type": "stop_tutor"}"#).expect("Should deserialize");
        assert!(matches!(msg, TutorIncomingMessage::StopTutor));
    }

    #[test]
    fn test_snapshot_reply() {
        let id = Uuid::new_v4();
        let msg: TutorIncomingMessage =
            serde_json::from_value(json!({"type": "snapshot", "request_id": id}))
                .expect("Should deserialize");
        match msg {
            TutorIncomingMessage::Snapshot {
                request_id,
                screenshot,
            } => {
                assert_eq!(request_id, id);
                assert!(screenshot.is_none());
            }
            other => panic!("Expected Snapshot, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(serde_json::from_str::<TutorIncomingMessage>(r#"{"type": "dance"}"#).is_err());
    }

    #[test]
    fn test_outgoing_serialization() {
        let json = serde_json::to_value(TutorOutgoingMessage::Status {
            status: SessionStatus::Listening,
            message: "🎤 I'm listening! Ask your question...".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["status"], "listening");

        let json = serde_json::to_value(TutorOutgoingMessage::Message {
            role: Role::Assistant,
            content: "Hi!".into(),
        })
        .unwrap();
        assert_eq!(json, json!({"type": "message", "role": "assistant", "content": "Hi!"}));

        let json = serde_json::to_value(TutorOutgoingMessage::StopAudio).unwrap();
        assert_eq!(json, json!({"type": "stop_audio"}));
    }

    #[test]
    fn test_error_code_omitted_when_absent() {
        let json = serde_json::to_string(&TutorOutgoingMessage::Error {
            code: None,
            message: "boom".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"error","message":"boom"}"#);
    }

    #[test]
    fn test_validation_limits() {
        let msg = TutorIncomingMessage::Transcript {
            text: "a".repeat(MAX_TEXT_SIZE + 1),
        };
        assert!(matches!(
            msg.validate_size(),
            Err(TutorValidationError::TextTooLarge { .. })
        ));

        let msg = TutorIncomingMessage::StartTutor(StartSession {
            system_prompt: Some("a".repeat(MAX_PROMPT_SIZE + 1)),
            ..Default::default()
        });
        assert!(matches!(
            msg.validate_size(),
            Err(TutorValidationError::PromptTooLarge { .. })
        ));

        let msg = TutorIncomingMessage::Transcript {
            text: "What is a denominator?".into(),
        };
        assert!(msg.validate_size().is_ok());
    }
}
