//! OpenAI Realtime API configuration.
//!
//! - Endpoint and default model
//! - Voice compatibility table
//! - Session parameters sent in `session.update`

use super::messages::{
    ClientEvent, ContentPart, ConversationItem, InputAudioTranscription, MaxTokens, SessionConfig,
    TurnDetection,
};
use crate::core::realtime::base::RealtimeStartConfig;
use crate::core::tutor::prompt::{REALTIME_GREETING_REQUEST, build_realtime_instructions};

/// OpenAI Realtime API WebSocket endpoint.
pub const OPENAI_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

/// Model used when the client does not ask for one.
pub const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview-2024-10-01";

/// Audio sample rate for OpenAI Realtime API.
pub const OPENAI_REALTIME_SAMPLE_RATE: u32 = 24000;

/// Voice used when none is requested.
pub const DEFAULT_REALTIME_VOICE: &str = "shimmer";

/// Audio format for both directions.
pub const REALTIME_AUDIO_FORMAT: &str = "pcm16";

pub const TRANSCRIPTION_MODEL: &str = "whisper-1";
pub const VAD_THRESHOLD: f32 = 0.5;
pub const VAD_PREFIX_PADDING_MS: u32 = 300;
pub const VAD_SILENCE_DURATION_MS: u32 = 500;
pub const SESSION_TEMPERATURE: f32 = 0.6;
pub const MAX_RESPONSE_OUTPUT_TOKENS: i32 = 250;

/// Map a tutor voice to one the realtime endpoint accepts.
///
/// `nova`, `fable` and `onyx` have close realtime equivalents; any other voice
/// passes through unchanged.
pub fn map_realtime_voice(requested: Option<&str>) -> String {
    let voice = match requested.map(str::trim) {
        Some(v) if !v.is_empty() => v,
        _ => return DEFAULT_REALTIME_VOICE.to_string(),
    };
    match voice {
        "nova" => "shimmer",
        "fable" => "alloy",
        "onyx" => "echo",
        other => other,
    }
    .to_string()
}

/// Build the WebSocket URL with model parameter.
pub fn build_ws_url(config: &RealtimeStartConfig) -> String {
    format!("{}?model={}", config.url, config.model)
}

/// Sub-protocols presenting the model family and the credential.
pub fn sub_protocols(api_key: &str) -> String {
    format!("realtime, openai-insecure-api-key.{api_key}, openai-beta.realtime-v1")
}

/// Session configuration sent right after the transport opens.
pub fn build_session_config(config: &RealtimeStartConfig) -> SessionConfig {
    SessionConfig {
        modalities: Some(vec!["text".to_string(), "audio".to_string()]),
        instructions: Some(build_realtime_instructions(
            &config.system_prompt,
            &config.page,
        )),
        voice: Some(map_realtime_voice(config.voice.as_deref())),
        input_audio_format: Some(REALTIME_AUDIO_FORMAT.to_string()),
        output_audio_format: Some(REALTIME_AUDIO_FORMAT.to_string()),
        input_audio_transcription: Some(InputAudioTranscription {
            model: TRANSCRIPTION_MODEL.to_string(),
        }),
        turn_detection: Some(TurnDetection::ServerVad {
            threshold: Some(VAD_THRESHOLD),
            prefix_padding_ms: Some(VAD_PREFIX_PADDING_MS),
            silence_duration_ms: Some(VAD_SILENCE_DURATION_MS),
        }),
        temperature: Some(SESSION_TEMPERATURE),
        max_response_output_tokens: Some(MaxTokens::Number(MAX_RESPONSE_OUTPUT_TOKENS)),
    }
}

/// The three messages sent on open, in order: configure, greet, respond.
pub fn handshake_events(config: &RealtimeStartConfig) -> [ClientEvent; 3] {
    [
        ClientEvent::SessionUpdate {
            session: Box::new(build_session_config(config)),
        },
        ClientEvent::ConversationItemCreate {
            item: ConversationItem {
                item_type: "message".to_string(),
                role: Some("user".to_string()),
                content: Some(vec![ContentPart::InputText {
                    text: REALTIME_GREETING_REQUEST.to_string(),
                }]),
            },
        },
        ClientEvent::ResponseCreate { response: None },
    ]
}
