//! REST endpoints: health check and direct access to the cloud collaborators.
//!
//! Tabs may supply their own OpenAI key in the `x-provider-api-key` header;
//! otherwise the server key is used.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Multipart, State},
    http::{HeaderMap, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use crate::core::services::{
    AudioUpload, SpeechRequest, SpeechSynthesizer, SynthesisOutcome, Transcriber, VisionChat,
};
use crate::core::tutor::conversation::{Role, Turn};
use crate::core::tutor::page::{PageContent, VisualSnapshot};
use crate::core::tutor::prompt::build_turn_prompt;
use crate::errors::{AppError, AppResult};
use crate::state::AppState;

/// Header carrying a client-supplied provider key.
pub const PROVIDER_KEY_HEADER: &str = "x-provider-api-key";

/// Largest accepted upload for `/transcribe` (25 MB, the Whisper limit).
pub const MAX_AUDIO_UPLOAD: usize = 25 * 1024 * 1024;

pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "OK" }))
}

fn client_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(PROVIDER_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

// =============================================================================
// Vision chat
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ChatMessagePayload {
    pub role: Role,
    pub content: String,
    /// Screenshot data URL attached to a user message
    #[serde(default)]
    pub screenshot: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VisionChatRequest {
    #[serde(default)]
    pub page: PageContent,
    pub messages: Vec<ChatMessagePayload>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VisionChatResponse {
    pub reply: String,
}

impl ChatMessagePayload {
    fn into_turn(self) -> Turn {
        match self.role {
            Role::User => Turn::user(
                self.content,
                self.screenshot
                    .filter(|s| !s.trim().is_empty())
                    .map(VisualSnapshot::new),
            ),
            Role::Assistant => Turn::assistant(self.content),
            Role::System => Turn::system(self.content),
        }
    }
}

/// `POST /vision-chat`
pub async fn vision_chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<VisionChatRequest>,
) -> AppResult<Json<VisionChatResponse>> {
    if request.messages.is_empty() {
        return Err(AppError::BadRequest("messages must not be empty".into()));
    }
    let vision = state.vision(client_key(&headers))?;

    let base = request
        .system_prompt
        .as_deref()
        .unwrap_or(&state.config.system_prompt);
    let instructions = build_turn_prompt(base, &request.page.normalized());
    let turns: Vec<Turn> = request
        .messages
        .into_iter()
        .map(ChatMessagePayload::into_turn)
        .collect();

    let reply = vision.chat(&instructions, &turns).await?;
    Ok(Json(VisionChatResponse { reply }))
}

// =============================================================================
// Transcription
// =============================================================================

#[derive(Debug, Serialize)]
pub struct TranscriptionResponse {
    pub text: String,
}

/// `POST /transcribe` with a multipart `file` field.
pub async fn transcribe(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> AppResult<Json<TranscriptionResponse>> {
    let transcriber = state.transcriber(client_key(&headers))?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("audio.webm").to_string();
        let mime_type = field.content_type().unwrap_or("audio/webm").to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(format!("Failed to read file: {e}")))?;
        if data.len() > MAX_AUDIO_UPLOAD {
            return Err(AppError::BadRequest(format!(
                "Audio file too large: {} bytes (max: {} bytes)",
                data.len(),
                MAX_AUDIO_UPLOAD
            )));
        }
        upload = Some(AudioUpload {
            data,
            file_name,
            mime_type,
        });
    }

    let upload = upload.ok_or_else(|| AppError::BadRequest("Missing 'file' field".into()))?;
    info!(bytes = upload.data.len(), "Transcription requested");
    let text = transcriber.transcribe(upload).await?;
    Ok(Json(TranscriptionResponse { text }))
}

// =============================================================================
// Speech
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct SpeechPayload {
    pub text: String,
    #[serde(default)]
    pub voice: Option<String>,
}

/// `POST /speech`, answering with mp3 audio.
pub async fn speech(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<SpeechPayload>,
) -> AppResult<Response> {
    if payload.text.trim().is_empty() {
        return Err(AppError::BadRequest("text must not be empty".into()));
    }
    let synthesizer = state.speech(client_key(&headers))?;
    let voice = payload.voice.as_deref().or(Some(state.config.voice.as_str()));
    let request = SpeechRequest::new(&payload.text, voice);

    match synthesizer.synthesize(&request).await {
        SynthesisOutcome::Audio(audio) => {
            Ok(([(header::CONTENT_TYPE, "audio/mpeg")], audio).into_response())
        }
        SynthesisOutcome::Unavailable(reason) => Err(AppError::SynthesisUnavailable(reason)),
    }
}
