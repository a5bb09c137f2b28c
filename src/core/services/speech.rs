//! Cloud text-to-speech for tutor replies.
//!
//! - Endpoint: `POST {base}/audio/speech`
//! - Output: mp3
//!
//! Synthesis never fails loudly. Any problem is reported as
//! [`SynthesisOutcome::Unavailable`] so the caller can fall back to local speech.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::OpenAIEndpoint;
use crate::core::tutor::page::truncate_chars;

/// Longest input accepted by the speech endpoint.
pub const MAX_SPEECH_INPUT_CHARS: usize = 4000;
pub const DEFAULT_SPEECH_MODEL: &str = "gpt-4o-mini-tts";
pub const DEFAULT_SPEECH_VOICE: &str = "nova";
pub const DEFAULT_SPEECH_SPEED: f32 = 1.1;

/// One synthesis request.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechRequest {
    pub text: String,
    pub voice: String,
    pub speed: f32,
    pub format: String,
}

impl SpeechRequest {
    /// Build a request with the tutor defaults. Input is capped at
    /// [`MAX_SPEECH_INPUT_CHARS`].
    pub fn new(text: &str, voice: Option<&str>) -> Self {
        let voice = voice
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(DEFAULT_SPEECH_VOICE);
        Self {
            text: truncate_chars(text, MAX_SPEECH_INPUT_CHARS),
            voice: voice.to_string(),
            speed: DEFAULT_SPEECH_SPEED,
            format: "mp3".to_string(),
        }
    }
}

/// Result of a synthesis attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum SynthesisOutcome {
    /// Encoded audio in the requested format
    Audio(Bytes),
    /// The cloud path could not produce audio
    Unavailable(String),
}

/// Text-to-speech collaborator.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, request: &SpeechRequest) -> SynthesisOutcome;
}

/// OpenAI speech client.
#[derive(Debug, Clone)]
pub struct OpenAISpeech {
    client: reqwest::Client,
    endpoint: OpenAIEndpoint,
    model: String,
}

impl OpenAISpeech {
    pub fn new(client: reqwest::Client, endpoint: OpenAIEndpoint) -> Self {
        Self {
            client,
            endpoint,
            model: DEFAULT_SPEECH_MODEL.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn build_body(&self, request: &SpeechRequest) -> Value {
        json!({
            "model": self.model,
            "input": request.text,
            "voice": request.voice,
            "response_format": request.format,
            "speed": request.speed,
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAISpeech {
    async fn synthesize(&self, request: &SpeechRequest) -> SynthesisOutcome {
        if let Err(e) = self.endpoint.validate() {
            return SynthesisOutcome::Unavailable(e.to_string());
        }
        if request.text.trim().is_empty() {
            return SynthesisOutcome::Unavailable("Nothing to say".to_string());
        }

        let response = match self
            .client
            .post(self.endpoint.url("audio/speech"))
            .header("Authorization", self.endpoint.bearer())
            .json(&self.build_body(request))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Speech request failed: {}", e);
                return SynthesisOutcome::Unavailable(e.to_string());
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Speech synthesis rejected: {}", body);
            return SynthesisOutcome::Unavailable(format!("HTTP {status}"));
        }

        match response.bytes().await {
            Ok(audio) if !audio.is_empty() => {
                debug!(bytes = audio.len(), voice = %request.voice, "Speech synthesized");
                SynthesisOutcome::Audio(audio)
            }
            Ok(_) => SynthesisOutcome::Unavailable("Empty audio".to_string()),
            Err(e) => SynthesisOutcome::Unavailable(e.to_string()),
        }
    }
}
