//! Cloud collaborators used by the turn-based tutor.
//!
//! Each collaborator is a trait so the turn controller can be driven by test
//! doubles; the OpenAI implementations here are thin `reqwest` clients.
//!
//! - `vision`: chat completions with screenshots attached to user turns
//! - `transcription`: Whisper transcription of recorded speech
//! - `speech`: text-to-speech with a non-fatal failure signal

pub mod speech;
pub mod transcription;
pub mod vision;

use serde::Deserialize;
use thiserror::Error;
use zeroize::Zeroize;

pub use speech::{
    MAX_SPEECH_INPUT_CHARS, OpenAISpeech, SpeechRequest, SpeechSynthesizer, SynthesisOutcome,
};
pub use transcription::{AudioUpload, OpenAITranscriber, Transcriber};
pub use vision::{OpenAIVisionChat, VisionChat};

/// Default OpenAI REST base URL.
pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// Errors returned by the vision and transcription collaborators.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ServiceError {
    /// The service answered with an error payload
    #[error("{message}")]
    Upstream { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Credentials and endpoint for OpenAI REST calls.
#[derive(Clone)]
pub struct OpenAIEndpoint {
    pub api_key: String,
    pub base_url: String,
}

impl OpenAIEndpoint {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: OPENAI_API_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    pub(crate) fn bearer(&self) -> String {
        format!("Bearer {}", self.api_key)
    }

    pub(crate) fn validate(&self) -> Result<(), ServiceError> {
        if self.api_key.trim().is_empty() {
            return Err(ServiceError::Configuration(
                "OpenAI API key is required".to_string(),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for OpenAIEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIEndpoint")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl Drop for OpenAIEndpoint {
    fn drop(&mut self) {
        self.api_key.zeroize();
    }
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorResponse {
    error: OpenAIErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorDetail {
    message: String,
}

/// Turn a non-success response body into a [`ServiceError::Upstream`].
pub(crate) fn upstream_error(status: reqwest::StatusCode, body: &str, fallback: &str) -> ServiceError {
    let message = serde_json::from_str::<OpenAIErrorResponse>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| fallback.to_string());
    ServiceError::Upstream {
        status: status.as_u16(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_join() {
        let endpoint = OpenAIEndpoint::new("sk").with_base_url("http://localhost:9/v1/");
        assert_eq!(endpoint.url("audio/speech"), "http://localhost:9/v1/audio/speech");
    }

    #[test]
    fn test_debug_redacts_key() {
        let endpoint = OpenAIEndpoint::new("sk-secret");
        assert!(!format!("{endpoint:?}").contains("sk-secret"));
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(matches!(
            OpenAIEndpoint::new(" ").validate(),
            Err(ServiceError::Configuration(_))
        ));
    }

    #[test]
    fn test_upstream_error_parses_message() {
        let err = upstream_error(
            reqwest::StatusCode::UNAUTHORIZED,
            r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error"}}"#,
            "OpenAI API request failed",
        );
        assert_eq!(
            err,
            ServiceError::Upstream {
                status: 401,
                message: "Incorrect API key provided".into()
            }
        );
    }

    #[test]
    fn test_upstream_error_fallback() {
        let err = upstream_error(reqwest::StatusCode::BAD_GATEWAY, "<html>", "request failed");
        assert_eq!(err.to_string(), "request failed");
    }
}
