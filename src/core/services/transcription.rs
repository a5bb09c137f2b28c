//! Whisper transcription of recorded speech.
//!
//! - Endpoint: `POST {base}/audio/transcriptions` (multipart)
//! - Browser recordings are forwarded as `audio.webm`; PCM16 captured by the
//!   gateway is wrapped in a WAV container first.

use std::io::Cursor;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::info;

use super::{OpenAIEndpoint, ServiceError, upstream_error};

pub const WHISPER_MODEL: &str = "whisper-1";

/// One audio file to transcribe.
#[derive(Debug, Clone)]
pub struct AudioUpload {
    pub data: Bytes,
    pub file_name: String,
    pub mime_type: String,
}

impl AudioUpload {
    /// A browser `MediaRecorder` blob.
    pub fn webm(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            file_name: "audio.webm".to_string(),
            mime_type: "audio/webm".to_string(),
        }
    }

    /// Mono PCM16 little-endian samples wrapped as a WAV file.
    pub fn wav_from_pcm16(pcm: &[u8], sample_rate: u32) -> Result<Self, ServiceError> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::with_capacity(pcm.len() + 44));
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)
                .map_err(|e| ServiceError::Configuration(format!("WAV writer: {e}")))?;
            for pair in pcm.chunks_exact(2) {
                writer
                    .write_sample(i16::from_le_bytes([pair[0], pair[1]]))
                    .map_err(|e| ServiceError::Configuration(format!("WAV encode: {e}")))?;
            }
            writer
                .finalize()
                .map_err(|e| ServiceError::Configuration(format!("WAV finalize: {e}")))?;
        }
        Ok(Self {
            data: Bytes::from(cursor.into_inner()),
            file_name: "audio.wav".to_string(),
            mime_type: "audio/wav".to_string(),
        })
    }
}

/// Speech-to-text collaborator.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: AudioUpload) -> Result<String, ServiceError>;
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// OpenAI Whisper client.
#[derive(Debug, Clone)]
pub struct OpenAITranscriber {
    client: reqwest::Client,
    endpoint: OpenAIEndpoint,
}

impl OpenAITranscriber {
    pub fn new(client: reqwest::Client, endpoint: OpenAIEndpoint) -> Self {
        Self { client, endpoint }
    }
}

#[async_trait]
impl Transcriber for OpenAITranscriber {
    async fn transcribe(&self, audio: AudioUpload) -> Result<String, ServiceError> {
        self.endpoint.validate()?;
        if audio.data.is_empty() {
            return Err(ServiceError::Configuration("Audio is empty".to_string()));
        }

        let size = audio.data.len();
        let file_part = Part::bytes(audio.data.to_vec())
            .file_name(audio.file_name)
            .mime_str(&audio.mime_type)
            .map_err(|e| ServiceError::Configuration(format!("Invalid MIME type: {e}")))?;
        let form = Form::new()
            .part("file", file_part)
            .text("model", WHISPER_MODEL);

        let response = self
            .client
            .post(self.endpoint.url("audio/transcriptions"))
            .header("Authorization", self.endpoint.bearer())
            .multipart(form)
            .send()
            .await
            .map_err(|e| ServiceError::Network(format!("Request failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ServiceError::Network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(upstream_error(status, &text, "Whisper API request failed"));
        }

        let parsed: TranscriptionResponse = serde_json::from_str(&text)
            .map_err(|e| ServiceError::InvalidResponse(e.to_string()))?;
        info!(bytes = size, chars = parsed.text.len(), "Transcription complete");
        Ok(parsed.text)
    }
}
