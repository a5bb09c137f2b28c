//! Host-side collaborators of the tutor.
//!
//! The host is whatever renders the tutor for the student: a browser tab over
//! the `/tutor` socket in production, in-memory fakes in tests.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use super::conversation::Role;
use super::page::VisualSnapshot;
use crate::core::status::SessionStatus;

/// Speech recognition outcomes that end a listening phase without text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecognitionError {
    #[error("No speech detected")]
    NoSpeech,
    #[error("{0}")]
    Recognizer(String),
}

impl RecognitionError {
    /// Map a host recognizer error code (`no-speech`, `network`, ...).
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "" | "no-speech" | "no_speech" => Self::NoSpeech,
            other => Self::Recognizer(other.to_string()),
        }
    }
}

/// Playback of synthesized audio failed. Always swallowed by the tutor.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Playback failed: {0}")]
pub struct PlaybackError(pub String);

/// Captures what the student currently sees.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// A fresh capture, or `None` when the host cannot produce one.
    async fn capture(&self) -> Option<VisualSnapshot>;
}

/// Plays encoded (mp3) audio on the host.
#[async_trait]
pub trait SpeechOutput: Send + Sync {
    /// Resolves when playback finishes.
    async fn play(&self, audio: Bytes) -> Result<(), PlaybackError>;

    /// Halt playback immediately.
    fn stop(&self);
}

/// Host-local speech synthesis, used when cloud synthesis is unavailable.
#[async_trait]
pub trait LocalSpeech: Send + Sync {
    /// Resolves when speaking finishes or is cancelled.
    async fn speak(&self, text: &str);

    fn cancel(&self);
}

/// Status line and transcript presentation.
pub trait TutorUi: Send + Sync {
    fn status(&self, status: SessionStatus, message: &str);

    fn message(&self, role: Role, text: &str);

    /// Partial tutor transcript while realtime audio streams in.
    fn streaming_transcript(&self, delta: &str);
}
