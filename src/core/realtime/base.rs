//! Base types for realtime tutoring sessions.
//!
//! A realtime session is one persistent bidirectional connection to the
//! provider, owned by exactly one conversational endpoint (one browser tab).
//!
//! # Audio Format
//!
//! PCM 16-bit signed little-endian at 24kHz, base64 encoded in JSON frames.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::core::tutor::page::{PAGE_UNREADABLE_MESSAGE, PageContent};

/// Deadline for the realtime connect handshake.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Error Types
// =============================================================================

/// Errors reported to the initiator of a realtime session.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RealtimeError {
    /// Handshake with the provider failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Transport did not open before the deadline
    #[error("Connection timed out after {}s", .0.as_secs())]
    ConnectionTimeout(Duration),

    /// The endpoint was stopped or restarted while connecting
    #[error("Session start was cancelled")]
    Cancelled,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Page has neither a screenshot nor enough text to ground the tutor
    #[error("{}", PAGE_UNREADABLE_MESSAGE)]
    PageContentUnavailable,

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl RealtimeError {
    /// Stable machine-readable code for clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConnectionFailed(_) => "connection_failed",
            Self::ConnectionTimeout(_) => "connection_timeout",
            Self::Cancelled => "cancelled",
            Self::InvalidConfiguration(_) => "invalid_configuration",
            Self::PageContentUnavailable => "page_unreadable",
            Self::SerializationError(_) => "serialization_error",
        }
    }
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Identity and State
// =============================================================================

/// One independent conversation (one browser tab).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointId(String);

impl EndpointId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random endpoint id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EndpointId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Lifecycle of one realtime session. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Connecting,
    Open,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Everything needed to open a realtime session for one endpoint.
#[derive(Clone)]
pub struct RealtimeStartConfig {
    /// Provider API key, presented through the WebSocket sub-protocol
    pub api_key: String,
    /// Realtime model name
    pub model: String,
    /// Base URL of the realtime WebSocket endpoint (without query)
    pub url: String,
    /// Tutor base prompt
    pub system_prompt: String,
    /// Page the student is viewing
    pub page: PageContent,
    /// Requested voice before compatibility remapping
    pub voice: Option<String>,
}

impl RealtimeStartConfig {
    pub fn new(api_key: impl Into<String>, page: PageContent) -> Self {
        Self {
            api_key: api_key.into(),
            model: super::openai::config::DEFAULT_REALTIME_MODEL.to_string(),
            url: super::openai::config::OPENAI_REALTIME_URL.to_string(),
            system_prompt: String::new(),
            page: page.normalized(),
            voice: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_voice(mut self, voice: Option<String>) -> Self {
        self.voice = voice;
        self
    }

    /// Check the configuration before any network activity.
    pub fn validate(&self) -> RealtimeResult<()> {
        if self.api_key.trim().is_empty() {
            return Err(RealtimeError::InvalidConfiguration(
                "API key is required".to_string(),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(RealtimeError::InvalidConfiguration(
                "Model is required".to_string(),
            ));
        }
        if !self.page.is_readable() {
            return Err(RealtimeError::PageContentUnavailable);
        }
        Ok(())
    }
}

impl fmt::Debug for RealtimeStartConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeStartConfig")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("url", &self.url)
            .field("voice", &self.voice)
            .field("page_title", &self.page.title)
            .finish()
    }
}

// =============================================================================
// Event Delivery
// =============================================================================

/// Consumer of provider events for one endpoint (its UI).
pub trait EventSink: Send + Sync {
    /// Deliver one inbound provider event verbatim.
    fn deliver(&self, endpoint: &EndpointId, event: Value);

    /// The session closed on its own (transport error or remote close).
    fn closed(&self, _endpoint: &EndpointId, _reason: &str) {}
}

/// Notices produced by a channel-backed [`EventSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotice {
    Event(Value),
    Closed(String),
}

impl EventSink for mpsc::UnboundedSender<SessionNotice> {
    fn deliver(&self, _endpoint: &EndpointId, event: Value) {
        let _ = self.send(SessionNotice::Event(event));
    }

    fn closed(&self, _endpoint: &EndpointId, reason: &str) {
        let _ = self.send(SessionNotice::Closed(reason.to_string()));
    }
}
