//! Shared application state.

use std::sync::Arc;
use std::time::Duration;

use crate::config::ServerConfig;
use crate::core::realtime::SessionRegistry;
use crate::core::services::{
    OpenAIEndpoint, OpenAISpeech, OpenAITranscriber, OpenAIVisionChat,
};
use crate::errors::{AppError, AppResult};

/// Timeout for REST calls to the cloud collaborators.
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// State shared by every request and socket.
pub struct AppState {
    pub config: ServerConfig,
    /// One realtime session per connected tab
    pub registry: SessionRegistry,
    pub http: reqwest::Client,
}

impl AppState {
    pub async fn new(config: ServerConfig) -> Arc<Self> {
        Self::with_registry(config, SessionRegistry::default())
    }

    /// Build state around a specific registry (tests inject fake connectors).
    pub fn with_registry(config: ServerConfig, registry: SessionRegistry) -> Arc<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Arc::new(Self {
            config,
            registry,
            http,
        })
    }

    /// OpenAI credentials for a request, preferring the client's own key.
    pub fn openai_endpoint(&self, client_key: Option<&str>) -> AppResult<OpenAIEndpoint> {
        let key = self
            .config
            .openai_api_key(client_key)
            .map_err(AppError::MissingCredentials)?;
        Ok(OpenAIEndpoint::new(key).with_base_url(self.config.openai_base_url.as_str()))
    }

    pub fn vision(&self, client_key: Option<&str>) -> AppResult<OpenAIVisionChat> {
        Ok(
            OpenAIVisionChat::new(self.http.clone(), self.openai_endpoint(client_key)?)
                .with_model(self.config.vision_model.as_str()),
        )
    }

    pub fn transcriber(&self, client_key: Option<&str>) -> AppResult<OpenAITranscriber> {
        Ok(OpenAITranscriber::new(
            self.http.clone(),
            self.openai_endpoint(client_key)?,
        ))
    }

    pub fn speech(&self, client_key: Option<&str>) -> AppResult<OpenAISpeech> {
        Ok(
            OpenAISpeech::new(self.http.clone(), self.openai_endpoint(client_key)?)
                .with_model(self.config.tts_model.as_str()),
        )
    }
}
