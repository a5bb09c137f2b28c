//! Vision-grounded chat completions.
//!
//! - Endpoint: `POST {base}/chat/completions`
//! - The system instructions go first; a user turn that carries a snapshot is sent
//!   as `[text, image_url]` content parts with `detail: high` so small text and
//!   digits stay legible.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use super::{OpenAIEndpoint, ServiceError, upstream_error};
use crate::core::tutor::conversation::{Role, Turn};

pub const DEFAULT_VISION_MODEL: &str = "gpt-4o";
const VISION_MAX_TOKENS: u32 = 200;
const VISION_TEMPERATURE: f32 = 0.3;

/// Chat collaborator that can see the student's screen.
#[async_trait]
pub trait VisionChat: Send + Sync {
    /// Generate the next assistant message for `turns` under `instructions`.
    async fn chat(&self, instructions: &str, turns: &[Turn]) -> Result<String, ServiceError>;
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// OpenAI chat completions client.
#[derive(Debug, Clone)]
pub struct OpenAIVisionChat {
    client: reqwest::Client,
    endpoint: OpenAIEndpoint,
    model: String,
}

impl OpenAIVisionChat {
    pub fn new(client: reqwest::Client, endpoint: OpenAIEndpoint) -> Self {
        Self {
            client,
            endpoint,
            model: DEFAULT_VISION_MODEL.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Build the JSON request body.
    pub fn build_body(&self, instructions: &str, turns: &[Turn]) -> Value {
        let mut messages = Vec::with_capacity(turns.len() + 1);
        messages.push(json!({ "role": "system", "content": instructions }));

        for turn in turns {
            match (turn.role(), turn.snapshot()) {
                (Role::User, Some(snapshot)) => messages.push(json!({
                    "role": "user",
                    "content": [
                        { "type": "text", "text": turn.content() },
                        {
                            "type": "image_url",
                            "image_url": { "url": snapshot.image_url, "detail": "high" }
                        }
                    ]
                })),
                (role, _) => messages.push(json!({
                    "role": role.to_string(),
                    "content": turn.content()
                })),
            }
        }

        json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": VISION_MAX_TOKENS,
            "temperature": VISION_TEMPERATURE,
        })
    }
}

#[async_trait]
impl VisionChat for OpenAIVisionChat {
    async fn chat(&self, instructions: &str, turns: &[Turn]) -> Result<String, ServiceError> {
        self.endpoint.validate()?;
        let body = self.build_body(instructions, turns);
        debug!(turns = turns.len(), model = %self.model, "Calling vision chat");

        let response = self
            .client
            .post(self.endpoint.url("chat/completions"))
            .header("Authorization", self.endpoint.bearer())
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::Network(format!("Request failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ServiceError::Network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(upstream_error(status, &text, "OpenAI API request failed"));
        }

        let completion: ChatCompletion = serde_json::from_str(&text)
            .map_err(|e| ServiceError::InvalidResponse(e.to_string()))?;
        let reply = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ServiceError::InvalidResponse("Empty completion".to_string()))?;

        info!(chars = reply.len(), "Vision chat reply received");
        Ok(reply)
    }
}
