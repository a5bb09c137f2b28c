//! Environment variable loading.

use std::env;

/// Raw values read from the environment. Unset or empty variables are `None`.
#[derive(Debug, Clone, Default)]
pub(super) struct EnvConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tls_cert_path: Option<String>,
    pub tls_key_path: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub realtime_url: Option<String>,
    pub system_prompt: Option<String>,
    pub voice: Option<String>,
    pub mode: Option<String>,
    pub realtime_model: Option<String>,
    pub vision_model: Option<String>,
    pub tts_model: Option<String>,
    pub cors_allowed_origins: Option<String>,
}

impl EnvConfig {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let port = match var("PORT") {
            Some(raw) => Some(
                raw.parse::<u16>()
                    .map_err(|e| format!("Invalid PORT value '{raw}': {e}"))?,
            ),
            None => None,
        };

        Ok(Self {
            host: var("HOST"),
            port,
            tls_cert_path: var("TLS_CERT_PATH"),
            tls_key_path: var("TLS_KEY_PATH"),
            openai_api_key: var("OPENAI_API_KEY"),
            openai_base_url: var("OPENAI_BASE_URL"),
            realtime_url: var("REALTIME_URL"),
            system_prompt: var("TUTOR_SYSTEM_PROMPT"),
            voice: var("TUTOR_VOICE"),
            mode: var("TUTOR_MODE"),
            realtime_model: var("REALTIME_MODEL"),
            vision_model: var("VISION_MODEL"),
            tts_model: var("TTS_MODEL"),
            cors_allowed_origins: var("CORS_ALLOWED_ORIGINS"),
        })
    }
}

fn var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
