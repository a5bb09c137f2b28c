//! Merge YAML overrides onto environment values and defaults.

use super::env::EnvConfig;
use super::validation;
use super::yaml::YamlConfig;
use super::{DEFAULT_HOST, DEFAULT_PORT, ServerConfig};
use crate::core::realtime::openai::{DEFAULT_REALTIME_MODEL, OPENAI_REALTIME_URL};
use crate::core::services::OPENAI_API_BASE;
use crate::core::services::speech::{DEFAULT_SPEECH_MODEL, DEFAULT_SPEECH_VOICE};
use crate::core::services::vision::DEFAULT_VISION_MODEL;
use crate::core::tutor::prompt::DEFAULT_SYSTEM_PROMPT;

/// Build the final configuration. Priority: YAML > environment > defaults.
pub(super) fn merge_config(
    yaml: Option<YamlConfig>,
) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let env = EnvConfig::load()?;
    let yaml = yaml.unwrap_or_default();

    let server = yaml.server.unwrap_or_default();
    let tls = server.tls.unwrap_or_default();
    let providers = yaml.providers.unwrap_or_default();
    let tutor = yaml.tutor.unwrap_or_default();
    let models = yaml.models.unwrap_or_default();
    let security = yaml.security.unwrap_or_default();

    let port = server.port.or(env.port).unwrap_or(DEFAULT_PORT);
    validation::validate_port(port)?;

    let tls = validation::validate_tls(
        tls.cert_path.or(env.tls_cert_path),
        tls.key_path.or(env.tls_key_path),
    )?;

    let mode = validation::validate_mode(tutor.mode.or(env.mode).as_deref())?;

    let openai_base_url = providers
        .openai_base_url
        .or(env.openai_base_url)
        .unwrap_or_else(|| OPENAI_API_BASE.to_string());
    validation::validate_endpoint_url("OPENAI_BASE_URL", &openai_base_url, &["http", "https"])?;

    let realtime_url = providers
        .realtime_url
        .or(env.realtime_url)
        .unwrap_or_else(|| OPENAI_REALTIME_URL.to_string());
    validation::validate_endpoint_url("REALTIME_URL", &realtime_url, &["ws", "wss"])?;

    Ok(ServerConfig {
        host: server
            .host
            .or(env.host)
            .unwrap_or_else(|| DEFAULT_HOST.to_string()),
        port,
        tls,
        openai_api_key: providers.openai_api_key.or(env.openai_api_key),
        openai_base_url,
        realtime_url,
        system_prompt: tutor
            .system_prompt
            .or(env.system_prompt)
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        voice: tutor
            .voice
            .or(env.voice)
            .unwrap_or_else(|| DEFAULT_SPEECH_VOICE.to_string()),
        mode,
        realtime_model: models
            .realtime
            .or(env.realtime_model)
            .unwrap_or_else(|| DEFAULT_REALTIME_MODEL.to_string()),
        vision_model: models
            .vision
            .or(env.vision_model)
            .unwrap_or_else(|| DEFAULT_VISION_MODEL.to_string()),
        tts_model: models
            .tts
            .or(env.tts_model)
            .unwrap_or_else(|| DEFAULT_SPEECH_MODEL.to_string()),
        cors_allowed_origins: security.cors_allowed_origins.or(env.cors_allowed_origins),
    })
}
