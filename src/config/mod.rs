//! Configuration module for the tutor gateway
//!
//! This module handles server configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use tutor_gateway::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config = ServerConfig::from_file(&PathBuf::from("config.yaml"))?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

mod env;
mod merge;
mod validation;
mod yaml;

pub use yaml::YamlConfig;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3001;

/// TLS configuration for HTTPS and WSS
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// How tabs converse with the tutor by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TutorMode {
    /// Recognize, ask the vision model, speak
    #[default]
    TurnBased,
    /// Continuous streaming through the realtime API
    Realtime,
}

impl TutorMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "turnbased" | "turn-based" | "turn_based" => Some(Self::TurnBased),
            "realtime" => Some(Self::Realtime),
            _ => None,
        }
    }
}

impl fmt::Display for TutorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TurnBased => write!(f, "turnbased"),
            Self::Realtime => write!(f, "realtime"),
        }
    }
}

/// Server configuration
///
/// Contains:
/// - Listen address and optional TLS
/// - OpenAI credentials and endpoint
/// - Tutor defaults (prompt, voice, mode) and model names
/// - CORS settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // TLS configuration (optional)
    pub tls: Option<TlsConfig>,

    // Provider settings
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    /// Realtime WebSocket endpoint, without the `model` query
    pub realtime_url: String,

    // Tutor defaults
    pub system_prompt: String,
    pub voice: String,
    pub mode: TutorMode,

    // Models
    pub realtime_model: String,
    pub vision_model: String,
    pub tts_model: String,

    /// CORS allowed origins (comma-separated list or "*" for all)
    pub cors_allowed_origins: Option<String>,
}

/// Zeroize secret fields when ServerConfig is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.openai_api_key {
            key.zeroize();
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables (and defaults).
    ///
    /// The .env file is loaded in main.rs before this runs.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        merge::merge_config(None)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        merge::merge_config(Some(yaml_config))
    }

    /// Get the server address as "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if TLS is enabled
    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    /// Resolve the OpenAI key for a request.
    ///
    /// A non-empty key supplied by the client wins over the server key.
    pub fn openai_api_key(&self, client_key: Option<&str>) -> Result<String, String> {
        if let Some(key) = client_key.map(str::trim).filter(|k| !k.is_empty()) {
            return Ok(key.to_string());
        }
        self.openai_api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                "OpenAI API key not configured. Set OPENAI_API_KEY or provide api_key".to_string()
            })
    }

    /// Human-readable summary with secrets redacted.
    pub fn summary(&self) -> String {
        let key = match &self.openai_api_key {
            Some(_) => "<set>",
            None => "<not set>",
        };
        let mut lines = vec![
            format!("address: {}", self.address()),
            format!("tls: {}", self.is_tls_enabled()),
            format!("openai_api_key: {key}"),
            format!("openai_base_url: {}", self.openai_base_url),
            format!("realtime_url: {}", self.realtime_url),
            format!("mode: {}", self.mode),
            format!("voice: {}", self.voice),
            format!("realtime_model: {}", self.realtime_model),
            format!("vision_model: {}", self.vision_model),
            format!("tts_model: {}", self.tts_model),
        ];
        if let Some(origins) = &self.cors_allowed_origins {
            lines.push(format!("cors_allowed_origins: {origins}"));
        }
        lines.join("\n")
    }
}
