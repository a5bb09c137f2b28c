//! Configuration validation.

use std::path::PathBuf;

use url::Url;

use super::{TlsConfig, TutorMode};

pub(super) fn validate_port(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    if port == 0 {
        return Err("PORT must be between 1 and 65535".into());
    }
    Ok(())
}

/// TLS needs both paths or neither.
pub(super) fn validate_tls(
    cert_path: Option<String>,
    key_path: Option<String>,
) -> Result<Option<TlsConfig>, Box<dyn std::error::Error>> {
    match (cert_path, key_path) {
        (Some(cert), Some(key)) => Ok(Some(TlsConfig {
            cert_path: PathBuf::from(cert),
            key_path: PathBuf::from(key),
        })),
        (None, None) => Ok(None),
        _ => Err("Both TLS_CERT_PATH and TLS_KEY_PATH must be set to enable TLS".into()),
    }
}

pub(super) fn validate_mode(mode: Option<&str>) -> Result<TutorMode, Box<dyn std::error::Error>> {
    match mode {
        None => Ok(TutorMode::default()),
        Some(raw) => TutorMode::parse(raw).ok_or_else(|| {
            format!("Invalid TUTOR_MODE '{raw}'. Expected 'turnbased' or 'realtime'").into()
        }),
    }
}

/// Provider endpoints must be absolute URLs with a host and one of `schemes`.
pub(super) fn validate_endpoint_url(
    name: &str,
    value: &str,
    schemes: &[&str],
) -> Result<(), Box<dyn std::error::Error>> {
    let url = Url::parse(value).map_err(|e| format!("Invalid {name} '{value}': {e}"))?;
    if !schemes.contains(&url.scheme()) {
        return Err(format!(
            "{name} must use {}, got '{}'",
            schemes.join(" or "),
            url.scheme()
        )
        .into());
    }
    if url.host_str().is_none() {
        return Err(format!("{name} must have a host").into());
    }
    Ok(())
}
