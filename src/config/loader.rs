//! Configuration loading

use std::path::Path;

use tracing::{debug, info};

use super::types::Config;
use crate::error::ConfigError;

/// Load configuration from a JSON file
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed or validated.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    debug!("loading configuration from {:?}", path);

    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let contents = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&contents)
        .map_err(|e| ConfigError::Parse(format!("failed to parse JSON: {e} at {path:?}")))?;

    config.validate()?;

    info!(
        listeners = config.dns.server.addrs.len(),
        upstream = %config.dns.client.addr,
        direct_dev = %config.checker.direct_dev,
        vpn_dev = %config.checker.vpn_dev,
        "configuration loaded"
    );
    Ok(config)
}

/// Load configuration from a JSON string
///
/// # Errors
///
/// Returns `ConfigError` if parsing or validation fails.
pub fn load_config_str(json: &str) -> Result<Config, ConfigError> {
    let config: Config =
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

/// Load configuration with environment variable overrides
///
/// Environment variables:
/// - `CLEARWAY_LOG_LEVEL`: override the log level
/// - `CLEARWAY_UPSTREAM`: override the DNS upstream URI
///
/// # Errors
///
/// Returns `ConfigError` if loading, parsing or re-validation fails.
pub fn load_config_with_env(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let mut config = load_config(path)?;

    if let Ok(level) = std::env::var("CLEARWAY_LOG_LEVEL") {
        debug!("log level overridden to {}", level);
        config.log.level = level;
    }

    if let Ok(upstream) = std::env::var("CLEARWAY_UPSTREAM") {
        debug!("upstream overridden to {}", upstream);
        config.dns.client.addr = upstream;
        config.validate()?;
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_reported() {
        let err = load_config("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn invalid_json_is_reported() {
        let err = load_config_str("{ nope").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn valid_document_loads() {
        let config = load_config_str(
            r#"{ "checker": { "direct_dev": "eth0", "vpn_dev": "tun0" } }"#,
        )
        .unwrap();
        assert_eq!(config.checker.direct_dev, "eth0");
    }
}
