//! Configuration loading and management
//!
//! Loads the JSON configuration file and applies environment-variable
//! overrides. A missing file is tolerated by the caller (the server can
//! run entirely on defaults), but a file that exists and fails to parse
//! is an error.

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

    debug!("Loading configuration from {:?}", path);

    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let contents = std::fs::read_to_string(path)?;

    let config: Config = serde_json::from_str(&contents)
        .map_err(|e| ConfigError::ParseError(format!("Failed to parse JSON: {e} at {path:?}")))?;

    config.validate()?;

    info!(
        "Configuration loaded: sources [{}], cache size {}",
        config.enabled_sources().join(", "),
        config.server.cache.size
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
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    config.validate()?;

    Ok(config)
}

/// Load configuration with environment variable overrides
///
/// Environment variables:
/// - `CHAIN_DNS_ADDR`: Override the UDP bind address
/// - `CHAIN_DNS_LOG_LEVEL`: Override the log level
///
/// # Errors
///
/// Returns `ConfigError` if loading, parsing or re-validation fails.
pub fn load_config_with_env(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let mut config = load_config(path)?;
    apply_env_overrides(&mut config)?;
    Ok(config)
}

/// Apply environment-variable overrides to an already-loaded configuration
///
/// # Errors
///
/// Returns `ConfigError::EnvError` for malformed override values.
pub fn apply_env_overrides(config: &mut Config) -> Result<(), ConfigError> {
    if let Ok(addr) = std::env::var("CHAIN_DNS_ADDR") {
        config.server.addr = addr.clone();
        debug!("Bind address overridden to {}", addr);
    }

    if let Ok(level) = std::env::var("CHAIN_DNS_LOG_LEVEL") {
        config.log.level = level.clone();
        debug!("Log level overridden to {}", level);
    }

    config.validate()?;
    Ok(())
}

/// Render the default configuration as pretty JSON
///
/// Used by the `--generate-config` command-line flag.
#[must_use]
pub fn default_config_json() -> String {
    // Defaults always serialize
    serde_json::to_string_pretty(&Config::default()).unwrap_or_else(|_| "{}".to_string())
}
