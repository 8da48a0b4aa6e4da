//! Configuration file loading and parsing.
//!
//! This module handles loading the configuration file from disk and parsing
//! it into validated, type-safe structures.
//!
//! # Configuration File Locations
//!
//! The configuration file is searched in the following order:
//!
//! 1. Path given as the `CONFIG_FILE` CLI argument
//! 2. Default location:
//!    - **Linux/macOS:** `~/.smartplug-mcp/config.json`
//!    - **Windows:** `%USERPROFILE%\.smartplug-mcp\config.json`
//!
//! The stored OAuth credential defaults to `token.json` in the same directory.

mod settings;

pub use settings::{Config, LoggingConfig, VendorConfig};

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Returns the default configuration directory.
///
/// - **Linux/macOS:** `~/.smartplug-mcp/`
/// - **Windows:** `%USERPROFILE%\.smartplug-mcp\`
#[must_use]
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|p| p.join(".smartplug-mcp"))
}

/// Returns the platform-specific default configuration file path.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    default_config_dir().map(|p| p.join("config.json"))
}

/// Returns the platform-specific default credential file path.
#[must_use]
pub fn default_credentials_path() -> Option<PathBuf> {
    default_config_dir().map(|p| p.join("token.json"))
}

/// Resolves the credential file path from the config, falling back to the default.
///
/// # Errors
///
/// Returns an error if no path is configured and no home directory is available.
pub fn credentials_path(config: &Config) -> Result<PathBuf, ConfigError> {
    config
        .credentials_path
        .clone()
        .or_else(default_credentials_path)
        .ok_or_else(|| ConfigError::ValidationError {
            message: "credentials_path is not set and no home directory is available".to_string(),
        })
}

/// Loads and parses the configuration file.
///
/// If `path` is `None`, uses the platform-specific default location.
///
/// # Errors
///
/// Returns an error if:
/// - The configuration file cannot be found
/// - The file cannot be read
/// - The JSON is malformed
/// - Required fields are missing or invalid
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let config_path = match path {
        Some(p) => p.to_path_buf(),
        None => default_config_path().ok_or_else(|| ConfigError::NotFound {
            path: PathBuf::from("<default config path>"),
        })?,
    };

    if !config_path.exists() {
        return Err(ConfigError::NotFound { path: config_path });
    }

    let contents = std::fs::read_to_string(&config_path).map_err(|e| ConfigError::ReadError {
        path: config_path.clone(),
        source: e,
    })?;

    let config: Config = serde_json::from_str(&contents).map_err(|e| ConfigError::ParseError {
        path: config_path.clone(),
        source: e,
    })?;

    config.validate()?;

    Ok(config)
}
