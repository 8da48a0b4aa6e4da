//! Configuration structures for deserialisation.
//!
//! These structures map directly to the JSON configuration file format.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Root configuration structure.
///
/// This is the top-level structure that matches the JSON config file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Optional JSON schema reference (ignored during parsing).
    #[serde(rename = "$schema", default)]
    _schema: Option<String>,

    /// Optional comment field (ignored during parsing).
    #[serde(rename = "_comment", default)]
    _comment: Option<String>,

    /// Vendor device API settings.
    pub vendor: VendorConfig,

    /// Path to the stored OAuth credential file.
    ///
    /// Defaults to `token.json` next to the configuration file's default location.
    #[serde(default)]
    pub credentials_path: Option<PathBuf>,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation checks fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.vendor.validate()
    }
}

/// Vendor device API configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VendorConfig {
    /// Project (enterprise) identifier the devices are scoped to.
    pub project_id: String,

    /// Base URL of the device API.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Device types that count as smart plugs.
    #[serde(default = "default_plug_types")]
    pub plug_types: Vec<String>,

    /// Whole-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Connection establishment timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl VendorConfig {
    /// Creates a vendor configuration with defaults for everything but the project.
    #[must_use]
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            api_base_url: default_api_base_url(),
            plug_types: default_plug_types(),
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }

    /// Request timeout as a [`Duration`].
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Connect timeout as a [`Duration`].
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.project_id.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                message: "vendor.project_id must not be empty".to_string(),
            });
        }

        let url = reqwest::Url::parse(&self.api_base_url).map_err(|e| {
            ConfigError::ValidationError {
                message: format!("Invalid vendor.api_base_url '{}': {e}", self.api_base_url),
            }
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::ValidationError {
                message: format!(
                    "Invalid vendor.api_base_url scheme '{}'. Must be http or https",
                    url.scheme()
                ),
            });
        }

        if self.plug_types.is_empty() {
            return Err(ConfigError::ValidationError {
                message: "vendor.plug_types must list at least one device type".to_string(),
            });
        }

        if self.request_timeout_secs == 0 || self.connect_timeout_secs == 0 {
            return Err(ConfigError::ValidationError {
                message: "vendor timeouts must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

fn default_api_base_url() -> String {
    "https://smartdevicemanagement.googleapis.com/v1".to_string()
}

fn default_plug_types() -> Vec<String> {
    vec![
        "sdm.devices.types.OUTLET".to_string(),
        "sdm.devices.types.SMART_PLUG".to_string(),
    ]
}

const fn default_request_timeout() -> u64 {
    30
}

const fn default_connect_timeout() -> u64 {
    10
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}
