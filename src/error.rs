//! Error types for smartplug-mcp.
//!
//! # Security Note
//!
//! Error messages are carefully crafted to NEVER include credentials.
//! Variants that wrap token or vendor failures carry descriptions only,
//! never the bearer token or refresh token values.

use std::path::PathBuf;

use thiserror::Error;

use crate::backend::auth::AuthError;

/// Errors that can occur during configuration operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read configuration file: {path}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration file could not be parsed.
    #[error("failed to parse configuration file: {path}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Configuration file not found.
    #[error("configuration file not found: {path}")]
    NotFound {
        /// Path where the configuration file was expected.
        path: PathBuf,
    },

    /// Configuration validation failed.
    #[error("configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation failure.
        message: String,
    },
}

/// Errors that stop the server process.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Reading from or writing to the transport failed.
    #[error("transport I/O failed: {0}")]
    Transport(#[from] std::io::Error),

    /// The configuration does not describe a usable setup.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The stored credential could not be loaded at startup.
    #[error("credential setup failed: {0}")]
    Credentials(#[from] AuthError),

    /// The vendor HTTP client could not be constructed.
    #[error("failed to build vendor API client: {message}")]
    Backend {
        /// Description of the failure.
        message: String,
    },
}
