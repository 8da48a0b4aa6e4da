//! Device backend seam.
//!
//! The rest of the crate talks to smart plugs only through [`DeviceBackend`].
//! Production uses [`sdm::SdmBackend`], which calls the vendor cloud API with
//! a bearer credential from an [`auth::Authenticator`]; tests substitute an
//! in-memory fake.
//!
//! Every call returns freshly built [`DeviceSnapshot`]s. Nothing is cached:
//! a plug can be switched from a wall button or the vendor app at any time.

pub mod auth;
pub mod sdm;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

/// On/off and connectivity state of a plug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlugState {
    /// Whether the outlet is switched on.
    pub on: bool,
    /// Whether the vendor cloud currently reaches the plug.
    pub online: bool,
}

/// A point-in-time view of one plug.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceSnapshot {
    /// Vendor device identifier.
    pub id: String,
    /// Display name (custom name, falling back to the identifier).
    pub name: String,
    /// Current state.
    pub state: PlugState,
}

/// Acknowledgement of an accepted on/off command.
///
/// The vendor acknowledges the command; the physical relay may lag behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetAck {
    /// Device the command was sent to.
    pub device_id: String,
    /// Requested state.
    pub on: bool,
}

/// Errors raised by a device backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The vendor reports no device with this identifier.
    #[error("device not found: {device_id}")]
    NotFound {
        /// Identifier supplied by the caller.
        device_id: String,
    },

    /// No valid bearer credential could be obtained.
    #[error("authentication with the device API failed: {message}")]
    Unauthorized {
        /// Description of the failure (never contains token values).
        message: String,
    },

    /// The vendor API answered with a non-success status.
    #[error("device API error (HTTP {status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message extracted from the response body.
        message: String,
    },

    /// The request never produced a response (DNS, connect, timeout, TLS).
    #[error("device API request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The vendor response could not be interpreted.
    #[error("unexpected device API response: {message}")]
    Decode {
        /// Description of what was wrong.
        message: String,
    },
}

impl BackendError {
    /// Returns `true` if the caller cited an unknown device.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Diagnostic payload attached to protocol errors.
    ///
    /// Clients should not branch on this; it exists for humans reading logs.
    #[must_use]
    pub fn diagnostics(&self) -> Value {
        match self {
            Self::NotFound { device_id } => json!({ "kind": "not_found", "deviceId": device_id }),
            Self::Unauthorized { message } => json!({ "kind": "unauthorized", "detail": message }),
            Self::Api { status, message } => {
                json!({ "kind": "api", "status": status, "detail": message })
            }
            Self::Request(e) => json!({
                "kind": "request",
                "timeout": e.is_timeout(),
                "detail": e.to_string(),
            }),
            Self::Decode { message } => json!({ "kind": "decode", "detail": message }),
        }
    }
}

/// Access to the smart plugs of one account.
#[async_trait]
pub trait DeviceBackend: Send + Sync {
    /// Lists every plug visible to the account. An account with no plugs
    /// yields an empty vector.
    async fn list(&self) -> Result<Vec<DeviceSnapshot>, BackendError>;

    /// Fetches one plug.
    async fn get(&self, device_id: &str) -> Result<DeviceSnapshot, BackendError>;

    /// Sends an on/off command. Does not read the state back.
    async fn set(&self, device_id: &str, on: bool) -> Result<SetAck, BackendError>;
}
