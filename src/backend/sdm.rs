//! Smart Device Management (SDM) REST client.
//!
//! [`SdmBackend`] wraps `reqwest::Client` and implements [`DeviceBackend`]
//! against the vendor's device API:
//!
//! | Operation | Endpoint                                               |
//! |-----------|--------------------------------------------------------|
//! | `list`    | `GET  /enterprises/{project}/devices`                  |
//! | `get`     | `GET  /enterprises/{project}/devices/{id}`             |
//! | `set`     | `POST /enterprises/{project}/devices/{id}:executeCommand` |
//!
//! ## Authentication
//!
//! Every request carries a bearer credential. A 401 triggers exactly one
//! credential refresh and one replay; the rejected request never reached the
//! device, so replaying it cannot double-actuate a plug. Other failures are
//! returned as-is and never retried here.
//!
//! ## Normalisation
//!
//! Vendor records are projected onto [`DeviceSnapshot`]:
//! `name` from the Info trait's custom name (falling back to the device id),
//! `on` from the OnOff trait (default `false`), `online` from the
//! Connectivity trait being `"ONLINE"`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::backend::auth::{Authenticator, Credential};
use crate::backend::{BackendError, DeviceBackend, DeviceSnapshot, PlugState, SetAck};
use crate::config::VendorConfig;

const INFO_TRAIT: &str = "sdm.devices.traits.Info";
const ON_OFF_TRAIT: &str = "sdm.devices.traits.OnOff";
const CONNECTIVITY_TRAIT: &str = "sdm.devices.traits.Connectivity";
const SET_ON_OFF_COMMAND: &str = "sdm.devices.commands.OnOff.SetOnOff";
const ONLINE: &str = "ONLINE";

/// A device record as returned by the vendor API.
#[derive(Debug, Deserialize)]
struct VendorDevice {
    /// Resource name: `enterprises/{project}/devices/{id}`.
    name: String,
    #[serde(rename = "type", default)]
    device_type: String,
    #[serde(default)]
    traits: Map<String, Value>,
}

impl VendorDevice {
    fn device_id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    fn to_snapshot(&self) -> DeviceSnapshot {
        let id = self.device_id().to_string();

        let name = self
            .traits
            .get(INFO_TRAIT)
            .and_then(|info| info.get("customName"))
            .and_then(Value::as_str)
            .filter(|name| !name.trim().is_empty())
            .map_or_else(|| id.clone(), String::from);

        let on = self
            .traits
            .get(ON_OFF_TRAIT)
            .and_then(|trait_value| trait_value.get("on"))
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let online = self
            .traits
            .get(CONNECTIVITY_TRAIT)
            .and_then(|trait_value| trait_value.get("status"))
            .and_then(Value::as_str)
            == Some(ONLINE);

        DeviceSnapshot {
            id,
            name,
            state: PlugState { on, online },
        }
    }
}

#[derive(Debug, Deserialize)]
struct DeviceList {
    #[serde(default)]
    devices: Vec<VendorDevice>,
}

/// [`DeviceBackend`] backed by the vendor cloud API.
pub struct SdmBackend {
    http: reqwest::Client,
    base_url: reqwest::Url,
    project_id: String,
    plug_types: Vec<String>,
    auth: Arc<dyn Authenticator>,
}

impl SdmBackend {
    /// Creates a backend from vendor configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is invalid or the HTTP client cannot
    /// be built.
    pub fn new(config: &VendorConfig, auth: Arc<dyn Authenticator>) -> Result<Self, BackendError> {
        let base_url = reqwest::Url::parse(config.api_base_url.trim_end_matches('/')).map_err(
            |e| BackendError::Decode {
                message: format!("invalid API base URL: {e}"),
            },
        )?;
        if base_url.cannot_be_a_base() {
            return Err(BackendError::Decode {
                message: "API base URL cannot carry a path".to_string(),
            });
        }

        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            http,
            base_url,
            project_id: config.project_id.clone(),
            plug_types: config.plug_types.clone(),
            auth,
        })
    }

    /// Builds `{base}/enterprises/{project}/devices[/{last}]` with each
    /// segment percent-encoded.
    fn devices_url(&self, last: Option<&str>) -> reqwest::Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .push("enterprises")
                .push(&self.project_id)
                .push("devices");
            if let Some(last) = last {
                segments.push(last);
            }
        }
        url
    }

    fn is_plug(&self, device: &VendorDevice) -> bool {
        self.plug_types.iter().any(|t| *t == device.device_type)
    }

    /// Sends a request built by `build`, refreshing the credential once on 401.
    async fn send_authorized<F>(&self, build: F) -> Result<reqwest::Response, BackendError>
    where
        F: Fn(&Credential) -> reqwest::RequestBuilder + Send + Sync,
    {
        let credential = self.auth.bearer().await.map_err(unauthorized)?;
        let resp = build(&credential).send().await?;

        if resp.status() != reqwest::StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        tracing::debug!("Device API rejected credential, refreshing");
        let refreshed = self.auth.refresh(&credential).await.map_err(unauthorized)?;
        let resp = build(&refreshed).send().await?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(BackendError::Unauthorized {
                message: "credential rejected after refresh".to_string(),
            });
        }
        Ok(resp)
    }

    /// Parses a response body, mapping 404 to [`BackendError::NotFound`] when
    /// a device id is in play.
    async fn handle_response(
        resp: reqwest::Response,
        device_id: Option<&str>,
    ) -> Result<Value, BackendError> {
        let status = resp.status();
        let body = resp.text().await?;

        if status.is_success() {
            if body.trim().is_empty() {
                return Ok(Value::Object(Map::new()));
            }
            return serde_json::from_str(&body).map_err(|e| BackendError::Decode {
                message: format!("invalid JSON from device API: {e}"),
            });
        }

        if status == reqwest::StatusCode::NOT_FOUND {
            if let Some(device_id) = device_id {
                return Err(BackendError::NotFound {
                    device_id: device_id.to_string(),
                });
            }
        }

        // Google-style error bodies: {"error": {"message": "..."}}
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| {
                v.pointer("/error/message")
                    .or_else(|| v.get("error"))
                    .and_then(Value::as_str)
                    .map(String::from)
            })
            .unwrap_or(body);

        Err(BackendError::Api {
            status: status.as_u16(),
            message,
        })
    }

    fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, BackendError> {
        serde_json::from_value(value).map_err(|e| BackendError::Decode {
            message: e.to_string(),
        })
    }
}

#[allow(clippy::needless_pass_by_value)] // used as a map_err adapter
fn unauthorized(e: crate::backend::auth::AuthError) -> BackendError {
    BackendError::Unauthorized {
        message: e.to_string(),
    }
}

#[async_trait]
impl DeviceBackend for SdmBackend {
    async fn list(&self) -> Result<Vec<DeviceSnapshot>, BackendError> {
        let url = self.devices_url(None);
        let resp = self
            .send_authorized(|c| self.http.get(url.clone()).bearer_auth(c.token()))
            .await?;
        let list: DeviceList = Self::decode(Self::handle_response(resp, None).await?)?;

        let plugs: Vec<DeviceSnapshot> = list
            .devices
            .iter()
            .filter(|device| self.is_plug(device))
            .map(VendorDevice::to_snapshot)
            .collect();

        tracing::debug!(
            total = list.devices.len(),
            plugs = plugs.len(),
            "Listed vendor devices"
        );
        Ok(plugs)
    }

    async fn get(&self, device_id: &str) -> Result<DeviceSnapshot, BackendError> {
        let url = self.devices_url(Some(device_id));
        let resp = self
            .send_authorized(|c| self.http.get(url.clone()).bearer_auth(c.token()))
            .await?;
        let device: VendorDevice =
            Self::decode(Self::handle_response(resp, Some(device_id)).await?)?;

        // A thermostat or camera is not a plug, whatever the caller thinks.
        if !self.is_plug(&device) {
            return Err(BackendError::NotFound {
                device_id: device_id.to_string(),
            });
        }

        Ok(device.to_snapshot())
    }

    async fn set(&self, device_id: &str, on: bool) -> Result<SetAck, BackendError> {
        let url = self.devices_url(Some(&format!("{device_id}:executeCommand")));
        let body = json!({
            "command": SET_ON_OFF_COMMAND,
            "params": { "on": on },
        });

        let resp = self
            .send_authorized(|c| {
                self.http
                    .post(url.clone())
                    .bearer_auth(c.token())
                    .json(&body)
            })
            .await?;
        Self::handle_response(resp, Some(device_id)).await?;

        tracing::info!(device_id, on, "On/off command acknowledged");
        Ok(SetAck {
            device_id: device_id.to_string(),
            on,
        })
    }
}
