//! Tool handlers.
//!
//! Each handler performs exactly one backend operation and shapes the result
//! for the client. Arguments arrive already validated against the tool's
//! schema; handlers only narrow them into typed records.

use futures_util::future::BoxFuture;
use serde::Deserialize;
use serde_json::json;

use crate::backend::DeviceBackend;
use crate::mcp::protocol::{ErrorCode, JsonRpcErrorData};
use crate::tools::{Arguments, HandlerResult, ToolFailure};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceArgs {
    device_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ControlArgs {
    device_id: String,
    state: bool,
}

/// Rejects blank identifiers before they reach the vendor URL.
fn require_device_id(device_id: &str) -> Result<(), ToolFailure> {
    if device_id.trim().is_empty() {
        return Err(ToolFailure::Protocol(
            JsonRpcErrorData::with_message(ErrorCode::InvalidParams, "deviceId must not be empty")
                .with_data(json!({ "violations": [{ "field": "deviceId", "problem": "empty" }] })),
        ));
    }
    Ok(())
}

pub fn list_smart_plugs(backend: &dyn DeviceBackend, _args: Arguments) -> BoxFuture<'_, HandlerResult> {
    Box::pin(async move {
        let plugs = backend.list().await?;
        Ok(serde_json::to_value(plugs)?)
    })
}

pub fn get_smart_plug_state(backend: &dyn DeviceBackend, args: Arguments) -> BoxFuture<'_, HandlerResult> {
    Box::pin(async move {
        let DeviceArgs { device_id } = args.parse()?;
        require_device_id(&device_id)?;

        let snapshot = backend.get(&device_id).await?;
        Ok(serde_json::to_value(snapshot)?)
    })
}

/// Reports the requested state as applied once the vendor acknowledges the
/// command; the device is not re-read. An acknowledged command means the
/// vendor cloud reached the plug, hence `online: true`.
pub fn control_smart_plug(backend: &dyn DeviceBackend, args: Arguments) -> BoxFuture<'_, HandlerResult> {
    Box::pin(async move {
        let ControlArgs { device_id, state } = args.parse()?;
        require_device_id(&device_id)?;

        let ack = backend.set(&device_id, state).await?;
        Ok(json!({
            "success": true,
            "device": {
                "id": ack.device_id,
                "state": { "on": ack.on, "online": true },
            },
        }))
    })
}
