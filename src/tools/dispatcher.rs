//! Validate-then-execute-then-translate dispatch.
//!
//! [`ToolDispatcher::dispatch`] is the single point where tool failures turn
//! into protocol error objects:
//!
//! | Failure                          | Error code      |
//! |----------------------------------|-----------------|
//! | unknown tool name                | `MethodNotFound`|
//! | schema violation                 | `InvalidParams` |
//! | structured failure from handler  | passed through  |
//! | backend: device not found        | `InvalidParams` |
//! | backend: anything else           | `InternalError` |
//! | handler panic                    | `InternalError` |
//!
//! Every call emits one `dispatch.start` and one `dispatch.end` counter,
//! tagged by tool and outcome, through a scope guard that fires on all exit
//! paths.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::{json, Value};
use thiserror::Error;

use crate::backend::{BackendError, DeviceBackend};
use crate::mcp::protocol::{ErrorCode, JsonRpcErrorData};
use crate::telemetry::Telemetry;
use crate::tools::schema::validate;
use crate::tools::ToolRegistry;

/// Failure raised by a tool handler.
#[derive(Debug, Error)]
pub enum ToolFailure {
    /// Already a protocol error; forwarded unchanged.
    #[error("{}", .0.message)]
    Protocol(JsonRpcErrorData),

    /// The device backend failed.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Anything else that went wrong inside the handler.
    #[error("{0}")]
    Unexpected(String),
}

impl From<serde_json::Error> for ToolFailure {
    fn from(e: serde_json::Error) -> Self {
        Self::Unexpected(format!("failed to (de)serialise tool payload: {e}"))
    }
}

impl ToolFailure {
    /// Translates the failure into a protocol error object.
    #[must_use]
    pub fn into_error_data(self) -> JsonRpcErrorData {
        match self {
            Self::Protocol(data) => data,
            Self::Backend(e) if e.is_not_found() => {
                JsonRpcErrorData::with_message(ErrorCode::InvalidParams, e.to_string())
                    .with_data(e.diagnostics())
            }
            Self::Backend(e) => JsonRpcErrorData::with_message(ErrorCode::InternalError, e.to_string())
                .with_data(e.diagnostics()),
            Self::Unexpected(message) => {
                JsonRpcErrorData::with_message(ErrorCode::InternalError, message)
            }
        }
    }
}

/// Outcome tag recorded on `dispatch.end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Ok,
    Error,
}

impl Outcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
        }
    }
}

/// Scoped dispatch metrics: start on creation, end on drop.
struct DispatchScope<'a> {
    telemetry: &'a dyn Telemetry,
    in_flight: &'a AtomicUsize,
    tool: &'a str,
    outcome: Outcome,
}

impl<'a> DispatchScope<'a> {
    fn begin(telemetry: &'a dyn Telemetry, in_flight: &'a AtomicUsize, tool: &'a str) -> Self {
        telemetry.increment("dispatch.start", &[("tool", tool)]);
        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        telemetry.gauge("dispatch.in_flight", now as f64);
        Self {
            telemetry,
            in_flight,
            tool,
            outcome: Outcome::Error,
        }
    }

    fn succeed(&mut self) {
        self.outcome = Outcome::Ok;
    }
}

impl Drop for DispatchScope<'_> {
    fn drop(&mut self) {
        let now = self.in_flight.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        self.telemetry.gauge("dispatch.in_flight", now as f64);
        self.telemetry.increment(
            "dispatch.end",
            &[("tool", self.tool), ("outcome", self.outcome.as_str())],
        );
    }
}

/// Resolves tool calls against the registry and runs them on the backend.
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    backend: Arc<dyn DeviceBackend>,
    telemetry: Arc<dyn Telemetry>,
    in_flight: AtomicUsize,
}

impl ToolDispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(
        registry: Arc<ToolRegistry>,
        backend: Arc<dyn DeviceBackend>,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        Self {
            registry,
            backend,
            telemetry,
            in_flight: AtomicUsize::new(0),
        }
    }

    /// The dispatch table.
    #[must_use]
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Validates `args` for `tool_name`, runs the handler, and translates
    /// any failure into a protocol error object.
    ///
    /// # Errors
    ///
    /// Returns the error object to send back to the client.
    pub async fn dispatch(&self, tool_name: &str, args: &Value) -> Result<Value, JsonRpcErrorData> {
        let entry = self.registry.get(tool_name);

        // Unknown names share one tag so clients cannot blow up metric cardinality.
        let tag = entry.map_or("unknown", |e| e.descriptor.name);
        let mut scope = DispatchScope::begin(&*self.telemetry, &self.in_flight, tag);

        let Some(entry) = entry else {
            tracing::debug!(tool = tool_name, "Unknown tool requested");
            return Err(
                JsonRpcErrorData::with_message(
                    ErrorCode::MethodNotFound,
                    format!("Unknown tool: {tool_name}"),
                )
                .with_data(json!({ "available": self.registry.names().collect::<Vec<_>>() })),
            );
        };

        let args = validate(args, &entry.descriptor.parameter_schema).map_err(|violations| {
            let summary = violations
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            tracing::debug!(tool = tool_name, %summary, "Tool arguments rejected");
            JsonRpcErrorData::with_message(
                ErrorCode::InvalidParams,
                format!("Invalid arguments for {tool_name}: {summary}"),
            )
            .with_data(json!({ "violations": violations }))
        })?;

        let outcome = AssertUnwindSafe((entry.handler)(&*self.backend, args))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(value)) => {
                scope.succeed();
                Ok(value)
            }
            Ok(Err(failure)) => {
                let error = failure.into_error_data();
                if error.kind() == Some(ErrorCode::InternalError) {
                    tracing::warn!(tool = tool_name, error = %error.message, "Tool call failed");
                } else {
                    tracing::debug!(tool = tool_name, error = %error.message, "Tool call rejected");
                }
                Err(error)
            }
            Err(_panic) => {
                tracing::error!(tool = tool_name, "Tool handler panicked");
                Err(JsonRpcErrorData::with_message(
                    ErrorCode::InternalError,
                    format!("Internal error while running {tool_name}"),
                ))
            }
        }
    }
}
