//! MCP protocol engine for the smart-plug tool server.
//!
//! This module implements the MCP server lifecycle:
//!
//! 1. **Initialisation**: Version negotiation and capability advertisement
//! 2. **Operation**: Tool listing and concurrent tool calls
//! 3. **Shutdown**: Cancelling outstanding calls and releasing the backend
//!
//! # Concurrency
//!
//! The engine reads one line at a time and answers `initialize`, `ping` and
//! `tools/list` inline. Each `tools/call` runs as its own task so a slow
//! vendor request never blocks the read loop. Every response, inline or from
//! a task, goes through one channel to a single writer task; only that task
//! touches the output stream, so framed lines never interleave.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::Level;

use crate::error::ServerError;
use crate::mcp::protocol::{
    parse_message, CancelledParams, ErrorCode, IncomingMessage, JsonRpcErrorData,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId, MCP_PROTOCOL_VERSION,
    SERVER_NAME, SUPPORTED_PROTOCOL_VERSIONS,
};
use crate::mcp::transport::{self, LineReader, LineWriter};
use crate::telemetry::Telemetry;
use crate::tools::ToolDispatcher;

/// Responses buffered between producers and the writer task.
const OUTBOUND_CAPACITY: usize = 64;

/// How long outstanding tool calls may keep running after input closes.
const DRAIN_GRACE: Duration = Duration::from_secs(10);

/// Connection lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    /// Waiting for `initialize`.
    Created,
    /// `initialize` received, handshake in progress.
    Initializing,
    /// Handshake complete; tool calls are accepted.
    Ready,
    /// Shutdown in progress.
    Stopping,
    /// Shut down; backend released.
    Stopped,
}

/// Server capabilities advertised during initialisation.
#[derive(Debug, Clone, Serialize)]
pub struct ServerCapabilities {
    /// Tool-related capabilities.
    pub tools: ToolCapabilities,
}

/// Tool-specific capabilities.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCapabilities {
    /// Whether the tool list can change during the session. The catalogue is
    /// fixed at startup, so this is always `false`.
    pub list_changed: bool,
}

/// Server information for the initialisation response.
#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    /// Server name.
    pub name: String,
    /// Server version.
    pub version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: SERVER_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Client information received during initialisation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Client name.
    pub name: String,
    /// Client version.
    #[serde(default)]
    pub version: Option<String>,
}

/// Parameters for the initialize request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol version requested by client.
    pub protocol_version: String,
    /// Client capabilities.
    #[serde(default)]
    pub capabilities: Value,
    /// Client information.
    #[serde(default)]
    pub client_info: Option<ClientInfo>,
}

/// Parameters for tools/call request.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallParams {
    /// Name of the tool to call.
    pub name: String,
    /// Arguments for the tool.
    #[serde(default)]
    pub arguments: Value,
}

/// Content item in a tool call response.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    /// Text content.
    Text {
        /// The text content.
        text: String,
    },
}

/// Result of a successful tool call.
///
/// The payload is carried twice: as JSON text for clients that only read
/// `content`, and as-is in `structuredContent`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    /// Content returned by the tool.
    pub content: Vec<ToolContent>,
    /// The tool payload as structured JSON.
    pub structured_content: Value,
}

impl ToolCallResult {
    /// Wraps a tool payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be rendered as JSON text.
    pub fn from_payload(payload: Value) -> Result<Self, serde_json::Error> {
        let text = serde_json::to_string(&payload)?;
        Ok(Self {
            content: vec![ToolContent::Text { text }],
            structured_content: payload,
        })
    }
}

/// Picks the protocol revision to answer `requested` with.
///
/// A supported revision is echoed. Any other revision whose major (first
/// numeric component) matches a supported one is answered with the newest
/// supported revision.
///
/// # Errors
///
/// Returns `InvalidParams` carrying `{requested, supported}` if the major is
/// not supported.
pub fn negotiate_protocol_version(requested: &str) -> Result<&'static str, JsonRpcErrorData> {
    if let Some(exact) = SUPPORTED_PROTOCOL_VERSIONS
        .iter()
        .copied()
        .find(|v| *v == requested)
    {
        return Ok(exact);
    }

    let compatible = major_version(requested).is_some_and(|requested_major| {
        SUPPORTED_PROTOCOL_VERSIONS
            .iter()
            .any(|v| major_version(v) == Some(requested_major))
    });

    if compatible {
        Ok(MCP_PROTOCOL_VERSION)
    } else {
        Err(JsonRpcErrorData::with_message(
            ErrorCode::InvalidParams,
            format!("Unsupported protocol version: {requested}"),
        )
        .with_data(json!({
            "requested": requested,
            "supported": SUPPORTED_PROTOCOL_VERSIONS,
        })))
    }
}

fn major_version(version: &str) -> Option<u64> {
    version.split(['.', '-']).next()?.trim().parse().ok()
}

/// Cancellation handles of outstanding tool calls, keyed by request ID.
///
/// Every call token is a child of `root`, so shutdown also reaches calls
/// that have no ID to cancel them by.
#[derive(Clone, Default)]
struct InFlight {
    calls: Arc<Mutex<HashMap<RequestId, CancellationToken>>>,
    root: CancellationToken,
}

impl InFlight {
    /// A fresh token that is cancelled by [`InFlight::cancel_all`].
    fn token(&self) -> CancellationToken {
        self.root.child_token()
    }

    /// Registers a call. Returns `false` if the ID is already outstanding.
    fn insert(&self, id: RequestId, token: CancellationToken) -> bool {
        let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        if calls.contains_key(&id) {
            return false;
        }
        calls.insert(id, token);
        true
    }

    fn remove(&self, id: &RequestId) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    /// Cancels one call. Returns `false` if it is not outstanding.
    fn cancel(&self, id: &RequestId) -> bool {
        let calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        calls.get(id).map(CancellationToken::cancel).is_some()
    }

    fn cancel_all(&self) {
        self.root.cancel();
    }
}

/// The MCP server for smart-plug control.
pub struct McpServer {
    /// Current connection state.
    state: ConnectionState,
    /// Negotiated protocol version (set after initialisation).
    protocol_version: Option<&'static str>,
    /// Tool dispatch; dropped on shutdown to release the backend.
    dispatcher: Option<Arc<ToolDispatcher>>,
    telemetry: Arc<dyn Telemetry>,
    /// Producer side of the writer task's channel while serving.
    outbound: Option<mpsc::Sender<JsonRpcResponse>>,
    in_flight: InFlight,
    calls: JoinSet<()>,
}

impl McpServer {
    /// Creates a server in the `Created` state.
    #[must_use]
    pub fn new(dispatcher: Arc<ToolDispatcher>, telemetry: Arc<dyn Telemetry>) -> Self {
        Self {
            state: ConnectionState::Created,
            protocol_version: None,
            dispatcher: Some(dispatcher),
            telemetry,
            outbound: None,
            in_flight: InFlight::default(),
            calls: JoinSet::new(),
        }
    }

    /// Returns the current connection state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Returns the negotiated protocol version, once initialised.
    #[must_use]
    pub const fn protocol_version(&self) -> Option<&'static str> {
        self.protocol_version
    }

    /// Serves stdin/stdout until EOF, a shutdown signal, or a fatal error.
    ///
    /// # Errors
    ///
    /// Returns an error if transport I/O fails or signal handlers cannot be
    /// installed.
    #[cfg(unix)]
    pub async fn run(&mut self) -> Result<(), ServerError> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        let stop = async move {
            tokio::select! {
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT, initiating graceful shutdown");
                }
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM, initiating graceful shutdown");
                }
            }
        };

        let (reader, writer) = transport::stdio();
        self.serve_until(reader, writer, stop).await
    }

    /// Serves stdin/stdout until EOF, Ctrl+C, or a fatal error.
    ///
    /// # Errors
    ///
    /// Returns an error if transport I/O fails.
    #[cfg(windows)]
    pub async fn run(&mut self) -> Result<(), ServerError> {
        let stop = async {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown");
            } else {
                std::future::pending::<()>().await;
            }
        };

        let (reader, writer) = transport::stdio();
        self.serve_until(reader, writer, stop).await
    }

    /// Serves one connection until EOF or a fatal error.
    ///
    /// # Errors
    ///
    /// Returns an error if transport I/O fails.
    pub async fn serve<R, W>(
        &mut self,
        reader: LineReader<R>,
        writer: LineWriter<W>,
    ) -> Result<(), ServerError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.serve_until(reader, writer, std::future::pending()).await
    }

    /// Serves one connection until EOF, `stop` resolves, or a fatal error.
    /// The server is `Stopped` when this returns.
    ///
    /// On EOF, tool calls already running get up to [`DRAIN_GRACE`] to
    /// answer before they are cancelled. A `stop` signal cancels them at once.
    ///
    /// # Errors
    ///
    /// Returns an error if transport I/O fails.
    pub async fn serve_until<R, W, S>(
        &mut self,
        mut reader: LineReader<R>,
        writer: LineWriter<W>,
        stop: S,
    ) -> Result<(), ServerError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
        S: Future<Output = ()>,
    {
        if self.state == ConnectionState::Stopped {
            return Ok(());
        }

        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        self.outbound = Some(tx);
        let mut writer_task = tokio::spawn(write_loop(writer, rx));
        tokio::pin!(stop);

        let mut writer_result = None;
        let mut input_closed = false;
        let result = loop {
            tokio::select! {
                () = &mut stop => break Ok(()),

                written = &mut writer_task => {
                    // The writer only stops early when output fails.
                    writer_result = Some(flatten_join(written));
                    break Ok(());
                }

                Some(joined) = self.calls.join_next(), if !self.calls.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            tracing::error!("Tool call task panicked");
                        }
                    }
                }

                line = reader.read_line() => match line {
                    Ok(Some(line)) => {
                        if !line.trim().is_empty() {
                            self.handle_inbound(&line).await;
                        }
                        if self.state >= ConnectionState::Stopping {
                            break Ok(());
                        }
                    }
                    Ok(None) => {
                        tracing::info!("Input closed, shutting down");
                        input_closed = true;
                        break Ok(());
                    }
                    Err(e) => break Err(ServerError::Transport(e)),
                },
            }
        };

        if input_closed && writer_result.is_none() {
            self.drain(DRAIN_GRACE).await;
        }
        self.shutdown().await;

        let written = match writer_result {
            Some(written) => written,
            None => flatten_join(writer_task.await),
        };

        result.and(written.map_err(ServerError::Transport))
    }

    /// Stops the server: cancels outstanding calls, waits for their tasks,
    /// releases the backend and closes the outbound channel so the writer
    /// drains and exits. Calling it again once `Stopped` does nothing.
    pub async fn shutdown(&mut self) {
        if self.state == ConnectionState::Stopped {
            return;
        }
        self.state = ConnectionState::Stopping;

        self.in_flight.cancel_all();
        while self.calls.join_next().await.is_some() {}

        self.dispatcher = None;
        self.outbound = None;
        self.state = ConnectionState::Stopped;
        tracing::debug!("Server stopped");
    }

    /// Lets outstanding tool calls finish, for at most `grace`.
    async fn drain(&mut self, grace: Duration) {
        if self.calls.is_empty() {
            return;
        }
        self.state = ConnectionState::Stopping;
        tracing::info!(pending = self.calls.len(), "Waiting for outstanding tool calls");

        let calls = &mut self.calls;
        let drained = tokio::time::timeout(grace, async {
            while calls.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                remaining = self.calls.len(),
                "Tool calls still running after input closed, cancelling"
            );
        }
    }

    /// Handles one raw inbound line.
    async fn handle_inbound(&mut self, line: &str) {
        match parse_message(line) {
            Ok(IncomingMessage::Request(req)) => self.handle_request(req).await,
            Ok(IncomingMessage::Notification(notif)) => self.handle_notification(notif),
            Err(response) => {
                self.telemetry.increment("protocol.parse_error", &[]);
                if response.id.is_some() {
                    self.send(response).await;
                } else {
                    let bytes = line.len().to_string();
                    self.telemetry.log(
                        Level::WARN,
                        "Dropping malformed message without a recoverable ID",
                        &[("bytes", bytes.as_str())],
                    );
                }
            }
        }
    }

    /// Handles an incoming request.
    async fn handle_request(&mut self, req: JsonRpcRequest) {
        let method = req.method.clone();
        let response = match method.as_str() {
            "initialize" => self.handle_initialize(&req),
            "tools/list" => self.handle_tools_list(&req),
            "tools/call" => match self.spawn_tool_call(req) {
                // Answered by the call's task.
                Ok(()) => return,
                Err(response) => Err(response),
            },
            "ping" => Ok(JsonRpcResponse::success(req.id.clone(), json!({}))),
            _ => Err(JsonRpcResponse::method_not_found(req.id.clone(), &method)),
        };

        let rejected_handshake = response.is_err()
            && method == "initialize"
            && self.state == ConnectionState::Initializing;

        self.send(response.unwrap_or_else(|error| error)).await;

        if rejected_handshake {
            tracing::warn!("Handshake failed, stopping");
            self.shutdown().await;
        }
    }

    /// Handles an incoming notification. Notifications are never answered.
    fn handle_notification(&mut self, notif: JsonRpcNotification) {
        match notif.method.as_str() {
            "tools/call" => self.spawn_tool_notification(notif.params),
            "initialize" | "tools/list" | "ping" => {
                tracing::debug!(method = %notif.method, "Ignoring request sent as a notification");
            }
            "notifications/initialized" => {
                tracing::debug!("Client confirmed initialisation");
            }
            "notifications/cancelled" => {
                let params = notif
                    .params
                    .clone()
                    .map(serde_json::from_value::<CancelledParams>);
                match params {
                    Some(Ok(params)) => {
                        if self.in_flight.cancel(&params.request_id) {
                            tracing::debug!(
                                id = ?params.request_id,
                                reason = params.reason.as_deref().unwrap_or(""),
                                "Cancelling tool call"
                            );
                        } else {
                            tracing::debug!(id = ?params.request_id, "Cancel for unknown request");
                        }
                    }
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "Ignoring malformed cancellation");
                    }
                    None => tracing::debug!("Ignoring cancellation without params"),
                }
            }
            other => tracing::debug!(method = other, "Ignoring unknown notification"),
        }
    }

    /// Handles the initialize request.
    ///
    /// Leaves the state at `Initializing` on a version mismatch so the caller
    /// can tell a rejected handshake from a malformed one.
    fn handle_initialize(&mut self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, JsonRpcResponse> {
        if self.state != ConnectionState::Created {
            return Err(JsonRpcResponse::error(
                Some(req.id.clone()),
                JsonRpcErrorData::with_message(
                    ErrorCode::InvalidRequest,
                    "Server already initialised",
                ),
            ));
        }

        let params: InitializeParams = req
            .params
            .as_ref()
            .map(|p| serde_json::from_value(p.clone()))
            .transpose()
            .map_err(|e| {
                JsonRpcResponse::invalid_params(
                    req.id.clone(),
                    format!("Invalid initialize params: {e}"),
                )
            })?
            .ok_or_else(|| {
                JsonRpcResponse::invalid_params(req.id.clone(), "Missing initialize params")
            })?;

        self.state = ConnectionState::Initializing;

        let negotiated = negotiate_protocol_version(&params.protocol_version).map_err(|error| {
            tracing::warn!(
                requested = %params.protocol_version,
                "Client requested an unsupported protocol version"
            );
            JsonRpcResponse::error(Some(req.id.clone()), error)
        })?;

        let Some(dispatcher) = self.dispatcher.as_ref() else {
            return Err(JsonRpcResponse::internal_error(
                req.id.clone(),
                "Device backend is not available",
            ));
        };

        let capabilities = ServerCapabilities {
            tools: ToolCapabilities::default(),
        };
        let result = json!({
            "protocolVersion": negotiated,
            "capabilities": capabilities,
            "serverInfo": ServerInfo::default(),
            "tools": dispatcher.registry().descriptors().collect::<Vec<_>>(),
        });

        if let Some(client) = &params.client_info {
            tracing::info!(
                client = %client.name,
                client_version = client.version.as_deref().unwrap_or("unknown"),
                protocol = negotiated,
                "Client connected"
            );
        }

        self.protocol_version = Some(negotiated);
        self.state = ConnectionState::Ready;

        Ok(JsonRpcResponse::success(req.id.clone(), result))
    }

    /// Handles the tools/list request.
    fn handle_tools_list(&self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, JsonRpcResponse> {
        let dispatcher = self.require_ready(&req.id)?;

        let result = json!({
            "tools": dispatcher.registry().descriptors().collect::<Vec<_>>(),
        });

        Ok(JsonRpcResponse::success(req.id.clone(), result))
    }

    /// Starts a tools/call request on its own task.
    ///
    /// Errors detected before the tool runs are returned for the caller to
    /// send; everything after is answered by the task.
    fn spawn_tool_call(&mut self, req: JsonRpcRequest) -> Result<(), JsonRpcResponse> {
        let dispatcher = Arc::clone(self.require_ready(&req.id)?);

        let params: ToolCallParams = req
            .params
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| {
                JsonRpcResponse::invalid_params(
                    req.id.clone(),
                    format!("Invalid tool call params: {e}"),
                )
            })?
            .ok_or_else(|| {
                JsonRpcResponse::invalid_params(req.id.clone(), "Missing tool call params")
            })?;

        let Some(outbound) = self.outbound.clone() else {
            return Err(JsonRpcResponse::internal_error(req.id, "Server is not serving"));
        };

        let id = req.id;
        let token = self.in_flight.token();
        if !self.in_flight.insert(id.clone(), token.clone()) {
            return Err(JsonRpcResponse::error(
                Some(id),
                JsonRpcErrorData::with_message(
                    ErrorCode::InvalidRequest,
                    "A request with this ID is already in flight",
                ),
            ));
        }

        let in_flight = self.in_flight.clone();
        let telemetry = Arc::clone(&self.telemetry);

        self.calls.spawn(async move {
            let outcome = dispatch_unless_cancelled(&dispatcher, &token, &params).await;
            in_flight.remove(&id);

            let Some(result) = outcome.filter(|_| !token.is_cancelled()) else {
                telemetry.increment("protocol.cancelled", &[("tool", params.name.as_str())]);
                tracing::debug!(id = ?id, tool = %params.name, "Suppressed response to cancelled call");
                return;
            };

            let response = match result.map(ToolCallResult::from_payload) {
                Ok(Ok(call_result)) => match serde_json::to_value(&call_result) {
                    Ok(value) => JsonRpcResponse::success(id, value),
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to serialise tool call result");
                        JsonRpcResponse::internal_error(id, "Internal error: failed to serialise result")
                    }
                },
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "Failed to render tool payload");
                    JsonRpcResponse::internal_error(id, "Internal error: failed to serialise result")
                }
                Err(error) => JsonRpcResponse::error(Some(id), error),
            };

            if outbound.send(response).await.is_err() {
                tracing::debug!("Writer closed before tool call response could be sent");
            }
        });

        Ok(())
    }

    /// Runs a tools/call that arrived as a notification. Nothing is written
    /// back; a failure only produces a log line.
    fn spawn_tool_notification(&mut self, params: Option<Value>) {
        if self.state != ConnectionState::Ready {
            self.telemetry.log(
                Level::WARN,
                "Dropping tool call notification: server not initialised",
                &[],
            );
            return;
        }
        let Some(dispatcher) = self.dispatcher.clone() else {
            return;
        };

        let params: ToolCallParams = match params.map(serde_json::from_value).transpose() {
            Ok(Some(params)) => params,
            Ok(None) => {
                self.telemetry.log(
                    Level::WARN,
                    "Dropping tool call notification without params",
                    &[],
                );
                return;
            }
            Err(e) => {
                let error = e.to_string();
                self.telemetry.log(
                    Level::WARN,
                    "Dropping tool call notification with invalid params",
                    &[("error", error.as_str())],
                );
                return;
            }
        };

        let token = self.in_flight.token();
        let telemetry = Arc::clone(&self.telemetry);

        self.calls.spawn(async move {
            match dispatch_unless_cancelled(&dispatcher, &token, &params).await {
                Some(Ok(_)) => {
                    tracing::debug!(tool = %params.name, "Tool call notification completed");
                }
                Some(Err(error)) => {
                    let code = error.code.to_string();
                    telemetry.log(
                        Level::WARN,
                        "Tool call notification failed",
                        &[
                            ("tool", params.name.as_str()),
                            ("code", code.as_str()),
                            ("error", error.message.as_str()),
                        ],
                    );
                }
                None => {
                    tracing::debug!(tool = %params.name, "Tool call notification cancelled");
                }
            }
        });
    }

    /// Ensures the server is `Ready` and returns the dispatcher.
    fn require_ready(&self, id: &RequestId) -> Result<&Arc<ToolDispatcher>, JsonRpcResponse> {
        match (&self.dispatcher, self.state) {
            (Some(dispatcher), ConnectionState::Ready) => Ok(dispatcher),
            _ => Err(JsonRpcResponse::error(
                Some(id.clone()),
                JsonRpcErrorData::with_message(ErrorCode::InvalidRequest, "Server not initialised"),
            )),
        }
    }

    /// Queues a response for the writer task.
    async fn send(&self, response: JsonRpcResponse) {
        let Some(outbound) = &self.outbound else {
            tracing::debug!("Dropping response: server is not serving");
            return;
        };
        if outbound.send(response).await.is_err() {
            tracing::debug!("Dropping response: writer closed");
        }
    }
}

/// Dispatches one call. `None` if `token` fired first.
async fn dispatch_unless_cancelled(
    dispatcher: &ToolDispatcher,
    token: &CancellationToken,
    params: &ToolCallParams,
) -> Option<Result<Value, JsonRpcErrorData>> {
    tokio::select! {
        biased;
        () = token.cancelled() => None,
        result = dispatcher.dispatch(&params.name, &params.arguments) => Some(result),
    }
}

/// The writer task: the only place that writes to the transport.
async fn write_loop<W>(
    mut writer: LineWriter<W>,
    mut rx: mpsc::Receiver<JsonRpcResponse>,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        writer.write_response(&response).await?;
    }
    Ok(())
}

fn flatten_join(joined: Result<io::Result<()>, JoinError>) -> io::Result<()> {
    joined.map_err(io::Error::other)?
}
