//! End-to-end tests of the protocol engine over in-memory pipes.
//!
//! Each test drives a full session: the client script writes newline-framed
//! JSON-RPC lines into the server's input and reads its output, against an
//! in-memory device backend.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};
use tokio::sync::Notify;

use smartplug_mcp::backend::{BackendError, DeviceBackend, DeviceSnapshot, PlugState, SetAck};
use smartplug_mcp::error::ServerError;
use smartplug_mcp::mcp::{ConnectionState, LineReader, LineWriter, McpServer};
use smartplug_mcp::telemetry::{Telemetry, TracingTelemetry};
use smartplug_mcp::tools::{ToolDispatcher, ToolRegistry};

// =============================================================================
// Fixtures
// =============================================================================

/// In-memory plugs with optional per-device gates on `set`.
#[derive(Default)]
struct FakePlugs {
    plugs: Vec<DeviceSnapshot>,
    set_calls: AtomicUsize,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
}

impl FakePlugs {
    fn with_plugs(ids: &[&str]) -> Self {
        Self {
            plugs: ids
                .iter()
                .map(|id| DeviceSnapshot {
                    id: (*id).to_string(),
                    name: format!("Plug {id}"),
                    state: PlugState {
                        on: false,
                        online: true,
                    },
                })
                .collect(),
            ..Self::default()
        }
    }

    /// Makes `set` on `id` wait until [`FakePlugs::release`] is called.
    fn gate(&self, id: &str) {
        self.gates
            .lock()
            .unwrap()
            .insert(id.to_string(), Arc::new(Notify::new()));
    }

    fn release(&self, id: &str) {
        if let Some(gate) = self.gates.lock().unwrap().get(id) {
            gate.notify_one();
        }
    }

    fn set_calls(&self) -> usize {
        self.set_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceBackend for FakePlugs {
    async fn list(&self) -> Result<Vec<DeviceSnapshot>, BackendError> {
        Ok(self.plugs.clone())
    }

    async fn get(&self, device_id: &str) -> Result<DeviceSnapshot, BackendError> {
        self.plugs
            .iter()
            .find(|p| p.id == device_id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound {
                device_id: device_id.to_string(),
            })
    }

    async fn set(&self, device_id: &str, on: bool) -> Result<SetAck, BackendError> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        self.get(device_id).await?;

        let gate = self.gates.lock().unwrap().get(device_id).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        Ok(SetAck {
            device_id: device_id.to_string(),
            on,
        })
    }
}

/// The client end of a session.
struct Client {
    input: DuplexStream,
    output: Lines<BufReader<DuplexStream>>,
}

impl Client {
    async fn send_raw(&mut self, line: &str) {
        self.input.write_all(line.as_bytes()).await.unwrap();
        self.input.write_all(b"\n").await.unwrap();
    }

    /// Writes bytes without a line terminator.
    async fn send_partial(&mut self, fragment: &str) {
        self.input.write_all(fragment.as_bytes()).await.unwrap();
    }

    async fn send(&mut self, message: Value) {
        self.send_raw(&message.to_string()).await;
    }

    async fn request(&mut self, id: Value, method: &str, params: Value) {
        self.send(json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params }))
            .await;
    }

    async fn call(&mut self, id: Value, tool: &str, arguments: Value) {
        self.request(id, "tools/call", json!({ "name": tool, "arguments": arguments }))
            .await;
    }

    /// Next response line, or `None` once the server closed its output.
    async fn try_recv(&mut self) -> Option<Value> {
        tokio::time::timeout(Duration::from_secs(5), self.output.next_line())
            .await
            .expect("timed out waiting for the server")
            .unwrap()
            .map(|line| serde_json::from_str(&line).unwrap())
    }

    async fn recv(&mut self) -> Value {
        self.try_recv().await.expect("server closed its output")
    }

    /// Closes the server's input and collects every line written after that.
    async fn finish(self) -> Vec<Value> {
        let Self { input, mut output } = self;
        drop(input);

        let mut rest = Vec::new();
        while let Some(line) = tokio::time::timeout(Duration::from_secs(5), output.next_line())
            .await
            .expect("timed out waiting for the server to close")
            .unwrap()
        {
            rest.push(serde_json::from_str(&line).unwrap());
        }
        rest
    }

    async fn initialize(&mut self) -> Value {
        self.request(
            json!(0),
            "initialize",
            json!({
                "protocolVersion": "2025-06-18",
                "capabilities": {},
                "clientInfo": { "name": "test-client", "version": "1.0.0" }
            }),
        )
        .await;
        let response = self.recv().await;
        self.send(json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }))
            .await;
        response
    }
}

struct Outcome {
    server: McpServer,
    result: Result<(), ServerError>,
    telemetry: Arc<TracingTelemetry>,
}

/// Runs `script` as the client of a fresh server backed by `backend`.
/// The client's pipes close when the script returns.
async fn session<F, Fut>(backend: Arc<FakePlugs>, script: F) -> Outcome
where
    F: FnOnce(Client) -> Fut,
    Fut: Future<Output = ()>,
{
    let (client_in, server_in) = tokio::io::duplex(64 * 1024);
    let (server_out, client_out) = tokio::io::duplex(64 * 1024);

    let telemetry = Arc::new(TracingTelemetry::new());
    let sink: Arc<dyn Telemetry> = telemetry.clone();
    let dispatcher = ToolDispatcher::new(Arc::new(ToolRegistry::new()), backend, Arc::clone(&sink));
    let mut server = McpServer::new(Arc::new(dispatcher), sink);

    let client = Client {
        input: client_in,
        output: BufReader::new(client_out).lines(),
    };

    let serve = server.serve(
        LineReader::new(BufReader::new(server_in)),
        LineWriter::new(server_out),
    );
    let (result, ()) = tokio::join!(serve, script(client));

    Outcome {
        server,
        result,
        telemetry,
    }
}

fn error_code(response: &Value) -> i64 {
    response["error"]["code"].as_i64().unwrap()
}

// =============================================================================
// Handshake
// =============================================================================

#[tokio::test]
async fn handshake_advertises_tools() {
    let outcome = session(Arc::new(FakePlugs::default()), |mut c| async move {
        let response = c.initialize().await;
        assert_eq!(response["id"], 0);

        let result = &response["result"];
        assert_eq!(result["protocolVersion"], "2025-06-18");
        assert_eq!(result["serverInfo"]["name"], "smartplug-mcp");
        assert_eq!(result["capabilities"]["tools"]["listChanged"], false);

        let names: Vec<&str> = result["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(
            names,
            vec!["list_smart_plugs", "control_smart_plug", "get_smart_plug_state"]
        );

        c.request(json!(1), "tools/list", json!({})).await;
        let listed = c.recv().await;
        assert_eq!(listed["result"]["tools"], result["tools"]);
    })
    .await;

    assert!(outcome.result.is_ok());
    assert_eq!(outcome.server.state(), ConnectionState::Stopped);
}

#[tokio::test]
async fn incompatible_version_stops_server() {
    let outcome = session(Arc::new(FakePlugs::default()), |mut c| async move {
        c.request(
            json!(1),
            "initialize",
            json!({ "protocolVersion": "999.0.0", "capabilities": {} }),
        )
        .await;

        let response = c.recv().await;
        assert_eq!(response["id"], 1);
        assert_eq!(error_code(&response), -32602);
        assert_eq!(response["error"]["data"]["requested"], "999.0.0");
        assert!(response.get("result").is_none());

        // The server closes its output after the rejection.
        assert!(c.try_recv().await.is_none());
    })
    .await;

    assert!(outcome.result.is_ok());
    assert_eq!(outcome.server.state(), ConnectionState::Stopped);
    assert_eq!(outcome.server.protocol_version(), None);
}

#[tokio::test]
async fn same_year_revision_negotiates_latest() {
    session(Arc::new(FakePlugs::default()), |mut c| async move {
        c.request(
            json!("init"),
            "initialize",
            json!({ "protocolVersion": "2025-01-01", "capabilities": {} }),
        )
        .await;
        let response = c.recv().await;
        assert_eq!(response["id"], "init");
        assert_eq!(response["result"]["protocolVersion"], "2025-06-18");
    })
    .await;
}

#[tokio::test]
async fn requests_before_initialize_are_rejected() {
    let backend = Arc::new(FakePlugs::with_plugs(&["p1"]));
    let spy = Arc::clone(&backend);

    session(backend, |mut c| async move {
        c.request(json!(1), "tools/list", json!({})).await;
        let response = c.recv().await;
        assert_eq!(error_code(&response), -32600);
        assert_eq!(response["error"]["message"], "Server not initialised");

        c.call(json!(2), "control_smart_plug", json!({ "deviceId": "p1", "state": true }))
            .await;
        assert_eq!(error_code(&c.recv().await), -32600);

        // ping works in any state
        c.request(json!(3), "ping", json!({})).await;
        assert_eq!(c.recv().await["result"], json!({}));

        c.initialize().await;
        c.request(json!(4), "initialize", json!({ "protocolVersion": "2025-06-18" }))
            .await;
        assert_eq!(error_code(&c.recv().await), -32600);
    })
    .await;

    assert_eq!(spy.set_calls(), 0);
}

// =============================================================================
// Tool calls
// =============================================================================

#[tokio::test]
async fn list_returns_plug_array() {
    session(Arc::new(FakePlugs::with_plugs(&["p1", "p2"])), |mut c| async move {
        c.initialize().await;
        c.call(json!(1), "list_smart_plugs", json!({})).await;

        let response = c.recv().await;
        let plugs = response["result"]["structuredContent"].as_array().unwrap();
        assert_eq!(plugs.len(), 2);
        for plug in plugs {
            assert!(plug["state"]["on"].is_boolean());
            assert!(plug["state"]["online"].is_boolean());
        }

        let text = response["result"]["content"][0]["text"].as_str().unwrap();
        let decoded: Value = serde_json::from_str(text).unwrap();
        assert_eq!(&decoded, &response["result"]["structuredContent"]);
    })
    .await;
}

#[tokio::test]
async fn control_reports_requested_state() {
    session(Arc::new(FakePlugs::with_plugs(&["X"])), |mut c| async move {
        c.initialize().await;
        c.call(json!(1), "control_smart_plug", json!({ "deviceId": "X", "state": true }))
            .await;

        let response = c.recv().await;
        assert_eq!(
            response["result"]["structuredContent"],
            json!({ "success": true, "device": { "id": "X", "state": { "on": true, "online": true } } })
        );
    })
    .await;
}

#[tokio::test]
async fn missing_argument_never_reaches_backend() {
    let backend = Arc::new(FakePlugs::with_plugs(&["missing"]));
    let spy = Arc::clone(&backend);

    let outcome = session(backend, |mut c| async move {
        c.initialize().await;
        c.call(json!(1), "control_smart_plug", json!({ "deviceId": "missing" }))
            .await;

        let response = c.recv().await;
        assert_eq!(error_code(&response), -32602);
        assert_eq!(
            response["error"]["data"]["violations"],
            json!([{ "field": "state", "problem": "missing" }])
        );
    })
    .await;

    assert_eq!(spy.set_calls(), 0);
    assert_eq!(
        outcome.telemetry.counter(
            "dispatch.end",
            &[("tool", "control_smart_plug"), ("outcome", "error")]
        ),
        1
    );
}

#[tokio::test]
async fn unknown_device_is_invalid_params() {
    session(Arc::new(FakePlugs::with_plugs(&["p1"])), |mut c| async move {
        c.initialize().await;
        c.call(json!(1), "get_smart_plug_state", json!({ "deviceId": "unknown-id" }))
            .await;

        let response = c.recv().await;
        assert_eq!(error_code(&response), -32602);
        assert_eq!(response["error"]["data"]["kind"], "not_found");
    })
    .await;
}

#[tokio::test]
async fn unknown_tool_is_method_not_found() {
    let outcome = session(Arc::new(FakePlugs::default()), |mut c| async move {
        c.initialize().await;
        c.call(json!(1), "not_a_tool", json!({})).await;
        assert_eq!(error_code(&c.recv().await), -32601);

        // The catalogue is unchanged afterwards.
        c.request(json!(2), "tools/list", json!({})).await;
        assert_eq!(c.recv().await["result"]["tools"].as_array().unwrap().len(), 3);
    })
    .await;

    assert_eq!(
        outcome
            .telemetry
            .counter("dispatch.start", &[("tool", "unknown")]),
        1
    );
}

#[tokio::test]
async fn concurrent_calls_keep_their_ids() {
    let backend = Arc::new(FakePlugs::with_plugs(&["p1", "p2"]));
    backend.gate("p1");
    backend.gate("p2");
    let plugs = Arc::clone(&backend);

    session(backend, |mut c| async move {
        c.initialize().await;
        c.call(json!("a"), "control_smart_plug", json!({ "deviceId": "p1", "state": true }))
            .await;
        c.call(json!("b"), "control_smart_plug", json!({ "deviceId": "p2", "state": false }))
            .await;

        // Second call finishes first.
        plugs.release("p2");
        let first = c.recv().await;
        assert_eq!(first["id"], "b");
        assert_eq!(first["result"]["structuredContent"]["device"]["id"], "p2");
        assert_eq!(first["result"]["structuredContent"]["device"]["state"]["on"], false);

        plugs.release("p1");
        let second = c.recv().await;
        assert_eq!(second["id"], "a");
        assert_eq!(second["result"]["structuredContent"]["device"]["id"], "p1");
        assert_eq!(second["result"]["structuredContent"]["device"]["state"]["on"], true);
    })
    .await;
}

#[tokio::test]
async fn cancelled_call_is_not_answered() {
    let backend = Arc::new(FakePlugs::with_plugs(&["p1"]));
    backend.gate("p1");
    let plugs = Arc::clone(&backend);

    let outcome = session(backend, |mut c| async move {
        c.initialize().await;
        c.call(json!(5), "control_smart_plug", json!({ "deviceId": "p1", "state": true }))
            .await;
        c.send(json!({
            "jsonrpc": "2.0",
            "method": "notifications/cancelled",
            "params": { "requestId": 5, "reason": "user aborted" }
        }))
        .await;

        c.request(json!(6), "ping", json!({})).await;
        assert_eq!(c.recv().await["id"], 6);

        plugs.release("p1");
        c.request(json!(7), "ping", json!({})).await;
        assert_eq!(c.recv().await["id"], 7);
    })
    .await;

    assert!(outcome.result.is_ok());
    assert_eq!(
        outcome
            .telemetry
            .counter("protocol.cancelled", &[("tool", "control_smart_plug")]),
        1
    );
}

#[tokio::test]
async fn calls_running_at_end_of_input_are_answered() {
    let backend = Arc::new(FakePlugs::with_plugs(&["p1"]));
    backend.gate("p1");
    let plugs = Arc::clone(&backend);

    let outcome = session(backend, |mut c| async move {
        c.initialize().await;
        c.call(json!(1), "control_smart_plug", json!({ "deviceId": "p1", "state": true }))
            .await;

        let release = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            plugs.release("p1");
        };
        let (rest, ()) = tokio::join!(c.finish(), release);

        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0]["id"], 1);
        assert_eq!(rest[0]["result"]["structuredContent"]["device"]["state"]["on"], true);
    })
    .await;

    assert!(outcome.result.is_ok());
    assert_eq!(outcome.server.state(), ConnectionState::Stopped);
    assert_eq!(
        outcome
            .telemetry
            .counter("protocol.cancelled", &[("tool", "control_smart_plug")]),
        0
    );
}

// =============================================================================
// Framing and notifications
// =============================================================================

#[tokio::test]
async fn line_split_across_call_completion_is_answered() {
    let backend = Arc::new(FakePlugs::with_plugs(&["p1"]));
    backend.gate("p1");
    let plugs = Arc::clone(&backend);

    let outcome = session(backend, |mut c| async move {
        c.initialize().await;
        c.call(json!(1), "control_smart_plug", json!({ "deviceId": "p1", "state": true }))
            .await;
        c.send_partial(r#"{"jsonrpc":"2.0","id":2,"#).await;

        // The call's task completes while the server holds half a line.
        plugs.release("p1");
        assert_eq!(c.recv().await["id"], 1);

        c.send_raw(r#""method":"ping"}"#).await;
        let response = c.recv().await;
        assert_eq!(response["id"], 2);
        assert_eq!(response["result"], json!({}));
    })
    .await;

    assert_eq!(outcome.telemetry.counter("protocol.parse_error", &[]), 0);
}

#[tokio::test]
async fn tool_call_notification_runs_without_reply() {
    let backend = Arc::new(FakePlugs::with_plugs(&["p1"]));
    let spy = Arc::clone(&backend);

    let notify_call = |name: &str, arguments: Value| {
        json!({
            "jsonrpc": "2.0",
            "method": "tools/call",
            "params": { "name": name, "arguments": arguments }
        })
    };

    session(backend, |mut c| async move {
        // Ignored before the handshake.
        c.send(notify_call("control_smart_plug", json!({ "deviceId": "p1", "state": true })))
            .await;

        c.initialize().await;
        c.send(notify_call("control_smart_plug", json!({ "deviceId": "p1", "state": true })))
            .await;
        // Failures are logged, never answered.
        c.send(notify_call("control_smart_plug", json!({ "deviceId": "nope", "state": true })))
            .await;
        c.send(notify_call("not_a_tool", json!({}))).await;

        c.request(json!(1), "ping", json!({})).await;
        assert_eq!(c.recv().await["id"], 1);

        assert!(c.finish().await.is_empty());
    })
    .await;

    // One for p1, one for the unknown device; the unknown tool never dispatches.
    assert_eq!(spy.set_calls(), 2);
}

#[tokio::test]
async fn notifications_and_garbage_get_no_reply() {
    let outcome = session(Arc::new(FakePlugs::default()), |mut c| async move {
        c.send_raw("not json at all").await;
        c.send_raw("").await;
        c.send(json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }))
            .await;
        c.send(json!({ "jsonrpc": "2.0", "method": "notifications/unknown" }))
            .await;
        c.send(json!({ "jsonrpc": "2.0", "method": "notifications/cancelled", "params": { "requestId": 99 } }))
            .await;

        c.request(json!(1), "ping", json!({})).await;
        assert_eq!(c.recv().await["id"], 1);

        // An envelope without a method but with an id is answered.
        c.send(json!({ "jsonrpc": "2.0", "id": 9 })).await;
        let response = c.recv().await;
        assert_eq!(response["id"], 9);
        assert_eq!(error_code(&response), -32600);
    })
    .await;

    assert_eq!(outcome.telemetry.counter("protocol.parse_error", &[]), 2);
}

#[tokio::test]
async fn unknown_method_is_method_not_found() {
    session(Arc::new(FakePlugs::default()), |mut c| async move {
        c.initialize().await;
        c.request(json!(1), "resources/list", json!({})).await;
        let response = c.recv().await;
        assert_eq!(response["id"], 1);
        assert_eq!(error_code(&response), -32601);
    })
    .await;
}
