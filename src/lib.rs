//! smartplug-mcp: MCP server for AI-assisted smart-plug control
//!
//! This library exposes a small, fixed set of smart-plug operations to a
//! tool-calling AI client over the Model Context Protocol, and translates
//! those calls into a vendor smart-home cloud API.
//!
//! # Architecture
//!
//! - **Protocol engine**: handshake, connection lifecycle, message
//!   correlation, cancellation and serialised output
//! - **Tool dispatcher**: validates arguments against each tool's declared
//!   schema, runs the tool, and maps every failure to a protocol error
//! - **Device backend**: `list`/`get`/`set` against the vendor API with a
//!   refreshable bearer credential
//!
//! The tools:
//! - `list_smart_plugs`
//! - `get_smart_plug_state`
//! - `control_smart_plug`
//!
//! # Modules
//!
//! - [`backend`] - Vendor API access and credentials
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Error types
//! - [`mcp`] - MCP protocol implementation
//! - [`telemetry`] - Counters, gauges and structured log lines
//! - [`tools`] - Tool catalogue, validation and dispatch

pub mod backend;
pub mod config;
pub mod error;
pub mod mcp;
pub mod telemetry;
pub mod tools;
