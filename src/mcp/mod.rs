//! Model Context Protocol (MCP) server implementation.
//!
//! This module implements the MCP specification for exposing smart-plug
//! control as tools to AI assistants. The server communicates over stdio
//! transport using newline-delimited JSON-RPC 2.0 messages.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          MCP Server                          │
//! │                                                              │
//! │   ┌─────────────┐    ┌─────────────┐    ┌──────────────┐     │
//! │   │  Transport  │───▶│   Engine    │───▶│  Dispatcher  │     │
//! │   │   (stdio)   │    │ (lifecycle) │    │   (tools)    │     │
//! │   └─────────────┘    └─────────────┘    └──────────────┘     │
//! │          ▲                  │                   │            │
//! │          │                  ▼                   ▼            │
//! │   ┌─────────────┐    ┌─────────────┐    ┌──────────────┐     │
//! │   │   Writer    │◀───│  Responses  │    │   Backend    │     │
//! │   │   (task)    │    │  (channel)  │    │ (vendor API) │     │
//! │   └─────────────┘    └─────────────┘    └──────────────┘     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Protocol Version
//!
//! The server speaks MCP revisions 2024-11-05 through 2025-06-18 and answers
//! other revisions of the same year with the newest one.

pub mod protocol;
pub mod server;
pub mod transport;

pub use protocol::{JsonRpcErrorData, JsonRpcRequest, JsonRpcResponse, MCP_PROTOCOL_VERSION};
pub use server::{ConnectionState, McpServer};
pub use transport::{LineReader, LineWriter};
