//! # nimbus-mcp
//!
//! MCP (Model Context Protocol) tool surface for Nimbus.
//!
//! An agent drives Nimbus through eleven tools: classification, validation,
//! gated execution, safety mode, discovery, dependency graphs, impact
//! analysis, pending confirmations and session lifecycle. Messages are
//! JSON-RPC 2.0 over stdio (one message per line) or HTTP (`POST /mcp`).

pub mod error;
pub mod executor;
pub mod http_transport;
pub mod protocol;
pub mod server;
pub mod tools;

pub use error::McpError;
pub use executor::ToolExecutor;
pub use protocol::{CallToolResponse, JsonRpcRequest, JsonRpcResponse, ToolContent, ToolDefinition};
pub use server::McpServer;
pub use tools::ToolRegistry;
