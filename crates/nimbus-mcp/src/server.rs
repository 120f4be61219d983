//! MCP server implementation.
//!
//! Handles the JSON-RPC methods and dispatches tool calls to the
//! [`ToolExecutor`].

use crate::error::McpError;
use crate::executor::ToolExecutor;
use crate::http_transport::HttpServer;
use crate::protocol::*;
use crate::tools::ToolRegistry;
use nimbus_core::config::{McpConfig, NimbusConfig, Transport};
use nimbus_core::AliasResolver;
use nimbus_runtime::CloudTransport;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// The MCP server.
pub struct McpServer {
    config: McpConfig,
    tools: ToolRegistry,
    executor: ToolExecutor,
}

impl McpServer {
    /// Create a server exposing the built-in tools.
    pub fn new(config: McpConfig, executor: ToolExecutor) -> Self {
        Self {
            config,
            tools: ToolRegistry::builtin(),
            executor,
        }
    }

    /// Wire a server from configuration, a transport and an alias store.
    pub fn from_config(
        config: &NimbusConfig,
        transport: Arc<dyn CloudTransport>,
        aliases: Arc<dyn AliasResolver>,
    ) -> Result<Self, McpError> {
        let executor = ToolExecutor::from_config(config, transport, aliases)?;
        Ok(Self::new(config.mcp.clone(), executor))
    }

    pub fn config(&self) -> &McpConfig {
        &self.config
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn executor(&self) -> &ToolExecutor {
        &self.executor
    }

    /// Start the MCP server on the configured transport.
    pub async fn run(self) -> Result<(), McpError> {
        let transport = self.config.transport.clone();
        match transport {
            Transport::Stdio => self.run_stdio().await,
            Transport::Http => self.run_http().await,
        }
    }

    /// Serve newline-delimited JSON-RPC on stdin/stdout until stdin closes.
    async fn run_stdio(&self) -> Result<(), McpError> {
        tracing::info!(tools = self.tools.len(), "Starting MCP server with stdio transport");

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();

        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let response = match serde_json::from_str::<JsonRpcRequest>(line) {
                Ok(request) => {
                    // Notifications get no reply.
                    if request.id.is_none() {
                        self.handle_request(request).await;
                        continue;
                    }
                    self.handle_request(request).await
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Unparseable JSON-RPC message");
                    JsonRpcResponse::error(None, PARSE_ERROR, format!("Parse error: {}", e))
                }
            };

            let mut response_json = serde_json::to_string(&response)?;
            response_json.push('\n');
            stdout.write_all(response_json.as_bytes()).await?;
            stdout.flush().await?;
        }

        tracing::info!("stdin closed, MCP server stopping");
        self.executor.close_sessions();
        Ok(())
    }

    /// Serve JSON-RPC over HTTP until interrupted.
    pub async fn run_http(self) -> Result<(), McpError> {
        let address = self.config.bind_address();
        tracing::info!(address = %address, "Starting MCP server with HTTP transport");
        HttpServer::new(address, Arc::new(self)).run().await
    }

    /// Handle a JSON-RPC request.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();

        match request.method.as_str() {
            "initialize" => self.handle_initialize(id),
            "initialized" | "notifications/initialized" => {
                JsonRpcResponse::success(id, json!({}))
            }
            "tools/list" => self.handle_list_tools(id),
            "tools/call" => self.handle_call_tool(id, request.params).await,
            "shutdown" => self.handle_shutdown(id),
            _ => JsonRpcResponse::error(
                id,
                METHOD_NOT_FOUND,
                format!("Method not found: {}", request.method),
            ),
        }
    }

    fn handle_initialize(&self, id: Option<Value>) -> JsonRpcResponse {
        let result = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "serverInfo": {
                "name": "nimbus-mcp",
                "version": env!("CARGO_PKG_VERSION")
            },
            "capabilities": {
                "tools": {
                    "listChanged": false
                }
            }
        });
        JsonRpcResponse::success(id, result)
    }

    fn handle_list_tools(&self, id: Option<Value>) -> JsonRpcResponse {
        let tools: Vec<_> = self
            .tools
            .list()
            .into_iter()
            .map(|t| serde_json::to_value(t).unwrap_or(Value::Null))
            .collect();
        JsonRpcResponse::success(id, json!({ "tools": tools }))
    }

    async fn handle_call_tool(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let params: CallToolParams = match params {
            Some(p) => match serde_json::from_value(p) {
                Ok(params) => params,
                Err(e) => {
                    return JsonRpcResponse::error(
                        id,
                        INVALID_PARAMS,
                        format!("Invalid params: {}", e),
                    );
                }
            },
            None => return JsonRpcResponse::error(id, INVALID_PARAMS, "Missing params"),
        };

        if !self.tools.contains(&params.name) {
            return JsonRpcResponse::error(
                id,
                INVALID_PARAMS,
                format!("Tool not found: {}", params.name),
            );
        }

        match self.executor.execute(&params.name, params.arguments).await {
            Ok(result) => JsonRpcResponse::success(id, result.into_value()),
            Err(e) if e.is_call_error() => JsonRpcResponse::error(id, INVALID_PARAMS, e.to_string()),
            Err(e) => {
                tracing::warn!(tool = %params.name, error = %e, "Tool call failed");
                let result = CallToolResponse::failure(e.to_string(), None);
                JsonRpcResponse::success(id, result.into_value())
            }
        }
    }

    fn handle_shutdown(&self, id: Option<Value>) -> JsonRpcResponse {
        let closed = self.executor.close_sessions();
        tracing::info!(sessions = closed, "MCP server shutdown requested");
        JsonRpcResponse::success(id, json!(null))
    }
}
