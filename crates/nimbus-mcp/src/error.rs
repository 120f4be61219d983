//! Error types for the MCP crate.

use nimbus_core::CoreError;
use nimbus_graph::{GraphError, RuleError};
use nimbus_runtime::PipelineError;
use thiserror::Error;

/// Errors that can occur in the MCP server.
#[derive(Debug, Error)]
pub enum McpError {
    /// Failed to start the server.
    #[error("failed to start MCP server: {0}")]
    StartupFailed(String),

    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Tool not found.
    #[error("tool not found: {name}")]
    ToolNotFound { name: String },

    /// Invalid arguments for tool.
    #[error("invalid arguments for tool {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// No open session has this id.
    #[error("unknown session: {0}")]
    UnknownSession(String),

    /// The alias store has no entry under this name.
    #[error("unknown alias: {0}")]
    UnknownAlias(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("failed to load relationship rules: {0}")]
    Rules(#[from] RuleError),

    #[error(transparent)]
    Core(#[from] CoreError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl McpError {
    /// Errors in the call itself rather than in what the tool did.
    ///
    /// These become JSON-RPC errors; everything else is reported as a tool
    /// result with `isError` set.
    pub fn is_call_error(&self) -> bool {
        matches!(
            self,
            McpError::InvalidRequest(_)
                | McpError::ToolNotFound { .. }
                | McpError::InvalidArguments { .. }
        )
    }

    pub(crate) fn arguments(tool: &str, reason: impl ToString) -> Self {
        McpError::InvalidArguments {
            tool: tool.to_string(),
            reason: reason.to_string(),
        }
    }
}
