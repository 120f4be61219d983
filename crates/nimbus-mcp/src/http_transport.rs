//! HTTP transport for the MCP server.
//!
//! `POST /mcp` takes one JSON-RPC request and returns its response;
//! `GET /health` is a liveness probe.

use crate::error::McpError;
use crate::protocol::JsonRpcRequest;
use crate::server::McpServer;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Create the HTTP router for MCP.
pub fn create_router(server: Arc<McpServer>) -> Router {
    Router::new()
        .route("/mcp", post(handle_mcp_post))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .with_state(server)
}

/// Handle POST requests to /mcp (JSON-RPC over HTTP).
async fn handle_mcp_post(
    State(server): State<Arc<McpServer>>,
    Json(request): Json<JsonRpcRequest>,
) -> impl IntoResponse {
    if request.id.is_none() {
        server.handle_request(request).await;
        return StatusCode::ACCEPTED.into_response();
    }
    let response = server.handle_request(request).await;
    (StatusCode::OK, Json(response)).into_response()
}

/// Handle health check requests.
async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "nimbus-mcp",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// HTTP server for MCP transport.
pub struct HttpServer {
    address: String,
    server: Arc<McpServer>,
}

impl HttpServer {
    pub fn new(address: impl Into<String>, server: Arc<McpServer>) -> Self {
        Self {
            address: address.into(),
            server,
        }
    }

    /// Run until Ctrl-C.
    pub async fn run(self) -> Result<(), McpError> {
        let app = create_router(self.server);

        let listener = tokio::net::TcpListener::bind(&self.address)
            .await
            .map_err(|e| {
                McpError::StartupFailed(format!("Failed to bind to {}: {}", self.address, e))
            })?;

        tracing::info!(address = %self.address, "MCP HTTP server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| McpError::Internal(e.into()))?;

        tracing::info!("MCP HTTP server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
