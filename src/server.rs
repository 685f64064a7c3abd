//! HTTP transport for the tool surface.
//!
//! A thin shell over the [`ToolRegistry`](crate::tools::ToolRegistry):
//! every tool is reachable as `POST /tools/{name}` with a JSON body and
//! answers with the standard `{ok, data | error_code, message, suggestion}`
//! envelope, so transport errors and tool errors look the same to clients.
//!
//! | Method | Path            | Description                        |
//! |--------|-----------------|------------------------------------|
//! | `GET`  | `/tools`        | List tool names and schemas        |
//! | `POST` | `/tools/{name}` | Invoke a tool                      |
//! | `GET`  | `/health`       | Liveness + engine health summary   |
//!
//! CORS is wide open to support browser-based clients.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::engine::Engine;
use crate::error::Result;
use crate::tools::{ToolContext, ToolRegistry};

#[derive(Clone)]
struct AppState {
    engine: Arc<Engine>,
    registry: Arc<ToolRegistry>,
}

/// Serve the tool surface until the process is terminated.
pub async fn run_server(engine: Arc<Engine>) -> Result<()> {
    let bind_addr = engine.config.server.bind.clone();

    let state = AppState {
        engine,
        registry: Arc::new(ToolRegistry::builtin()),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/tools", get(handle_list_tools))
        .route("/tools/{name}", post(handle_tool_call))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    info!(bind = %bind_addr, "tool server listening");

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| crate::error::EngineError::Config(format!("cannot bind {}: {}", bind_addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| crate::error::EngineError::Config(format!("server error: {}", e)))?;

    Ok(())
}

async fn handle_list_tools(State(state): State<AppState>) -> Json<Value> {
    let tools: Vec<Value> = state
        .registry
        .tools()
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name(),
                "description": tool.description(),
                "parameters": tool.parameters_schema(),
            })
        })
        .collect();
    Json(json!({ "tools": tools }))
}

async fn handle_tool_call(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Option<Json<Value>>,
) -> Json<Value> {
    let params = body.map(|Json(v)| v).unwrap_or(Value::Null);
    let ctx = ToolContext::new(Arc::clone(&state.engine));
    let envelope = state.registry.dispatch(&name, params, &ctx).await;
    Json(envelope)
}

async fn handle_health(State(state): State<AppState>) -> Json<Value> {
    let embedder_healthy = state.engine.embedder.health().await;
    let sync = state.engine.sync.status();
    Json(json!({
        "status": if embedder_healthy { "ok" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "embedder_healthy": embedder_healthy,
        "sync": serde_json::to_value(sync).unwrap_or(Value::Null),
    }))
}
