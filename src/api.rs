//! Run-id HTTP service
//!
//! Hands out the identifier of the current server incarnation so clients
//! can tell whether their locally saved conversation predates a restart.

use axum::{extract::State, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

/// =============================
/// Response Models
/// =============================

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunIdResponse {
    pub run_id: String,
}

/// =============================
/// Shared State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub run_id: Arc<str>,
}

impl ApiState {
    pub fn new(run_id: impl Into<Arc<str>>) -> Self {
        Self { run_id: run_id.into() }
    }
}

/// Fresh opaque run id, one per process start.
pub fn generate_run_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// =============================
/// Handlers
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn run_id(State(state): State<ApiState>) -> Json<RunIdResponse> {
    Json(RunIdResponse {
        run_id: state.run_id.to_string(),
    })
}

/// =============================
/// Router
/// =============================

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/run-id", get(run_id))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    state: ApiState,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(state.clone());

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!(run_id = %state.run_id, "Run-id server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}/api/run-id", port);

    axum::serve(listener, router).await?;

    Ok(())
}
