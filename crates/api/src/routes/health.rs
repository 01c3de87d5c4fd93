use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Whether the engine answered `/system_stats`.
    pub comfy: bool,
    /// The engine's system stats, when reachable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<serde_json::Value>,
}

/// GET /health -- returns service and engine health.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = match state.comfy.system_stats().await {
        Ok(stats) => Some(stats),
        Err(e) => {
            tracing::warn!(error = %e, "Engine health check failed");
            None
        }
    };

    Json(HealthResponse {
        status: if stats.is_some() { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        comfy: stats.is_some(),
        stats,
    })
}

/// Mount health check routes. No API key is required.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
