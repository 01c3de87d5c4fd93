pub mod health;
pub mod jobs;

use axum::Router;

use crate::config::ServerConfig;
use crate::state::AppState;

/// Build the route tree.
///
/// ```text
/// /health                  engine reachability (open)
/// /run                     submit a job (API key)
/// /status/{job_id}         poll a job (API key)
/// ```
pub fn api_routes(config: &ServerConfig) -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(jobs::router(config.max_upload_bytes))
}
