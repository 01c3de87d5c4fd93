//! Route definitions for job submission and status.
//!
//! All endpoints require the API key.

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{run, status};
use crate::state::AppState;

/// ```text
/// POST   /run                 -> run_job        (body capped at max_upload_bytes)
/// GET    /status/{job_id}     -> get_status
/// ```
pub fn router(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route(
            "/run",
            post(run::run_job).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/status/{job_id}", get(status::get_status))
}
