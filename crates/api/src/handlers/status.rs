//! Handler for `GET /status/{job_id}`.

use axum::extract::{Path, State};
use axum::Json;
use shim_comfyui::tracker::StatusReport;
use shim_core::error::CoreError;

use crate::error::{AppError, AppResult};
use crate::middleware::api_key::RequireApiKey;
use crate::state::AppState;

/// GET /status/{job_id} -- observe a job once.
///
/// Returns `{job_id, status, outputs, error}`. Ids unknown both locally and
/// to the engine yield 404.
pub async fn get_status(
    _key: RequireApiKey,
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<Json<StatusReport>> {
    match state.tracker.poll_once(&job_id).await {
        Some(report) => Ok(Json(report)),
        None => Err(AppError::Core(CoreError::NotFound {
            entity: "Job",
            id: job_id,
        })),
    }
}
