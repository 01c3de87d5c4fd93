use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use shim_comfyui::api::ComfyUIApiError;
use shim_comfyui::tracker::TrackerError;
use shim_core::error::CoreError;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and the engine client's errors,
/// and adds HTTP-specific variants. Implements [`IntoResponse`] to produce
/// consistent `{"error", "code"}` JSON bodies, plus `job_id` when a job
/// was already submitted.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `shim_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The engine rejected a call or could not be reached.
    #[error(transparent)]
    Engine(#[from] ComfyUIApiError),

    /// The blocking wait ran out before the job finished.
    #[error(transparent)]
    Tracker(#[from] TrackerError),

    /// The engine reported the job as errored.
    #[error("Job {job_id} failed: {detail}")]
    JobFailed { job_id: String, detail: String },

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The request body exceeded the upload cap.
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// The API key is required but none is configured.
    #[error("API key required but not configured")]
    AuthNotConfigured,

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        self.classify().1
    }

    /// Client-facing message; internal details are replaced.
    pub fn public_message(&self) -> String {
        self.classify().2
    }

    /// Id of the submitted job this error relates to, if any.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            AppError::Tracker(TrackerError::Timeout { job_id, .. }) => Some(job_id),
            AppError::JobFailed { job_id, .. } => Some(job_id),
            _ => None,
        }
    }

    fn classify(&self) -> (StatusCode, &'static str, String) {
        match self {
            // --- CoreError variants ---
            AppError::Core(core) => match core {
                CoreError::NotFound { entity, id } => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("{entity} {id} not found"),
                ),
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::Unauthorized(msg) => {
                    (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone())
                }
                CoreError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone()),
                CoreError::InvalidFormat(msg) => (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "INVALID_FORMAT",
                    msg.clone(),
                ),
                CoreError::UnsupportedFormat(msg) => (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "UNSUPPORTED_FORMAT",
                    msg.clone(),
                ),
                CoreError::Internal(_) => internal(),
            },

            // --- Engine errors ---
            AppError::Engine(ComfyUIApiError::InvalidUrl(_)) => internal(),
            AppError::Engine(err) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", err.to_string()),

            // --- Job outcome errors ---
            AppError::Tracker(TrackerError::Timeout { job_id, waited }) => (
                StatusCode::GATEWAY_TIMEOUT,
                "TIMEOUT",
                format!(
                    "Timed out after {:.1}s waiting for job {job_id}",
                    waited.as_secs_f64()
                ),
            ),
            AppError::JobFailed { job_id, detail } => (
                StatusCode::BAD_GATEWAY,
                "JOB_FAILED",
                format!("Job {job_id} failed: {detail}"),
            ),

            // --- HTTP-specific errors ---
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::PayloadTooLarge(msg) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "PAYLOAD_TOO_LARGE",
                msg.clone(),
            ),
            AppError::AuthNotConfigured => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "AUTH_NOT_CONFIGURED",
                "API key authentication is required but not configured".to_string(),
            ),
            AppError::InternalError(_) => internal(),
        }
    }
}

impl AppError {
    /// Map an extractor rejection, keeping a 413 as [`AppError::PayloadTooLarge`].
    pub fn from_rejection(status: StatusCode, body: String) -> Self {
        if status == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::PayloadTooLarge(body)
        } else {
            AppError::BadRequest(body)
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.classify();
        let job_id = self.job_id();

        // Internal details are logged here and never sent to the client.
        if status.is_server_error() {
            tracing::error!(job_id, code, error = %self, "Request failed");
        } else {
            tracing::debug!(job_id, code, error = %self, "Request rejected");
        }

        let mut body = json!({
            "error": message,
            "code": code,
        });
        if let Some(job_id) = job_id {
            body["job_id"] = json!(job_id);
        }

        (status, axum::Json(body)).into_response()
    }
}

fn internal() -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}
