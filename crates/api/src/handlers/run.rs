//! Handler for `POST /run`.
//!
//! Accepts `multipart/form-data` (file parts `workflow` and `image`) or an
//! `application/json` body with the same field names (`workflow` inline,
//! `image` base64). All validation happens before the first outbound call.

use std::path::Path;
use std::time::Duration;

use axum::extract::{FromRequest, Multipart, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shim_comfyui::submit::InputAsset;
use shim_comfyui::tracker::StatusReport;
use shim_core::error::CoreError;
use shim_core::job::{JobRecord, JobStatus, OutputDescriptor};
use shim_core::template::{normalize, parse_template, GenerationParams, PlaceholderMap};

use crate::error::{AppError, AppResult};
use crate::middleware::api_key::RequireApiKey;
use crate::state::AppState;

/// Name used for uploads that arrive without a usable file name.
pub const DEFAULT_IMAGE_FILENAME: &str = "input.png";

/// Caller-supplied template.
#[derive(Debug, Clone)]
pub enum InlineWorkflow {
    /// Raw file content from a multipart upload.
    Bytes(Vec<u8>),
    /// Already-parsed JSON body field.
    Json(Value),
}

/// A parsed `/run` request.
#[derive(Debug, Default)]
pub struct RunRequest {
    pub workflow: Option<InlineWorkflow>,
    pub workflow_path: Option<String>,
    pub image: Option<InputAsset>,
    pub image_url: Option<String>,
    pub params: GenerationParams,
    /// Explicit token -> value bindings; applied after `params`.
    pub overrides: PlaceholderMap,
    /// Defaults to `true`.
    pub wait: Option<bool>,
    pub wait_timeout_s: Option<f64>,
    pub client_id: Option<String>,
}

/// What `/run` did with a valid request.
#[derive(Debug)]
pub enum RunOutcome {
    /// Submitted; the caller did not ask to wait.
    Accepted(JobRecord),
    /// Submitted and finished successfully within the wait.
    Finished(StatusReport),
}

#[derive(Debug, Serialize)]
pub struct RunAccepted {
    pub job_id: String,
    pub status: JobStatus,
}

#[derive(Debug, Serialize)]
pub struct RunCompleted {
    pub job_id: String,
    pub status: JobStatus,
    pub outputs: Vec<OutputDescriptor>,
}

impl RunRequest {
    /// Check the request shape. Performs no I/O.
    pub fn validate(&self) -> Result<(), CoreError> {
        match (&self.image, &self.image_url) {
            (None, None) => {
                return Err(CoreError::Validation(
                    "an input image is required: provide `image` or `image_url`".into(),
                ))
            }
            (Some(_), Some(_)) => {
                return Err(CoreError::Validation(
                    "`image` and `image_url` are mutually exclusive".into(),
                ))
            }
            _ => {}
        }

        if self.workflow.is_some() && self.workflow_path.is_some() {
            return Err(CoreError::Validation(
                "`workflow` and `workflow_path` are mutually exclusive".into(),
            ));
        }

        if let Some(url) = &self.image_url {
            let parsed = reqwest::Url::parse(url)
                .map_err(|e| CoreError::Validation(format!("image_url is not a valid URL: {e}")))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(CoreError::Validation(
                    "image_url must use http or https".into(),
                ));
            }
        }

        if let Some(timeout) = self.wait_timeout_s {
            if !timeout.is_finite() || timeout < 0.0 {
                return Err(CoreError::Validation(format!(
                    "wait_timeout_s must be a finite number >= 0, got {timeout}"
                )));
            }
        }

        self.params.validate()
    }

    /// How long to wait for completion, or `None` to return right after
    /// submission.
    pub fn wait_budget(&self, max_wait: Duration) -> Option<Duration> {
        if self.wait == Some(false) {
            return None;
        }
        match self.wait_timeout_s {
            Some(secs) if secs <= 0.0 => None,
            Some(secs) => Some(
                Duration::try_from_secs_f64(secs)
                    .unwrap_or(max_wait)
                    .min(max_wait),
            ),
            None => Some(max_wait),
        }
    }

    async fn from_multipart(mut multipart: Multipart) -> AppResult<Self> {
        let mut request = RunRequest::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AppError::from_rejection(e.status(), e.body_text()))?
        {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "workflow" => {
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|e| AppError::from_rejection(e.status(), e.body_text()))?;
                    if !bytes.is_empty() {
                        request.workflow = Some(InlineWorkflow::Bytes(bytes.to_vec()));
                    }
                }
                "image" => {
                    let filename = upload_filename(field.file_name());
                    let content_type = field.content_type().map(str::to_string);
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|e| AppError::from_rejection(e.status(), e.body_text()))?;
                    if !bytes.is_empty() {
                        request.image = Some(InputAsset {
                            filename,
                            content_type,
                            bytes: bytes.to_vec(),
                        });
                    }
                }
                _ => {
                    let text = field
                        .text()
                        .await
                        .map_err(|e| AppError::from_rejection(e.status(), e.body_text()))?;
                    request.set_text_field(&name, text)?;
                }
            }
        }

        Ok(request)
    }

    /// Apply one textual form field. Blank values count as absent.
    fn set_text_field(&mut self, name: &str, value: String) -> Result<(), CoreError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Ok(());
        }
        match name {
            "workflow_path" => self.workflow_path = Some(trimmed.to_string()),
            "image_url" => self.image_url = Some(trimmed.to_string()),
            "client_id" => self.client_id = Some(trimmed.to_string()),
            "prompt" => self.params.prompt = Some(value),
            "negative_prompt" => self.params.negative_prompt = Some(value),
            "seed" => self.params.seed = Some(parse_field(name, trimmed)?),
            "steps" => self.params.steps = Some(parse_field(name, trimmed)?),
            "num_frames" => self.params.num_frames = Some(parse_field(name, trimmed)?),
            "fps" => self.params.fps = Some(parse_field(name, trimmed)?),
            "width" => self.params.width = Some(parse_field(name, trimmed)?),
            "wait_timeout_s" => self.wait_timeout_s = Some(parse_field(name, trimmed)?),
            "wait" => self.wait = Some(parse_bool(trimmed)?),
            "params" => {
                let parsed: Value = serde_json::from_str(trimmed)
                    .map_err(|e| CoreError::Validation(format!("params is not valid JSON: {e}")))?;
                self.overrides = overrides_from(parsed)?;
            }
            other => tracing::debug!(field = other, "Ignoring unknown form field"),
        }
        Ok(())
    }
}

/// JSON form of a `/run` request.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RunJson {
    workflow: Option<Value>,
    workflow_path: Option<String>,
    /// Base64, optionally as a `data:` URL.
    image: Option<String>,
    image_filename: Option<String>,
    image_url: Option<String>,
    params: Option<Value>,
    #[serde(flatten)]
    generation: GenerationParams,
    wait: Option<bool>,
    wait_timeout_s: Option<f64>,
    client_id: Option<String>,
}

impl TryFrom<RunJson> for RunRequest {
    type Error = CoreError;

    fn try_from(body: RunJson) -> Result<Self, Self::Error> {
        let image = match body.image.as_deref().map(str::trim) {
            Some(encoded) if !encoded.is_empty() => Some(InputAsset {
                filename: upload_filename(body.image_filename.as_deref()),
                content_type: None,
                bytes: decode_base64_image(encoded)?,
            }),
            _ => None,
        };

        Ok(RunRequest {
            workflow: body.workflow.map(InlineWorkflow::Json),
            workflow_path: non_blank(body.workflow_path),
            image,
            image_url: non_blank(body.image_url),
            params: body.generation,
            overrides: body.params.map(overrides_from).transpose()?.unwrap_or_default(),
            wait: body.wait,
            wait_timeout_s: body.wait_timeout_s,
            client_id: non_blank(body.client_id),
        })
    }
}

impl FromRequest<AppState> for RunRequest {
    type Rejection = AppError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("multipart/form-data"));

        if is_multipart {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| AppError::from_rejection(e.status(), e.body_text()))?;
            Self::from_multipart(multipart).await
        } else {
            let Json(body) = Json::<RunJson>::from_request(req, state)
                .await
                .map_err(|e| AppError::from_rejection(e.status(), e.body_text()))?;
            Ok(RunRequest::try_from(body)?)
        }
    }
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// POST /run -- submit a graph and optionally wait for it.
///
/// Returns 202 `{job_id, status}` when not waiting, 200 `{job_id, status,
/// outputs}` on completion, 504 on wait timeout, 502 `JOB_FAILED` when the
/// engine reports an error.
pub async fn run_job(
    _key: RequireApiKey,
    State(state): State<AppState>,
    request: RunRequest,
) -> AppResult<Response> {
    match execute(&state, request).await? {
        RunOutcome::Accepted(record) => Ok((
            StatusCode::ACCEPTED,
            Json(RunAccepted {
                job_id: record.job_id,
                status: record.status,
            }),
        )
            .into_response()),
        RunOutcome::Finished(report) => Ok(Json(RunCompleted {
            job_id: report.job_id,
            status: report.status,
            outputs: report.outputs,
        })
        .into_response()),
    }
}

/// Validate, load the template, submit, and wait if asked to.
///
/// Shared by the HTTP handler and the serverless entry point.
pub async fn execute(state: &AppState, request: RunRequest) -> AppResult<RunOutcome> {
    request.validate()?;
    let wait = request.wait_budget(state.config.max_wait);

    let template = match request.workflow {
        Some(InlineWorkflow::Bytes(bytes)) => parse_template(&bytes)?,
        Some(InlineWorkflow::Json(value)) => normalize(value)?,
        None => {
            state
                .locator
                .resolve_and_load(request.workflow_path.as_deref())
                .await?
        }
    };

    let asset = match (request.image, request.image_url) {
        (Some(asset), _) => Some(asset),
        (None, Some(url)) => {
            Some(fetch_image(&state.http, &url, state.config.max_upload_bytes).await?)
        }
        (None, None) => None,
    };

    let mut tokens = PlaceholderMap::from_params(&request.params);
    tokens.extend(request.overrides);

    let client_id = request.client_id.unwrap_or_else(generate_client_id);
    let record = state
        .submitter
        .submit(&template, tokens, asset, &client_id)
        .await?;

    let Some(wait) = wait else {
        tracing::info!(job_id = %record.job_id, client_id = %client_id, "Returning without waiting");
        return Ok(RunOutcome::Accepted(record));
    };

    let report = state.tracker.await_completion(&record.job_id, wait).await?;
    if report.status == JobStatus::Errored {
        return Err(AppError::JobFailed {
            job_id: report.job_id,
            detail: report
                .error
                .unwrap_or_else(|| "workflow failed".to_string()),
        });
    }
    Ok(RunOutcome::Finished(report))
}

// ---- private helpers ----

/// Decode a base64 image, accepting `data:<mime>;base64,` prefixes.
pub(crate) fn decode_base64_image(encoded: &str) -> Result<Vec<u8>, CoreError> {
    let payload = match encoded.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => encoded,
    };
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| CoreError::Validation(format!("image is not valid base64: {e}")))?;
    if bytes.is_empty() {
        return Err(CoreError::Validation("image is empty".into()));
    }
    Ok(bytes)
}

/// `shim-` followed by 12 hex characters.
pub(crate) fn generate_client_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("shim-{}", &hex[..12])
}

/// Final path component of a caller-supplied file name.
pub(crate) fn upload_filename(raw: Option<&str>) -> String {
    raw.and_then(|name| Path::new(name).file_name())
        .and_then(|name| name.to_str())
        .filter(|name| !name.trim().is_empty())
        .unwrap_or(DEFAULT_IMAGE_FILENAME)
        .to_string()
}

/// Download an `image_url` body of at most `max_bytes`.
async fn fetch_image(http: &reqwest::Client, url: &str, max_bytes: usize) -> AppResult<InputAsset> {
    let fetch_failed = |detail: String| AppError::BadRequest(format!("failed to fetch image_url: {detail}"));

    let too_large = || {
        AppError::Core(CoreError::Validation(format!(
            "image_url body exceeds the {max_bytes} byte limit"
        )))
    };

    let mut response = http
        .get(url)
        .send()
        .await
        .map_err(|e| fetch_failed(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(fetch_failed(format!("HTTP {status}")));
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let filename = upload_filename(
        response
            .url()
            .path_segments()
            .and_then(|mut segments| segments.next_back()),
    );
    if response
        .content_length()
        .is_some_and(|len| len > max_bytes as u64)
    {
        return Err(too_large());
    }

    // Content-Length may be absent or wrong; enforce the cap while reading.
    let mut bytes = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| fetch_failed(e.to_string()))?
    {
        if bytes.len() + chunk.len() > max_bytes {
            return Err(too_large());
        }
        bytes.extend_from_slice(&chunk);
    }
    if bytes.is_empty() {
        return Err(fetch_failed("empty body".into()));
    }

    tracing::debug!(url, filename = %filename, size = bytes.len(), "Fetched remote image");
    Ok(InputAsset {
        filename,
        content_type,
        bytes,
    })
}

fn overrides_from(value: Value) -> Result<PlaceholderMap, CoreError> {
    match value {
        Value::Object(map) => Ok(map.into_iter().collect()),
        Value::Null => Ok(PlaceholderMap::new()),
        other => Err(CoreError::Validation(format!(
            "params must be a JSON object of token -> value, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn parse_field<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, CoreError> {
    raw.parse()
        .map_err(|_| CoreError::Validation(format!("{name} must be a non-negative number, got {raw:?}")))
}

fn parse_bool(raw: &str) -> Result<bool, CoreError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(CoreError::Validation(format!(
            "wait must be a boolean, got {raw:?}"
        ))),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
