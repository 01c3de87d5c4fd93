//! Serverless job-envelope entry point.
//!
//! Queue-driven platforms hand the worker a `{"id": ..., "input": {...}}`
//! envelope and expect a JSON result back, with failures reported as an
//! `{"error": ...}` object rather than an exception. [`handle`] runs such a
//! job through the same path as `POST /run` and always waits.

use std::time::Instant;

use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Value};
use shim_comfyui::submit::InputAsset;
use shim_core::error::CoreError;
use shim_core::template::GenerationParams;

use crate::error::{AppError, AppResult};
use crate::handlers::run::{
    decode_base64_image, execute, upload_filename, InlineWorkflow, RunOutcome, RunRequest,
};
use crate::state::AppState;

pub const DEFAULT_PROMPT: &str = "high quality video, smooth motion";
pub const DEFAULT_NEGATIVE_PROMPT: &str = "static, blurry, low quality";
pub const DEFAULT_RESOLUTION: u32 = 832;
pub const DEFAULT_LENGTH: u32 = 25;

/// The `input` object of a job envelope.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JobInput {
    /// Base64 source image.
    image: Option<String>,
    image_name: Option<String>,
    image_url: Option<String>,
    prompt: Option<String>,
    negative_prompt: Option<String>,
    #[serde(alias = "width")]
    resolution: Option<u32>,
    #[serde(alias = "num_frames")]
    length: Option<u32>,
    seed: Option<u64>,
    steps: Option<u32>,
    fps: Option<u32>,
    workflow: Option<Value>,
    workflow_path: Option<String>,
    params: Option<serde_json::Map<String, Value>>,
    wait_timeout_s: Option<f64>,
    client_id: Option<String>,
    /// Embed output files in the result. On by default: the `/view`
    /// locators point at the worker-local engine.
    #[serde(default = "embed_outputs")]
    return_base64: bool,
}

fn embed_outputs() -> bool {
    true
}

impl JobInput {
    fn into_run_request(self) -> Result<(RunRequest, bool), CoreError> {
        let image = match self.image.as_deref().map(str::trim) {
            Some(encoded) if !encoded.is_empty() => Some(InputAsset {
                filename: upload_filename(self.image_name.as_deref()),
                content_type: None,
                bytes: decode_base64_image(encoded)?,
            }),
            _ => None,
        };

        let request = RunRequest {
            workflow: self.workflow.map(InlineWorkflow::Json),
            workflow_path: self.workflow_path,
            image,
            image_url: self.image_url,
            params: GenerationParams {
                prompt: Some(self.prompt.unwrap_or_else(|| DEFAULT_PROMPT.to_string())),
                negative_prompt: Some(
                    self.negative_prompt
                        .unwrap_or_else(|| DEFAULT_NEGATIVE_PROMPT.to_string()),
                ),
                seed: self.seed,
                steps: self.steps,
                num_frames: Some(self.length.unwrap_or(DEFAULT_LENGTH)),
                fps: self.fps,
                width: Some(self.resolution.unwrap_or(DEFAULT_RESOLUTION)),
            },
            overrides: self.params.unwrap_or_default().into_iter().collect(),
            wait: Some(true),
            wait_timeout_s: self.wait_timeout_s,
            client_id: self.client_id,
        };
        Ok((request, self.return_base64))
    }
}

/// Run one job envelope to completion.
///
/// Never fails: errors come back as `{"error", "code"[, "job_id"]}`.
pub async fn handle(state: &AppState, job: Value) -> Value {
    let started = Instant::now();
    let envelope_id = job.get("id").and_then(Value::as_str).map(str::to_string);

    match run(state, job).await {
        Ok(mut result) => {
            result["execution_time"] = json!(started.elapsed().as_secs_f64());
            result
        }
        Err(e) => {
            tracing::warn!(
                envelope_id = envelope_id.as_deref(),
                job_id = e.job_id(),
                error = %e,
                "Serverless job failed",
            );
            let mut body = json!({
                "error": e.public_message(),
                "code": e.code(),
            });
            if let Some(job_id) = e.job_id() {
                body["job_id"] = json!(job_id);
            }
            body
        }
    }
}

async fn run(state: &AppState, mut job: Value) -> AppResult<Value> {
    let input = match job.get_mut("input").map(Value::take) {
        Some(Value::Object(input)) => input,
        Some(_) => {
            return Err(AppError::BadRequest("`input` must be an object".into()));
        }
        None => return Err(AppError::BadRequest("missing `input`".into())),
    };
    let input: JobInput = serde_json::from_value(Value::Object(input))
        .map_err(|e| AppError::BadRequest(format!("invalid input: {e}")))?;

    let (request, return_base64) = input.into_run_request()?;

    match execute(state, request).await? {
        RunOutcome::Accepted(record) => Ok(json!({
            "job_id": record.job_id,
            "status": record.status,
        })),
        RunOutcome::Finished(report) => {
            let mut outputs = Vec::with_capacity(report.outputs.len());
            for descriptor in &report.outputs {
                let mut item = serde_json::to_value(descriptor)
                    .map_err(|e| AppError::InternalError(e.to_string()))?;
                if return_base64 {
                    match state.comfy.download(&descriptor.url).await {
                        Ok(bytes) => {
                            item["base64"] =
                                json!(base64::engine::general_purpose::STANDARD.encode(bytes));
                        }
                        Err(e) => tracing::warn!(
                            job_id = %report.job_id,
                            filename = %descriptor.filename,
                            error = %e,
                            "Failed to download output",
                        ),
                    }
                }
                outputs.push(item);
            }

            Ok(json!({
                "job_id": report.job_id,
                "status": report.status,
                "outputs": outputs,
            }))
        }
    }
}
