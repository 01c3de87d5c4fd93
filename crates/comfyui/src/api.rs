//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps graph submission, history and queue retrieval, input image upload,
//! system stats and output download using [`reqwest`].

use reqwest::multipart::{Form, Part};
use reqwest::Url;
use serde::Deserialize;

use crate::history::HistoryEntry;
use crate::queue::QueueSnapshot;

/// HTTP client for a single ComfyUI instance.
#[derive(Debug, Clone)]
pub struct ComfyUIApi {
    client: reqwest::Client,
    base: Url,
}

/// Accepted submission, as reported by `POST /prompt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    pub prompt_id: String,
    /// Position in the execution queue, when reported.
    pub number: Option<i64>,
}

/// Stored input image, as reported by `POST /upload/image`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UploadedImage {
    pub name: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default)]
    pub folder_type: String,
}

impl UploadedImage {
    /// Name a graph must use to reference the upload: `subfolder/name`
    /// when the engine placed it in a subfolder, otherwise `name`.
    pub fn storage_name(&self) -> String {
        if self.subfolder.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.subfolder, self.name)
        }
    }
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI returned a non-2xx status code.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// `/prompt` answered 2xx without a prompt id.
    #[error("ComfyUI did not return a prompt_id: {body}")]
    MissingPromptId { body: String },

    /// A response body did not have the expected shape.
    #[error("Unexpected ComfyUI response: {0}")]
    Decode(#[from] serde_json::Error),

    /// The configured base URL cannot address engine endpoints.
    #[error("Invalid ComfyUI URL: {0}")]
    InvalidUrl(String),
}

impl ComfyUIApi {
    /// Create an API client for a ComfyUI instance.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8188`.
    pub fn new(api_url: &str) -> Result<Self, ComfyUIApiError> {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`], so
    /// that its timeout and connection pool apply to engine calls.
    pub fn with_client(client: reqwest::Client, api_url: &str) -> Result<Self, ComfyUIApiError> {
        let base = Url::parse(api_url.trim_end_matches('/'))
            .map_err(|e| ComfyUIApiError::InvalidUrl(format!("{api_url}: {e}")))?;
        if !matches!(base.scheme(), "http" | "https") || base.cannot_be_a_base() {
            return Err(ComfyUIApiError::InvalidUrl(api_url.to_string()));
        }
        Ok(Self { client, base })
    }

    /// Base URL of the engine.
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Submit a graph for execution.
    ///
    /// Sends `POST /prompt` with the API-format graph and client id. The
    /// engine has used both `prompt_id` and `promptId` for the identifier.
    pub async fn submit_workflow(
        &self,
        workflow: &serde_json::Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": client_id,
        });

        let response = self
            .client
            .post(self.endpoint(&["prompt"])?)
            .json(&body)
            .send()
            .await?;

        let value: serde_json::Value = Self::parse_response(response).await?;
        let prompt_id = value
            .get("prompt_id")
            .or_else(|| value.get("promptId"))
            .and_then(|id| match id {
                serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            });

        match prompt_id {
            Some(prompt_id) => Ok(SubmitResponse {
                prompt_id,
                number: value.get("number").and_then(|n| n.as_i64()),
            }),
            None => Err(ComfyUIApiError::MissingPromptId {
                body: value.to_string(),
            }),
        }
    }

    /// Retrieve the history entry for a prompt.
    ///
    /// Sends `GET /history/{prompt_id}`. The engine answers with an object
    /// keyed by prompt id, empty until the prompt has started executing.
    pub async fn get_history(
        &self,
        prompt_id: &str,
    ) -> Result<Option<HistoryEntry>, ComfyUIApiError> {
        let response = self
            .client
            .get(self.endpoint(&["history", prompt_id])?)
            .send()
            .await?;

        let mut value: serde_json::Value = Self::parse_response(response).await?;
        match value.as_object_mut().and_then(|all| all.remove(prompt_id)) {
            Some(entry) => Ok(Some(serde_json::from_value(entry)?)),
            None => Ok(None),
        }
    }

    /// Snapshot of the engine's execution queue (`GET /queue`).
    pub async fn get_queue(&self) -> Result<QueueSnapshot, ComfyUIApiError> {
        let response = self.client.get(self.endpoint(&["queue"])?).send().await?;
        Self::parse_response(response).await
    }

    /// Upload an input image (`POST /upload/image`, multipart).
    ///
    /// Existing files with the same name are overwritten.
    pub async fn upload_image(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        content_type: Option<&str>,
    ) -> Result<UploadedImage, ComfyUIApiError> {
        let mut part = Part::bytes(bytes).file_name(filename.to_string());
        if let Some(content_type) = content_type {
            part = part.mime_str(content_type)?;
        }
        let form = Form::new().part("image", part).text("overwrite", "true");

        let response = self
            .client
            .post(self.endpoint(&["upload", "image"])?)
            .multipart(form)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Engine device and memory stats (`GET /system_stats`).
    pub async fn system_stats(&self) -> Result<serde_json::Value, ComfyUIApiError> {
        let response = self
            .client
            .get(self.endpoint(&["system_stats"])?)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Retrieval locator for an output file on the engine.
    pub fn view_url(&self, filename: &str, subfolder: &str, folder_type: &str) -> String {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("view");
        }
        url.query_pairs_mut()
            .append_pair("filename", filename)
            .append_pair("subfolder", subfolder)
            .append_pair("type", folder_type);
        url.to_string()
    }

    /// Download the bytes behind a [`view_url`](Self::view_url) locator.
    pub async fn download(&self, url: &str) -> Result<Vec<u8>, ComfyUIApiError> {
        let response = self.client.get(url).send().await?;
        let response = Self::ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    // ---- private helpers ----

    /// Build an endpoint URL below the base, percent-encoding each segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ComfyUIApiError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ComfyUIApiError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ComfyUIApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}
