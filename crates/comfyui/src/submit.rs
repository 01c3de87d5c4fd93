//! Graph submission.

use std::sync::Arc;

use shim_core::job::JobRecord;
use shim_core::job_store::JobStore;
use shim_core::template::{placeholders, substitute, GraphTemplate, PlaceholderMap};

use crate::api::{ComfyUIApi, ComfyUIApiError};

/// Input image to upload before submission.
#[derive(Debug, Clone)]
pub struct InputAsset {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Uploads inputs, fills placeholders, and enqueues graphs on the engine.
#[derive(Clone)]
pub struct JobSubmitter {
    api: Arc<ComfyUIApi>,
    store: Arc<dyn JobStore>,
}

impl JobSubmitter {
    pub fn new(api: Arc<ComfyUIApi>, store: Arc<dyn JobStore>) -> Self {
        Self { api, store }
    }

    /// Submit `template` with `tokens` applied.
    ///
    /// When `asset` is given it is uploaded first and its storage name is
    /// bound to `__INPUT_IMAGE_FILENAME__`, overriding any caller value.
    /// Failures are returned as-is and never retried. On success a `queued`
    /// record is stored and returned.
    pub async fn submit(
        &self,
        template: &GraphTemplate,
        mut tokens: PlaceholderMap,
        asset: Option<InputAsset>,
        client_id: &str,
    ) -> Result<JobRecord, ComfyUIApiError> {
        if let Some(asset) = asset {
            let size = asset.bytes.len();
            let uploaded = self
                .api
                .upload_image(asset.bytes, &asset.filename, asset.content_type.as_deref())
                .await?;
            let storage_name = uploaded.storage_name();
            tracing::debug!(
                client_id,
                filename = %asset.filename,
                storage_name = %storage_name,
                size,
                "Uploaded input image",
            );
            tokens.insert(placeholders::INPUT_IMAGE_FILENAME, storage_name);
        }

        let graph = substitute(template, &tokens);
        let accepted = self
            .api
            .submit_workflow(&graph.to_value(), client_id)
            .await?;

        let record = JobRecord::queued(accepted.prompt_id, client_id);
        self.store.put(record.clone()).await;

        tracing::info!(
            job_id = %record.job_id,
            client_id,
            nodes = graph.len(),
            queue_number = ?accepted.number,
            "Graph submitted",
        );
        Ok(record)
    }
}
