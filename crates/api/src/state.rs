use std::sync::Arc;

use shim_comfyui::api::{ComfyUIApi, ComfyUIApiError};
use shim_comfyui::submit::JobSubmitter;
use shim_comfyui::tracker::{JobTracker, TrackerConfig};
use shim_core::job_store::{InMemoryJobStore, JobStore};
use shim_core::template::{TemplateLocator, WorkflowRoots};

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Outbound HTTP client (engine calls and `image_url` fetches).
    pub http: reqwest::Client,
    /// Engine REST client.
    pub comfy: Arc<ComfyUIApi>,
    /// Job records for submitted graphs.
    pub store: Arc<dyn JobStore>,
    /// Template resolution bounded by the workflow roots.
    pub locator: Arc<TemplateLocator>,
    pub submitter: JobSubmitter,
    pub tracker: JobTracker,
}

impl AppState {
    /// Wire up state with the in-memory job store.
    pub fn new(config: ServerConfig) -> Result<Self, ComfyUIApiError> {
        Self::with_store(config, Arc::new(InMemoryJobStore::new()))
    }

    /// Wire up state around an existing job store.
    pub fn with_store(
        config: ServerConfig,
        store: Arc<dyn JobStore>,
    ) -> Result<Self, ComfyUIApiError> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()?;
        let comfy = Arc::new(ComfyUIApi::with_client(http.clone(), &config.comfy_api_url)?);

        let roots = WorkflowRoots::new(&config.workflow.roots);
        let mut locator = TemplateLocator::new(roots);
        if let Some(pointer) = &config.workflow.pointer_file {
            locator = locator.with_pointer_file(pointer);
        }
        if let Some(default) = &config.workflow.default_path {
            locator = locator.with_default_path(default);
        }

        let submitter = JobSubmitter::new(Arc::clone(&comfy), Arc::clone(&store));
        let tracker = JobTracker::new(
            Arc::clone(&comfy),
            Arc::clone(&store),
            TrackerConfig {
                poll_interval: config.poll_interval,
                unknown_grace: config.unknown_grace,
            },
        );

        Ok(Self {
            config: Arc::new(config),
            http,
            comfy,
            store,
            locator: Arc::new(locator),
            submitter,
            tracker,
        })
    }
}
