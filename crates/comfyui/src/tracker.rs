//! Job status tracking by polling the engine.
//!
//! The engine offers no push channel to this service, so the tracker reads
//! `/history/{id}` and, when that is inconclusive, `/queue`, then folds the
//! observation into the job store. Terminal records are never re-polled.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use shim_core::job::{JobRecord, JobStatus, JobUpdate, OutputDescriptor};
use shim_core::job_store::JobStore;
use shim_core::types::JobId;

use crate::api::ComfyUIApi;
use crate::history::HistoryEntry;

/// Default delay between polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(750);

/// Default time a locally known job may be invisible upstream before it is
/// reported as `unknown`.
pub const DEFAULT_UNKNOWN_GRACE: Duration = Duration::from_secs(30);

/// Polling knobs.
#[derive(Debug, Clone, Copy)]
pub struct TrackerConfig {
    pub poll_interval: Duration,
    pub unknown_grace: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            unknown_grace: DEFAULT_UNKNOWN_GRACE,
        }
    }
}

/// Result of one observation of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub job_id: JobId,
    pub status: JobStatus,
    pub outputs: Vec<OutputDescriptor>,
    pub error: Option<String>,
}

impl StatusReport {
    fn from_record(record: &JobRecord) -> Self {
        Self {
            job_id: record.job_id.clone(),
            status: record.status,
            outputs: record.outputs.clone(),
            error: record.error.clone(),
        }
    }

    fn from_update(job_id: &str, update: JobUpdate) -> Self {
        Self {
            job_id: job_id.to_string(),
            status: update.status,
            outputs: update.outputs,
            error: update.error,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// The local wait ran out. The job keeps running upstream.
    #[error("Timed out after {waited:?} waiting for job {job_id}")]
    Timeout { job_id: JobId, waited: Duration },
}

/// Status stated by a history entry alone: an explicit status, else
/// `completed` when any outputs exist.
pub fn history_status(entry: &HistoryEntry) -> Option<JobStatus> {
    entry
        .explicit_status()
        .or_else(|| entry.has_outputs().then_some(JobStatus::Completed))
}

/// Derive a job's status from one observation.
///
/// Priority: the history entry's own status, then the queue bucket
/// holding the job, then `running` if a history entry exists at all.
/// `None` means the engine shows no trace of the job.
pub fn derive_status(
    history: Option<&HistoryEntry>,
    queue_bucket: Option<JobStatus>,
) -> Option<JobStatus> {
    history
        .and_then(history_status)
        .or(queue_bucket)
        .or_else(|| history.map(|_| JobStatus::Running))
}

/// Follows submitted jobs until they finish.
#[derive(Clone)]
pub struct JobTracker {
    api: Arc<ComfyUIApi>,
    store: Arc<dyn JobStore>,
    config: TrackerConfig,
}

impl JobTracker {
    pub fn new(api: Arc<ComfyUIApi>, store: Arc<dyn JobStore>, config: TrackerConfig) -> Self {
        Self { api, store, config }
    }

    pub fn config(&self) -> TrackerConfig {
        self.config
    }

    /// Observe a job once and record the result.
    ///
    /// Returns `None` only when the job is neither in the local store nor
    /// visible in the engine's history or queue. Engine errors are logged
    /// and count as "no information".
    pub async fn poll_once(&self, job_id: &str) -> Option<StatusReport> {
        let record = self.store.get(job_id).await;
        if let Some(record) = record.as_ref().filter(|r| r.status.is_terminal()) {
            return Some(StatusReport::from_record(record));
        }

        let history = match self.api.get_history(job_id).await {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!(job_id, error = %e, "History poll failed");
                None
            }
        };

        let queue_bucket = if history.as_ref().and_then(history_status).is_some() {
            None
        } else {
            match self.api.get_queue().await {
                Ok(queue) => queue.locate(job_id),
                Err(e) => {
                    tracing::warn!(job_id, error = %e, "Queue poll failed");
                    None
                }
            }
        };

        let status = match (derive_status(history.as_ref(), queue_bucket), &record) {
            (Some(status), _) => status,
            (None, Some(record)) => self.absent_status(record),
            (None, None) => {
                tracing::debug!(job_id, "Job not found locally or upstream");
                return None;
            }
        };

        let update = self.build_update(job_id, status, history.as_ref());

        if record.is_none() {
            return Some(StatusReport::from_update(job_id, update));
        }
        match self.store.update(job_id, update.clone()).await {
            Some(updated) => {
                if updated.status != status {
                    tracing::debug!(
                        job_id,
                        kept = %updated.status,
                        observed = %status,
                        "Ignored observation for finished job",
                    );
                }
                Some(StatusReport::from_record(&updated))
            }
            None => Some(StatusReport::from_update(job_id, update)),
        }
    }

    /// Poll until the job reaches a terminal state or `wait` elapses.
    ///
    /// The deadline only ends the local wait; the job is not cancelled.
    pub async fn await_completion(
        &self,
        job_id: &str,
        wait: Duration,
    ) -> Result<StatusReport, TrackerError> {
        let started = tokio::time::Instant::now();
        let deadline = started + wait;

        loop {
            if let Some(report) = self.poll_once(job_id).await {
                if report.status.is_terminal() {
                    tracing::info!(
                        job_id,
                        status = %report.status,
                        outputs = report.outputs.len(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Job finished",
                    );
                    return Ok(report);
                }
            }

            // Never sleep past the deadline; a deadline reached mid-sleep
            // ends the wait without another poll.
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(Self::timed_out(job_id, wait, started));
            }
            if remaining < self.config.poll_interval {
                tokio::time::sleep(remaining).await;
                return Err(Self::timed_out(job_id, wait, started));
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    // ---- private helpers ----

    fn timed_out(job_id: &str, wait: Duration, started: tokio::time::Instant) -> TrackerError {
        tracing::warn!(job_id, wait_secs = wait.as_secs_f64(), "Wait deadline passed");
        TrackerError::Timeout {
            job_id: job_id.to_string(),
            waited: started.elapsed(),
        }
    }

    fn absent_status(&self, record: &JobRecord) -> JobStatus {
        let age = (chrono::Utc::now() - record.created_at)
            .to_std()
            .unwrap_or_default();
        if age > self.config.unknown_grace {
            JobStatus::Unknown
        } else {
            JobStatus::Running
        }
    }

    fn build_update(
        &self,
        job_id: &str,
        status: JobStatus,
        history: Option<&HistoryEntry>,
    ) -> JobUpdate {
        match status {
            JobStatus::Completed => {
                let outputs = history
                    .map(|entry| entry.output_descriptors(&self.api))
                    .unwrap_or_default();
                if outputs.is_empty() {
                    tracing::warn!(job_id, "Job completed without recognized outputs");
                }
                JobUpdate {
                    status,
                    outputs,
                    error: None,
                }
            }
            JobStatus::Errored => {
                let error = history
                    .and_then(HistoryEntry::error_message)
                    .unwrap_or_else(|| "workflow failed".to_string());
                tracing::warn!(job_id, error = %error, "Job errored");
                JobUpdate {
                    status,
                    outputs: Vec::new(),
                    error: Some(error),
                }
            }
            _ => JobUpdate::status(status),
        }
    }
}
