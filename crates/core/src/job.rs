//! Job records tracked for submitted graphs.
//!
//! A [`JobRecord`] is created with status `queued` when the engine accepts
//! a graph and is afterwards only changed by the status tracker via
//! [`JobUpdate`]s. Terminal states are sticky.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{JobId, Timestamp};

/// File extensions recognized as images.
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "bmp"];

/// File extensions recognized as videos (animated GIFs count as video).
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mov", "mkv", "avi", "gif"];

/// Derived job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in the engine's queue.
    Queued,
    /// Executing, or assumed in flight.
    Running,
    /// Finished successfully (possibly with no outputs).
    Completed,
    /// Finished with an engine-reported error.
    Errored,
    /// Not seen in history or queue for longer than the grace period.
    Unknown,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Errored)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Errored => "errored",
            JobStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Media kind of an output artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Classify by file extension (case-insensitive).
    pub fn from_filename(filename: &str) -> Option<Self> {
        let (_, ext) = filename.rsplit_once('.')?;
        let ext = ext.to_ascii_lowercase();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Image)
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Video)
        } else {
            None
        }
    }

    /// Classify by the engine's output key (`images`, `gifs`, `videos`).
    pub fn from_output_key(key: &str) -> Option<Self> {
        match key {
            "images" => Some(MediaKind::Image),
            "gifs" | "videos" | "video" => Some(MediaKind::Video),
            _ => None,
        }
    }
}

/// One output artifact of a completed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDescriptor {
    pub filename: String,
    pub subfolder: String,
    /// Engine storage area (`output`, `temp`, ...).
    pub folder_type: String,
    pub kind: MediaKind,
    /// Retrieval locator on the engine (`/view?...`).
    pub url: String,
}

/// A change observed by the tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct JobUpdate {
    pub status: JobStatus,
    pub outputs: Vec<OutputDescriptor>,
    pub error: Option<String>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status,
            outputs: Vec::new(),
            error: None,
        }
    }
}

/// Local bookkeeping for one submitted job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub client_id: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub status: JobStatus,
    pub outputs: Vec<OutputDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobRecord {
    /// A freshly accepted job.
    pub fn queued(job_id: impl Into<JobId>, client_id: impl Into<String>) -> Self {
        let now = chrono::Utc::now();
        Self {
            job_id: job_id.into(),
            client_id: client_id.into(),
            created_at: now,
            updated_at: now,
            status: JobStatus::Queued,
            outputs: Vec::new(),
            error: None,
        }
    }

    /// Apply an observation. Returns `false` (and changes nothing) when the
    /// record is already terminal.
    pub fn apply(&mut self, update: JobUpdate) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = update.status;
        self.outputs = update.outputs;
        self.error = update.error;
        self.updated_at = chrono::Utc::now();
        true
    }
}
