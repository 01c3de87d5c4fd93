//! Queue snapshots returned by `GET /queue`.

use serde::Deserialize;
use serde_json::Value;
use shim_core::job::JobStatus;

/// Buckets checked for a prompt id, with the status each one implies.
/// Running buckets are checked first.
const BUCKETS: &[(&str, JobStatus)] = &[
    ("queue_running", JobStatus::Running),
    ("running", JobStatus::Running),
    ("queue_pending", JobStatus::Queued),
    ("queue", JobStatus::Queued),
];

/// Raw queue state. Entries are either `[number, prompt_id, graph, ...]`
/// tuples or objects carrying `id`/`prompt_id`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct QueueSnapshot(pub Value);

impl QueueSnapshot {
    /// Status implied by the bucket holding `prompt_id`, if any.
    pub fn locate(&self, prompt_id: &str) -> Option<JobStatus> {
        BUCKETS.iter().find_map(|(bucket, status)| {
            let entries = self.0.get(*bucket)?.as_array()?;
            entries
                .iter()
                .any(|entry| entry_matches(entry, prompt_id))
                .then_some(*status)
        })
    }
}

fn entry_matches(entry: &Value, prompt_id: &str) -> bool {
    match entry {
        Value::Object(map) => ["id", "prompt_id"]
            .iter()
            .any(|key| map.get(*key).and_then(Value::as_str) == Some(prompt_id)),
        Value::Array(items) => items.iter().any(|item| item.as_str() == Some(prompt_id)),
        _ => false,
    }
}
