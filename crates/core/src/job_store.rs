//! Job record storage.
//!
//! Request handlers and the tracker only see the [`JobStore`] trait; the
//! process wires in [`InMemoryJobStore`]. Records are kept for the process
//! lifetime. The engine's history is the source of truth after a restart.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::job::{JobRecord, JobUpdate};
use crate::types::JobId;

/// Keyed store for [`JobRecord`]s. Implementations must be safe for
/// concurrent access to different keys; no cross-key ordering is required.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or replace a record.
    async fn put(&self, record: JobRecord);

    /// Fetch a snapshot of a record.
    async fn get(&self, job_id: &str) -> Option<JobRecord>;

    /// Apply an update and return the resulting record, or `None` when the
    /// id is unknown.
    async fn update(&self, job_id: &str, update: JobUpdate) -> Option<JobRecord>;
}

/// Sharded in-memory store.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: DashMap<JobId, JobRecord>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn put(&self, record: JobRecord) {
        self.jobs.insert(record.job_id.clone(), record);
    }

    async fn get(&self, job_id: &str) -> Option<JobRecord> {
        self.jobs.get(job_id).map(|entry| entry.value().clone())
    }

    async fn update(&self, job_id: &str, update: JobUpdate) -> Option<JobRecord> {
        let mut entry = self.jobs.get_mut(job_id)?;
        entry.apply(update);
        Some(entry.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::job::JobStatus;

    #[tokio::test]
    async fn put_then_get() {
        let store = InMemoryJobStore::new();
        store.put(JobRecord::queued("p1", "c1")).await;

        let record = store.get("p1").await.unwrap();
        assert_eq!(record.status, JobStatus::Queued);
        assert_eq!(record.client_id, "c1");
        assert!(store.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn update_unknown_id_returns_none() {
        let store = InMemoryJobStore::new();
        let out = store
            .update("missing", JobUpdate::status(JobStatus::Running))
            .await;
        assert!(out.is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn update_returns_new_snapshot() {
        let store = InMemoryJobStore::new();
        store.put(JobRecord::queued("p1", "c1")).await;

        let updated = store
            .update("p1", JobUpdate::status(JobStatus::Running))
            .await
            .unwrap();

        assert_eq!(updated.status, JobStatus::Running);
        assert_eq!(store.get("p1").await.unwrap().status, JobStatus::Running);
    }

    #[tokio::test]
    async fn concurrent_writers_do_not_interfere() {
        let store = Arc::new(InMemoryJobStore::new());

        let mut handles = Vec::new();
        for i in 0..64 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let id = format!("job-{i}");
                store.put(JobRecord::queued(id.clone(), "c")).await;
                store.update(&id, JobUpdate::status(JobStatus::Running)).await;
                if i % 2 == 0 {
                    store.update(&id, JobUpdate::status(JobStatus::Completed)).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.len(), 64);
        for i in 0..64 {
            let expected = if i % 2 == 0 {
                JobStatus::Completed
            } else {
                JobStatus::Running
            };
            assert_eq!(store.get(&format!("job-{i}")).await.unwrap().status, expected);
        }
    }
}
