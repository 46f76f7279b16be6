//! Primary job storage (system of record).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use piiscan_core::{Job, JobId, merge_tags};

/// Row-oriented job storage with a uniqueness constraint on the job id.
#[async_trait]
pub trait PrimaryStore: Send + Sync {
    /// Insert a new job. A duplicate id yields [`StoreError::AlreadyExists`].
    async fn insert(&self, job: &Job) -> Result<(), StoreError>;

    /// Get a job by id; `None` when absent.
    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    /// Write `job`'s outcome onto the stored job unless the stored job is
    /// terminal or already has that status.
    ///
    /// The check and the write are one atomic step. `logs` and `created_at`
    /// keep their stored values; tags are unioned.
    async fn update(&self, job: &Job) -> Result<StoreUpdate, StoreError>;
}

/// Primary store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("stored job is invalid: {0}")]
    InvalidData(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Result of [`PrimaryStore::update`].
#[derive(Debug, Clone, PartialEq)]
pub enum StoreUpdate {
    /// The incoming state was written; carries the stored job.
    Applied(Job),
    /// Nothing was written; carries the job as stored.
    Unchanged(Job),
}

impl StoreUpdate {
    pub fn job(&self) -> &Job {
        match self {
            StoreUpdate::Applied(job) | StoreUpdate::Unchanged(job) => job,
        }
    }

    pub fn into_job(self) -> Job {
        match self {
            StoreUpdate::Applied(job) | StoreUpdate::Unchanged(job) => job,
        }
    }
}

/// The stored job after applying `incoming`'s mutable fields to `stored`, or
/// `None` when `stored` must not change.
///
/// A terminal job never changes again, and an equal status is a redelivery.
pub fn apply_update(stored: &Job, incoming: &Job) -> Option<Job> {
    if stored.is_terminal() || stored.status() == incoming.status() {
        return None;
    }
    Some(Job {
        id: stored.id,
        version: stored.version,
        tags: merge_tags(&stored.tags, &incoming.tags),
        created_at: stored.created_at,
        logs: stored.logs.clone(),
        state: incoming.state.clone(),
    })
}

/// In-memory primary store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.jobs.read().map(|jobs| jobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All stored jobs, oldest first.
    pub fn all(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .map(|jobs| jobs.values().cloned().collect())
            .unwrap_or_default();
        jobs.sort_by_key(|j| (j.created_at, j.id));
        jobs
    }
}

fn poisoned() -> StoreError {
    StoreError::Storage("in-memory store lock poisoned".into())
}

#[async_trait]
impl PrimaryStore for InMemoryJobStore {
    async fn insert(&self, job: &Job) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().map_err(|_| poisoned())?;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::AlreadyExists(job.id));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        let jobs = self.jobs.read().map_err(|_| poisoned())?;
        Ok(jobs.get(&id).cloned())
    }

    async fn update(&self, job: &Job) -> Result<StoreUpdate, StoreError> {
        let mut jobs = self.jobs.write().map_err(|_| poisoned())?;
        let stored = jobs.get_mut(&job.id).ok_or(StoreError::NotFound(job.id))?;
        match apply_update(stored, job) {
            Some(updated) => {
                *stored = updated;
                Ok(StoreUpdate::Applied(stored.clone()))
            }
            None => Ok(StoreUpdate::Unchanged(stored.clone())),
        }
    }
}

#[async_trait]
impl PrimaryStore for Arc<InMemoryJobStore> {
    async fn insert(&self, job: &Job) -> Result<(), StoreError> {
        (**self).insert(job).await
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        (**self).get(id).await
    }

    async fn update(&self, job: &Job) -> Result<StoreUpdate, StoreError> {
        (**self).update(job).await
    }
}
