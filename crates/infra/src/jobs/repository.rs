//! Job Repository: primary store plus search index.
//!
//! The primary store is the system of record. The search index answers
//! listings and free-text search and is written best-effort after the
//! primary write; a failed index write surfaces as
//! [`RepositoryError::SearchConsistency`] and never rolls the primary back.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::{debug, instrument};

use piiscan_core::{DomainError, Job, JobFilter, JobId, JobStatus, Pagination, SearchTerm};

use super::store::{PrimaryStore, StoreError, StoreUpdate};
use crate::search::{SearchError, SearchIndex, job_document};

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),

    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("invalid job data: {0}")]
    InvalidData(String),

    #[error(transparent)]
    Validation(#[from] DomainError),

    #[error("primary store error: {0}")]
    Store(StoreError),

    #[error("search index error: {0}")]
    Search(#[from] SearchError),

    /// The primary write committed but the index write did not.
    #[error("job {job_id} is stored but its search document is stale: {source}")]
    SearchConsistency {
        job_id: JobId,
        #[source]
        source: SearchError,
    },
}

impl From<StoreError> for RepositoryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AlreadyExists(id) => RepositoryError::AlreadyExists(id),
            StoreError::NotFound(id) => RepositoryError::NotFound(id),
            StoreError::InvalidData(msg) => RepositoryError::InvalidData(msg),
            other => RepositoryError::Store(other),
        }
    }
}

/// Dual-destination job persistence.
#[derive(Clone)]
pub struct JobRepository {
    store: Arc<dyn PrimaryStore>,
    index: Arc<dyn SearchIndex>,
    max_logs_per_job: usize,
}

impl std::fmt::Debug for JobRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRepository")
            .field("max_logs_per_job", &self.max_logs_per_job)
            .finish_non_exhaustive()
    }
}

impl JobRepository {
    pub fn new(
        store: Arc<dyn PrimaryStore>,
        index: Arc<dyn SearchIndex>,
        max_logs_per_job: usize,
    ) -> Self {
        Self {
            store,
            index,
            max_logs_per_job,
        }
    }

    pub fn max_logs_per_job(&self) -> usize {
        self.max_logs_per_job
    }

    /// Create the search index if it does not exist.
    pub async fn ensure_search_index(&self) -> Result<(), RepositoryError> {
        self.index.ensure_index().await?;
        Ok(())
    }

    /// Insert a new `processing` job into the primary store.
    #[instrument(skip(self, job), fields(job_id = %job.id), err)]
    pub async fn create_job(&self, job: &Job) -> Result<(), RepositoryError> {
        job.validate(self.max_logs_per_job)?;
        if job.status() != JobStatus::Processing {
            return Err(DomainError::validation(format!(
                "new jobs must be processing, got {}",
                job.status()
            ))
            .into());
        }
        self.store.insert(job).await?;
        debug!(logs = job.logs.len(), "job stored");
        Ok(())
    }

    /// The job with `id`, or `None` when absent.
    pub async fn get_job_by_id(&self, id: JobId) -> Result<Option<Job>, RepositoryError> {
        Ok(self.store.get(id).await?)
    }

    /// Write a job's outcome to the primary store.
    ///
    /// The store refuses, atomically, to rewrite a terminal job or to repeat
    /// the stored status; that case comes back as [`StoreUpdate::Unchanged`].
    #[instrument(skip(self, job), fields(job_id = %job.id, status = %job.status()), err)]
    pub async fn update_job(&self, job: &Job) -> Result<StoreUpdate, RepositoryError> {
        job.validate(self.max_logs_per_job)?;
        Ok(self.store.update(job).await?)
    }

    /// Write the job's current document to the search index.
    #[instrument(skip(self, job), fields(job_id = %job.id), err)]
    pub async fn upsert_search(&self, job: &Job) -> Result<(), RepositoryError> {
        let consistency = |source| RepositoryError::SearchConsistency {
            job_id: job.id,
            source,
        };
        let document = job_document(job).map_err(consistency)?;
        self.index
            .upsert(job.id, document)
            .await
            .map_err(consistency)
    }

    /// Jobs matching `filter`, read from the search index.
    #[instrument(skip(self), err)]
    pub async fn filter_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, RepositoryError> {
        filter.validate()?;
        let documents = self.index.query(filter).await?;
        self.decode_page(documents)
    }

    /// Jobs whose tags, logs or finding values contain `term`.
    #[instrument(skip(self, term), fields(term = %term), err)]
    pub async fn search(
        &self,
        term: &SearchTerm,
        page: Pagination,
    ) -> Result<Vec<Job>, RepositoryError> {
        page.validate()?;
        let documents = self.index.search(term, page).await?;
        self.decode_page(documents)
    }

    /// Validate every document of a page; one bad document rejects the page.
    fn decode_page(&self, documents: Vec<JsonValue>) -> Result<Vec<Job>, RepositoryError> {
        documents
            .into_iter()
            .enumerate()
            .map(|(position, document)| {
                let job: Job = serde_json::from_value(document).map_err(|e| {
                    RepositoryError::InvalidData(format!("search hit #{position}: {e}"))
                })?;
                job.validate(self.max_logs_per_job).map_err(|e| {
                    RepositoryError::InvalidData(format!("search hit #{position} ({}): {e}", job.id))
                })?;
                Ok(job)
            })
            .collect()
    }
}
