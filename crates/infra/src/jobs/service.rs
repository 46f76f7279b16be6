//! Job creation and queries as exposed to the HTTP layer and the partitioner.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};

use piiscan_core::{CreateJobRequest, DomainError, Job, JobFilter, JobId, Pagination, SearchTerm};
use piiscan_events::{EventEnvelope, PubSub, PubSubError};

use super::JobTopics;
use super::repository::{JobRepository, RepositoryError};

#[derive(Debug, thiserror::Error)]
pub enum JobServiceError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// The job is stored as `processing` but nobody was told to process it.
    #[error("job {job_id} was stored but could not be published: {source}")]
    Publish {
        job_id: JobId,
        #[source]
        source: PubSubError,
    },
}

impl From<DomainError> for JobServiceError {
    fn from(err: DomainError) -> Self {
        Self::Repository(RepositoryError::Validation(err))
    }
}

/// Creates jobs and hands them to the processing pipeline.
#[derive(Clone)]
pub struct JobService {
    repository: JobRepository,
    bus: Arc<dyn PubSub>,
    topics: JobTopics,
}

impl std::fmt::Debug for JobService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobService")
            .field("repository", &self.repository)
            .field("topics", &self.topics)
            .finish_non_exhaustive()
    }
}

impl JobService {
    pub fn new(repository: JobRepository, bus: Arc<dyn PubSub>, topics: JobTopics) -> Self {
        Self {
            repository,
            bus,
            topics,
        }
    }

    pub fn repository(&self) -> &JobRepository {
        &self.repository
    }

    /// Validate, store, index, then publish on job-created.
    ///
    /// The index write is best-effort: its failure is logged and the created
    /// job is still returned.
    #[instrument(skip(self, request), fields(tags = ?request.tags, logs = request.logs.len()), err)]
    pub async fn create_job(&self, request: CreateJobRequest) -> Result<Job, JobServiceError> {
        let job = request.into_job(self.repository.max_logs_per_job(), Utc::now())?;
        self.repository.create_job(&job).await?;

        // Indexed before publishing so this `processing` document can never
        // overwrite a terminal one written by the applier.
        if let Err(err) = self.repository.upsert_search(&job).await {
            warn!(job_id = %job.id, error = %err, "job created without search document");
        }

        self.publish_created(&job)
            .await
            .map_err(|source| JobServiceError::Publish {
                job_id: job.id,
                source,
            })?;

        info!(job_id = %job.id, "job created");
        Ok(job)
    }

    async fn publish_created(&self, job: &Job) -> Result<(), PubSubError> {
        let bytes = EventEnvelope::new(&self.topics.job_created, job).to_bytes()?;
        self.bus.publish(&self.topics.job_created, bytes).await
    }

    pub async fn get_job(&self, id: JobId) -> Result<Option<Job>, JobServiceError> {
        Ok(self.repository.get_job_by_id(id).await?)
    }

    pub async fn filter_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, JobServiceError> {
        Ok(self.repository.filter_jobs(filter).await?)
    }

    pub async fn search_jobs(
        &self,
        term: &SearchTerm,
        page: Pagination,
    ) -> Result<Vec<Job>, JobServiceError> {
        Ok(self.repository.search(term, page).await?)
    }
}
