//! Update Applier: job-status-updated → primary store → search index.
//!
//! Terminal states are absorbing. A redelivered or conflicting update for a
//! job that already finished leaves the stored job untouched.

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use piiscan_core::{Job, JobId};
use piiscan_events::{EventEnvelope, HandlerError, MessageHandler};

use crate::jobs::{JobRepository, RepositoryError, StoreUpdate};

#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// What `apply` did with an update.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// The update was written; `indexed` is false when the index write failed.
    Applied { job: Job, indexed: bool },
    /// The stored job already had this status or was terminal.
    Unchanged(Job),
    /// No job with this id exists.
    Dropped(JobId),
}

#[derive(Debug, Clone)]
pub struct UpdateApplier {
    repository: JobRepository,
}

impl UpdateApplier {
    pub fn new(repository: JobRepository) -> Self {
        Self { repository }
    }

    #[instrument(skip(self, incoming), fields(job_id = %incoming.id, status = %incoming.status()), err)]
    pub async fn apply(&self, incoming: Job) -> Result<ApplyOutcome, ApplyError> {
        // The terminal-state check happens inside the store's write.
        let job = match self.repository.update_job(&incoming).await {
            Ok(StoreUpdate::Applied(job)) => job,
            Ok(StoreUpdate::Unchanged(stored)) => {
                debug!(stored = %stored.status(), "status update ignored");
                return Ok(ApplyOutcome::Unchanged(stored));
            }
            Err(RepositoryError::NotFound(id)) => {
                warn!("status update for unknown job dropped");
                return Ok(ApplyOutcome::Dropped(id));
            }
            Err(err) => return Err(err.into()),
        };

        let indexed = match self.repository.upsert_search(&job).await {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "job updated but not re-indexed");
                false
            }
        };
        Ok(ApplyOutcome::Applied { job, indexed })
    }
}

#[async_trait]
impl MessageHandler for UpdateApplier {
    async fn handle(&self, payload: Vec<u8>) -> Result<(), HandlerError> {
        let job = EventEnvelope::<Job>::from_bytes(&payload)?.into_payload();
        self.apply(job)
            .await
            .map(|_| ())
            .map_err(|e| HandlerError::Failed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use piiscan_core::{Finding, JobFailure, JobStatus, PiiType};

    use crate::jobs::{InMemoryJobStore, JobTopics, PrimaryStore, StoreError};
    use crate::search::InMemorySearchIndex;

    fn sample_job() -> Job {
        Job::processing(
            JobId::new(),
            vec!["checkout".into()],
            vec![r#"{"service":"checkout","ip":"10.0.0.2"}"#.into()],
            Utc::now(),
        )
    }

    fn succeeded(job: &Job) -> Job {
        job.clone()
            .succeed(vec![Finding::new("10.0.0.2", PiiType::IpAddress)], Utc::now())
            .unwrap()
    }

    fn failed(job: &Job) -> Job {
        job.clone()
            .fail(JobFailure::new("model call timed out"), Utc::now())
            .unwrap()
    }

    async fn applier_with(job: &Job) -> (UpdateApplier, Arc<InMemorySearchIndex>) {
        let index = Arc::new(InMemorySearchIndex::new());
        let repository = JobRepository::new(InMemoryJobStore::arc(), index.clone(), 100);
        repository.create_job(job).await.unwrap();
        (UpdateApplier::new(repository), index)
    }

    #[tokio::test]
    async fn terminal_update_is_stored_and_indexed() {
        let job = sample_job();
        let (applier, index) = applier_with(&job).await;

        let outcome = applier.apply(failed(&job)).await.unwrap();

        let ApplyOutcome::Applied { job: stored, indexed } = outcome else {
            panic!("expected the update to apply");
        };
        assert!(indexed);
        assert_eq!(stored.status(), JobStatus::Failed);
        assert_eq!(index.document(job.id).unwrap()["status"], "failed");
    }

    #[tokio::test]
    async fn success_absorbs_a_later_failure() {
        let job = sample_job();
        let (applier, _) = applier_with(&job).await;
        let ApplyOutcome::Applied { job: done, .. } = applier.apply(succeeded(&job)).await.unwrap()
        else {
            panic!("expected the update to apply");
        };

        let outcome = applier.apply(failed(&job)).await.unwrap();

        assert_eq!(outcome, ApplyOutcome::Unchanged(done.clone()));
        assert_eq!(
            applier.repository.get_job_by_id(job.id).await.unwrap(),
            Some(done)
        );
    }

    #[tokio::test]
    async fn failure_is_absorbing_too() {
        let job = sample_job();
        let (applier, _) = applier_with(&job).await;
        applier.apply(failed(&job)).await.unwrap();

        let outcome = applier.apply(succeeded(&job)).await.unwrap();

        let ApplyOutcome::Unchanged(stored) = outcome else {
            panic!("expected no change");
        };
        assert_eq!(stored.status(), JobStatus::Failed);
    }

    /// Yields before every call, like a store behind a network hop.
    struct YieldingStore(Arc<InMemoryJobStore>);

    #[async_trait]
    impl PrimaryStore for YieldingStore {
        async fn insert(&self, job: &Job) -> Result<(), StoreError> {
            tokio::task::yield_now().await;
            self.0.insert(job).await
        }

        async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
            tokio::task::yield_now().await;
            self.0.get(id).await
        }

        async fn update(&self, job: &Job) -> Result<StoreUpdate, StoreError> {
            tokio::task::yield_now().await;
            self.0.update(job).await
        }
    }

    #[tokio::test]
    async fn concurrent_conflicting_updates_apply_exactly_once() {
        let job = sample_job();
        let store = InMemoryJobStore::arc();
        let repository = JobRepository::new(
            Arc::new(YieldingStore(store.clone())),
            Arc::new(InMemorySearchIndex::new()),
            100,
        );
        repository.create_job(&job).await.unwrap();
        let applier = UpdateApplier::new(repository);

        let (first, second) = tokio::join!(
            applier.apply(succeeded(&job)),
            applier.apply(failed(&job))
        );

        let outcomes = [first.unwrap(), second.unwrap()];
        let applied: Vec<&Job> = outcomes
            .iter()
            .filter_map(|o| match o {
                ApplyOutcome::Applied { job, .. } => Some(job),
                _ => None,
            })
            .collect();
        assert_eq!(applied.len(), 1, "exactly one terminal write: {outcomes:?}");
        assert!(outcomes.iter().any(|o| matches!(o, ApplyOutcome::Unchanged(_))));

        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(&stored, applied[0]);
        assert!(stored.is_terminal());
    }

    #[tokio::test]
    async fn redelivery_is_a_no_op() {
        let job = sample_job();
        let (applier, _) = applier_with(&job).await;
        let update = succeeded(&job);
        applier.apply(update.clone()).await.unwrap();

        assert!(matches!(
            applier.apply(update).await.unwrap(),
            ApplyOutcome::Unchanged(_)
        ));
    }

    #[tokio::test]
    async fn unknown_job_is_dropped() {
        let job = sample_job();
        let (applier, _) = applier_with(&job).await;
        let stranger = succeeded(&sample_job());

        assert_eq!(
            applier.apply(stranger.clone()).await.unwrap(),
            ApplyOutcome::Dropped(stranger.id)
        );
    }

    #[tokio::test]
    async fn index_outage_still_persists_the_update() {
        let job = sample_job();
        let (applier, index) = applier_with(&job).await;
        index.set_available(false);

        let outcome = applier.apply(succeeded(&job)).await.unwrap();

        assert!(matches!(outcome, ApplyOutcome::Applied { indexed: false, .. }));
        let stored = applier.repository.get_job_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status(), JobStatus::Success);
    }

    #[tokio::test]
    async fn handler_applies_status_envelopes() {
        let job = sample_job();
        let (applier, _) = applier_with(&job).await;
        let bytes = EventEnvelope::new(&JobTopics::default().job_status_updated, &failed(&job))
            .to_bytes()
            .unwrap();

        applier.handle(bytes).await.unwrap();

        let stored = applier.repository.get_job_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status(), JobStatus::Failed);
    }
}
