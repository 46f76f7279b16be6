//! Pipeline wiring: buffer → partitioner → job-created → processor →
//! job-status-updated → applier.
//!
//! `Pipeline::new` only builds the components. `start` attaches the two
//! consumers to the bus, hands flushed batches to the partitioner and starts
//! the buffer timer.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use piiscan_ai::LanguageModel;
use piiscan_core::DEFAULT_MAX_LOGS_PER_JOB;
use piiscan_events::{MessageHandler, PubSub, PubSubError, Subscribed, Topic};

use crate::config::AppConfig;
use crate::ingest::{BatchPartitioner, BufferError, LogBuffer, LogBufferConfig, LogBufferHandle};
use crate::jobs::{JobRepository, JobService, JobTopics, PrimaryStore, RepositoryError};
use crate::search::SearchIndex;
use crate::workers::{DEFAULT_MODEL_TIMEOUT, JobProcessor, UpdateApplier};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    PubSub(#[from] PubSubError),

    #[error(transparent)]
    Buffer(#[from] BufferError),
}

/// The external collaborators the pipeline runs against.
#[derive(Clone)]
pub struct PipelineAdapters {
    pub store: Arc<dyn PrimaryStore>,
    pub index: Arc<dyn SearchIndex>,
    pub bus: Arc<dyn PubSub>,
    pub model: Arc<dyn LanguageModel>,
}

impl std::fmt::Debug for PipelineAdapters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineAdapters").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub topics: JobTopics,
    pub buffer: LogBufferConfig,
    pub max_logs_per_job: usize,
    pub model_timeout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            topics: JobTopics::default(),
            buffer: LogBufferConfig::default(),
            max_logs_per_job: DEFAULT_MAX_LOGS_PER_JOB,
            model_timeout: DEFAULT_MODEL_TIMEOUT,
        }
    }
}

impl From<&AppConfig> for PipelineSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            topics: config.topics.clone(),
            buffer: config.buffer.clone(),
            max_logs_per_job: config.max_logs_per_job,
            model_timeout: config.llm.timeout,
        }
    }
}

#[derive(Clone)]
pub struct Pipeline {
    jobs: JobService,
    buffer: Arc<LogBuffer>,
    partitioner: BatchPartitioner,
    processor: JobProcessor,
    applier: UpdateApplier,
    bus: Arc<dyn PubSub>,
    topics: JobTopics,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("topics", &self.topics)
            .field("buffer", &self.buffer)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn new(adapters: PipelineAdapters, settings: PipelineSettings) -> Self {
        let PipelineAdapters {
            store,
            index,
            bus,
            model,
        } = adapters;

        let repository = JobRepository::new(store, index, settings.max_logs_per_job);
        let jobs = JobService::new(repository.clone(), bus.clone(), settings.topics.clone());
        let partitioner =
            BatchPartitioner::new(jobs.clone(), model.clone(), settings.max_logs_per_job);
        let processor = JobProcessor::new(model, bus.clone(), settings.topics.clone())
            .with_timeout(settings.model_timeout);

        Self {
            jobs,
            buffer: Arc::new(LogBuffer::new(settings.buffer)),
            partitioner,
            processor,
            applier: UpdateApplier::new(repository),
            bus,
            topics: settings.topics,
        }
    }

    pub fn jobs(&self) -> &JobService {
        &self.jobs
    }

    pub fn buffer(&self) -> &Arc<LogBuffer> {
        &self.buffer
    }

    pub fn partitioner(&self) -> &BatchPartitioner {
        &self.partitioner
    }

    /// Prepare the search index, attach both consumers and start the buffer.
    ///
    /// Can only succeed once per pipeline; the buffer rejects a second start.
    pub async fn start(&self) -> Result<LogBufferHandle, PipelineError> {
        self.jobs.repository().ensure_search_index().await?;

        self.subscribe(&self.topics.job_created, Arc::new(self.processor.clone()))
            .await?;
        self.subscribe(&self.topics.job_status_updated, Arc::new(self.applier.clone()))
            .await?;

        self.buffer.set_sink(Arc::new(self.partitioner.clone()))?;
        let handle = self.buffer.start()?;

        info!(
            job_created = %self.topics.job_created,
            job_status_updated = %self.topics.job_status_updated,
            max_entries = self.buffer.config().max_entries,
            "pipeline started"
        );
        Ok(handle)
    }

    async fn subscribe(
        &self,
        topic: &Topic,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), PubSubError> {
        match self.bus.subscribe(topic, handler).await? {
            Subscribed::New => {}
            Subscribed::AlreadySubscribed => {
                warn!(topic = %topic, "topic already had a consumer in this process")
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use piiscan_events::InMemoryPubSub;

    use crate::jobs::InMemoryJobStore;
    use crate::search::InMemorySearchIndex;
    use crate::test_support::StubModel;

    fn adapters(bus: Arc<InMemoryPubSub>) -> PipelineAdapters {
        PipelineAdapters {
            store: InMemoryJobStore::arc(),
            index: Arc::new(InMemorySearchIndex::new()),
            bus,
            model: Arc::new(StubModel::answering(vec![])),
        }
    }

    #[test]
    fn settings_follow_the_app_config() {
        let config = AppConfig::from_lookup(|key| match key {
            "MAX_LOGS_PER_JOB" => Some("25".into()),
            "LLM_TIMEOUT_IN_SECONDS" => Some("12".into()),
            _ => None,
        })
        .unwrap();

        let settings = PipelineSettings::from(&config);

        assert_eq!(settings.max_logs_per_job, 25);
        assert_eq!(settings.model_timeout, Duration::from_secs(12));
        assert_eq!(settings.topics, JobTopics::default());
    }

    #[tokio::test]
    async fn start_attaches_both_consumers() {
        let bus = Arc::new(InMemoryPubSub::new());
        let pipeline = Pipeline::new(adapters(bus.clone()), PipelineSettings::default());

        let handle = pipeline.start().await.unwrap();

        let topics = JobTopics::default();
        assert!(bus.is_subscribed(&topics.job_created));
        assert!(bus.is_subscribed(&topics.job_status_updated));
        assert!(pipeline.buffer().is_started());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let pipeline = Pipeline::new(
            adapters(Arc::new(InMemoryPubSub::new())),
            PipelineSettings::default(),
        );
        let handle = pipeline.start().await.unwrap();

        assert!(matches!(
            pipeline.start().await,
            Err(PipelineError::Buffer(BufferError::SinkAlreadyRegistered))
        ));
        handle.shutdown().await;
    }
}
