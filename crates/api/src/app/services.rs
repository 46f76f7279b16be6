//! Adapter selection and pipeline start-up from [`AppConfig`].
//!
//! Each external collaborator has an in-memory fallback: unset
//! `DB_CONNECTION_STRING`, `ELASTICSEARCH_URL` or `QUEUE_URL` keeps that part
//! of the pipeline inside the process.

use std::sync::Arc;

use piiscan_ai::{OllamaClient, TokenBudget};
use piiscan_events::{InMemoryPubSub, PubSub, PubSubError};
use piiscan_infra::ingest::{LogBuffer, LogBufferHandle};
use piiscan_infra::jobs::{InMemoryJobStore, JobService, PostgresJobStore, PrimaryStore, StoreError};
use piiscan_infra::search::{ElasticsearchIndex, InMemorySearchIndex, SearchIndex};
use piiscan_infra::{AppConfig, Pipeline, PipelineAdapters, PipelineError, PipelineSettings};

#[derive(Debug, thiserror::Error)]
pub enum ServicesError {
    #[error("primary store unavailable: {0}")]
    Store(#[from] StoreError),

    #[error("queue unavailable: {0}")]
    Queue(#[from] PubSubError),

    #[error("QUEUE_URL is set but this build has no redis support")]
    RedisDisabled,

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Everything the HTTP handlers need.
#[derive(Debug, Clone)]
pub struct AppServices {
    pipeline: Pipeline,
}

impl AppServices {
    pub fn new(pipeline: Pipeline) -> Self {
        Self { pipeline }
    }

    pub fn jobs(&self) -> &JobService {
        self.pipeline.jobs()
    }

    pub fn buffer(&self) -> &Arc<LogBuffer> {
        self.pipeline.buffer()
    }

    /// Attach the workers and start the buffer.
    pub async fn start(&self) -> Result<LogBufferHandle, PipelineError> {
        self.pipeline.start().await
    }
}

pub async fn build_services(config: &AppConfig) -> Result<AppServices, ServicesError> {
    let adapters = PipelineAdapters {
        store: primary_store(config).await?,
        index: search_index(config),
        bus: pub_sub(config)?,
        model: Arc::new(OllamaClient::new(
            config.llm.api_url.clone(),
            config.llm.model.clone(),
            TokenBudget::new(config.llm.max_prompt_tokens),
        )),
    };
    Ok(AppServices::new(Pipeline::new(
        adapters,
        PipelineSettings::from(config),
    )))
}

async fn primary_store(config: &AppConfig) -> Result<Arc<dyn PrimaryStore>, ServicesError> {
    match &config.database_url {
        Some(url) => {
            let store = PostgresJobStore::connect(url).await?;
            store.ensure_schema().await?;
            tracing::info!("using postgres primary store");
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("DB_CONNECTION_STRING not set; jobs are kept in memory");
            Ok(InMemoryJobStore::arc())
        }
    }
}

fn search_index(config: &AppConfig) -> Arc<dyn SearchIndex> {
    match &config.search.url {
        Some(url) => {
            tracing::info!(index = %config.search.index, "using elasticsearch search index");
            Arc::new(ElasticsearchIndex::new(url.clone(), config.search.index.clone()))
        }
        None => {
            tracing::warn!("ELASTICSEARCH_URL not set; search index is kept in memory");
            Arc::new(InMemorySearchIndex::new())
        }
    }
}

#[cfg(feature = "redis")]
fn pub_sub(config: &AppConfig) -> Result<Arc<dyn PubSub>, ServicesError> {
    match &config.queue_url {
        Some(url) => {
            let bus = piiscan_infra::event_bus::RedisQueueBus::new(url, config.message_prefetch)?;
            tracing::info!("using redis queue bus");
            Ok(Arc::new(bus))
        }
        None => Ok(in_memory_bus(config)),
    }
}

#[cfg(not(feature = "redis"))]
fn pub_sub(config: &AppConfig) -> Result<Arc<dyn PubSub>, ServicesError> {
    match &config.queue_url {
        Some(_) => Err(ServicesError::RedisDisabled),
        None => Ok(in_memory_bus(config)),
    }
}

fn in_memory_bus(config: &AppConfig) -> Arc<dyn PubSub> {
    tracing::warn!("QUEUE_URL not set; using the in-process bus");
    Arc::new(InMemoryPubSub::with_prefetch(config.message_prefetch))
}
