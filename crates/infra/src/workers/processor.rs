//! Job Processor: job-created → model call → job-status-updated.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info, instrument, warn};

use piiscan_ai::{AiError, DetectionPrompt, LanguageModel};
use piiscan_core::{DomainError, Finding, Job, JobFailure};
use piiscan_events::{EventEnvelope, HandlerError, MessageHandler, PubSub};

use crate::jobs::JobTopics;

/// Default `LLM_TIMEOUT_IN_SECONDS`.
pub const DEFAULT_MODEL_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    /// The job could not be transitioned (e.g. it is not `processing`).
    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Runs detection for created jobs and publishes the terminal job.
#[derive(Clone)]
pub struct JobProcessor {
    model: Arc<dyn LanguageModel>,
    bus: Arc<dyn PubSub>,
    topics: JobTopics,
    timeout: Duration,
}

impl std::fmt::Debug for JobProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobProcessor")
            .field("topics", &self.topics)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl JobProcessor {
    pub fn new(model: Arc<dyn LanguageModel>, bus: Arc<dyn PubSub>, topics: JobTopics) -> Self {
        Self {
            model,
            bus,
            topics,
            timeout: DEFAULT_MODEL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Detect findings for `job` and publish the terminal job.
    ///
    /// Model failures, timeouts and unusable output all end in `failed`. A
    /// failed publish is logged; the model is not asked again.
    #[instrument(skip(self, job), fields(job_id = %job.id, logs = job.logs.len()), err)]
    pub async fn process(&self, job: Job) -> Result<Job, ProcessorError> {
        if job.is_terminal() {
            return Err(DomainError::invariant(format!(
                "job {} is already {}",
                job.id,
                job.status()
            ))
            .into());
        }

        let finished = match self.detect(&job.logs).await {
            Ok(findings) => {
                info!(findings = findings.len(), "detection succeeded");
                job.succeed(findings, Utc::now())?
            }
            Err(err) => {
                warn!(error = %err, code = err.code(), "detection failed");
                let failure = JobFailure::new(err.to_string())
                    .with_code(err.code())
                    .with_details(format!("{err:?}"));
                job.fail(failure, Utc::now())?
            }
        };

        self.publish_finished(&finished).await;
        Ok(finished)
    }

    async fn detect(&self, logs: &[String]) -> Result<Vec<Finding>, AiError> {
        let prompt = DetectionPrompt::build(logs);
        if self.model.exceeds_token_budget(&prompt) {
            warn!(prompt_chars = prompt.len(), "prompt exceeds the token budget; asking anyway");
        }

        let items = tokio::time::timeout(self.timeout, self.model.ask(&prompt))
            .await
            .map_err(|_| AiError::Timeout(self.timeout))??;

        Finding::parse_all(items).map_err(|e| AiError::InvalidOutput(e.to_string()))
    }

    async fn publish_finished(&self, job: &Job) {
        let topic = &self.topics.job_status_updated;
        let published = match EventEnvelope::new(topic, job).to_bytes() {
            Ok(bytes) => self.bus.publish(topic, bytes).await,
            Err(err) => Err(err),
        };
        if let Err(err) = published {
            error!(job_id = %job.id, status = %job.status(), error = %err, "failed to publish job status update");
        }
    }
}

#[async_trait]
impl MessageHandler for JobProcessor {
    async fn handle(&self, payload: Vec<u8>) -> Result<(), HandlerError> {
        let job = EventEnvelope::<Job>::from_bytes(&payload)?.into_payload();
        self.process(job)
            .await
            .map(|_| ())
            .map_err(|e| HandlerError::Failed(e.to_string()))
    }
}
