//! The job entity and its status state machine.
//!
//! ```text
//! processing ──► success   (results)
//!      └───────► failed    (error_message, error_code?, error_details?)
//! ```
//!
//! A job is born in `processing` and leaves it exactly once. Both terminal
//! states are absorbing. Outcome fields live on the [`JobState`] variant
//! where they are valid, so a succeeded job cannot carry an error message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{DomainError, DomainResult};
use crate::finding::Finding;
use crate::id::JobId;

/// Current job schema version.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Default upper bound on `logs` per job.
pub const DEFAULT_MAX_LOGS_PER_JOB: usize = 100;

/// Schema version tag. Only [`SCHEMA_VERSION`] is accepted.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct SchemaVersion;

impl Serialize for SchemaVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(SCHEMA_VERSION)
    }
}

impl<'de> Deserialize<'de> for SchemaVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw == SCHEMA_VERSION {
            Ok(SchemaVersion)
        } else {
            Err(serde::de::Error::custom(format!(
                "unsupported job schema version: {raw}"
            )))
        }
    }
}

impl core::fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(SCHEMA_VERSION)
    }
}

/// Status discriminant of a job.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Processing,
    Success,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Processing => "processing",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
        }
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(JobStatus::Processing),
            "success" => Ok(JobStatus::Success),
            "failed" => Ok(JobStatus::Failed),
            other => Err(DomainError::validation(format!("unknown job status: {other}"))),
        }
    }
}

/// Status-dependent part of a job, tagged by `status` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobState {
    Processing,
    Success {
        completed_at: DateTime<Utc>,
        results: Vec<Finding>,
    },
    Failed {
        completed_at: DateTime<Utc>,
        error_message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_code: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_details: Option<String>,
    },
}

impl JobState {
    pub fn status(&self) -> JobStatus {
        match self {
            JobState::Processing => JobStatus::Processing,
            JobState::Success { .. } => JobStatus::Success,
            JobState::Failed { .. } => JobStatus::Failed,
        }
    }
}

/// Why a job failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub message: String,
    pub code: Option<String>,
    pub details: Option<String>,
}

impl JobFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            details: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// One unit of log-batch processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    #[serde(default)]
    pub version: SchemaVersion,
    /// Ordered, duplicate-free grouping labels (e.g. originating service).
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    /// Raw log lines; immutable after creation.
    pub logs: Vec<String>,
    #[serde(flatten)]
    pub state: JobState,
}

impl Job {
    /// Create a job in `processing`.
    pub fn processing(
        id: JobId,
        tags: Vec<String>,
        logs: Vec<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            version: SchemaVersion,
            tags,
            created_at,
            logs,
            state: JobState::Processing,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.state.status()
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        match &self.state {
            JobState::Processing => None,
            JobState::Success { completed_at, .. } | JobState::Failed { completed_at, .. } => {
                Some(*completed_at)
            }
        }
    }

    pub fn results(&self) -> Option<&[Finding]> {
        match &self.state {
            JobState::Success { results, .. } => Some(results),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.state {
            JobState::Failed { error_message, .. } => Some(error_message),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<JobFailure> {
        match &self.state {
            JobState::Failed {
                error_message,
                error_code,
                error_details,
                ..
            } => Some(JobFailure {
                message: error_message.clone(),
                code: error_code.clone(),
                details: error_details.clone(),
            }),
            _ => None,
        }
    }

    /// Transition `processing → success`.
    pub fn succeed(self, results: Vec<Finding>, completed_at: DateTime<Utc>) -> DomainResult<Job> {
        self.ensure_processing("success")?;
        Ok(Job {
            state: JobState::Success {
                completed_at,
                results,
            },
            ..self
        })
    }

    /// Transition `processing → failed`.
    pub fn fail(self, failure: JobFailure, completed_at: DateTime<Utc>) -> DomainResult<Job> {
        self.ensure_processing("failed")?;
        if failure.message.trim().is_empty() {
            return Err(DomainError::validation("error_message must not be empty"));
        }
        Ok(Job {
            state: JobState::Failed {
                completed_at,
                error_message: failure.message,
                error_code: failure.code,
                error_details: failure.details,
            },
            ..self
        })
    }

    fn ensure_processing(&self, target: &str) -> DomainResult<()> {
        if self.status() != JobStatus::Processing {
            return Err(DomainError::invariant(format!(
                "job {} is {}, cannot transition to {}",
                self.id,
                self.status(),
                target
            )));
        }
        Ok(())
    }

    /// Check the invariants every persisted job must satisfy.
    pub fn validate(&self, max_logs: usize) -> DomainResult<()> {
        if self.logs.is_empty() {
            return Err(DomainError::validation("job must carry at least one log"));
        }
        if self.logs.len() > max_logs {
            return Err(DomainError::validation(format!(
                "job carries {} logs, maximum is {}",
                self.logs.len(),
                max_logs
            )));
        }
        if self.tags.iter().any(|t| t.trim().is_empty()) {
            return Err(DomainError::validation("tags must not be empty"));
        }
        match &self.state {
            JobState::Processing => {}
            JobState::Success { results, .. } => {
                for finding in results {
                    finding.validate()?;
                }
            }
            JobState::Failed { error_message, .. } => {
                if error_message.trim().is_empty() {
                    return Err(DomainError::validation("error_message must not be empty"));
                }
            }
        }
        Ok(())
    }

    /// Resolve a finding's `log_entry` back-reference to this job's log line.
    ///
    /// Matches verbatim first, then by JSON value so that re-serialised
    /// entries still resolve.
    pub fn log_for(&self, finding: &Finding) -> Option<&str> {
        let entry = finding.log_entry.as_deref()?;
        if let Some(log) = self.logs.iter().find(|log| log.as_str() == entry) {
            return Some(log);
        }
        let wanted: serde_json::Value = serde_json::from_str(entry).ok()?;
        self.logs
            .iter()
            .find(|log| serde_json::from_str::<serde_json::Value>(log).ok().as_ref() == Some(&wanted))
            .map(String::as_str)
    }
}

/// Union two tag lists, keeping first-seen order.
pub fn merge_tags(existing: &[String], incoming: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(existing.len() + incoming.len());
    for tag in existing.iter().chain(incoming) {
        if !merged.contains(tag) {
            merged.push(tag.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::PiiType;
    use chrono::TimeZone;
    use serde_json::json;

    fn created() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn sample_job() -> Job {
        Job::processing(
            JobId::new(),
            vec!["checkout".to_string()],
            vec![r#"{"service":"checkout","email":"a@b.c"}"#.to_string()],
            created(),
        )
    }

    #[test]
    fn new_jobs_are_processing() {
        let job = sample_job();
        assert_eq!(job.status(), JobStatus::Processing);
        assert_eq!(job.completed_at(), None);
        assert!(job.results().is_none());
        assert!(job.error_message().is_none());
    }

    #[test]
    fn succeed_sets_results_and_completion() {
        let done = created() + chrono::Duration::seconds(5);
        let job = sample_job()
            .succeed(vec![Finding::new("a@b.c", PiiType::Email)], done)
            .unwrap();

        assert_eq!(job.status(), JobStatus::Success);
        assert_eq!(job.completed_at(), Some(done));
        assert_eq!(job.results().unwrap().len(), 1);
        assert!(job.error_message().is_none());
    }

    #[test]
    fn fail_requires_a_message() {
        let err = sample_job().fail(JobFailure::new(" "), Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn terminal_jobs_cannot_transition_again() {
        let job = sample_job()
            .fail(JobFailure::new("model timed out").with_code("timeout"), Utc::now())
            .unwrap();

        let err = job.clone().succeed(Vec::new(), Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));

        let err = job.fail(JobFailure::new("again"), Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn serialises_flat_with_status_tag() {
        let job = sample_job()
            .fail(
                JobFailure::new("boom").with_details("AiError::Timeout"),
                created(),
            )
            .unwrap();
        let value = serde_json::to_value(&job).unwrap();

        assert_eq!(value["status"], "failed");
        assert_eq!(value["version"], "1.0.0");
        assert_eq!(value["error_message"], "boom");
        assert_eq!(value["error_details"], "AiError::Timeout");
        assert!(value.get("error_code").is_none());
        assert!(value.get("results").is_none());

        let back: Job = serde_json::from_value(value).unwrap();
        assert_eq!(back, job);
    }

    #[test]
    fn rejects_unknown_schema_version() {
        let mut value = serde_json::to_value(sample_job()).unwrap();
        value["version"] = json!("2.0.0");
        assert!(serde_json::from_value::<Job>(value).is_err());
    }

    #[test]
    fn success_documents_need_results() {
        let mut value = serde_json::to_value(sample_job()).unwrap();
        value["status"] = json!("success");
        value["completed_at"] = json!("2025-03-01T12:00:05Z");
        assert!(serde_json::from_value::<Job>(value.clone()).is_err());

        value["results"] = json!([{"field": "a@b.c", "type": "email"}]);
        let job: Job = serde_json::from_value(value).unwrap();
        assert_eq!(job.status(), JobStatus::Success);
    }

    #[test]
    fn validate_bounds_logs() {
        let mut job = sample_job();
        assert!(job.validate(1).is_ok());

        job.logs.push("second".into());
        assert!(job.validate(1).is_err());

        job.logs.clear();
        assert!(job.validate(10).is_err());
    }

    #[test]
    fn log_for_resolves_back_reference() {
        let job = sample_job();
        let verbatim = Finding::new("a@b.c", PiiType::Email).with_log_entry(job.logs[0].clone());
        assert_eq!(job.log_for(&verbatim), Some(job.logs[0].as_str()));

        let reserialised = Finding::new("a@b.c", PiiType::Email)
            .with_log_entry(r#"{"email": "a@b.c", "service": "checkout"}"#);
        assert_eq!(job.log_for(&reserialised), Some(job.logs[0].as_str()));

        let dangling = Finding::new("a@b.c", PiiType::Email).with_log_entry("elsewhere");
        assert_eq!(job.log_for(&dangling), None);
    }

    #[test]
    fn merge_tags_keeps_first_seen_order() {
        let merged = merge_tags(
            &["checkout".to_string(), "eu".to_string()],
            &["eu".to_string(), "beta".to_string()],
        );
        assert_eq!(merged, vec!["checkout", "eu", "beta"]);
    }
}
