//! Secondary, query-optimised job index.
//!
//! The index stores one JSON document per job id (the serialised [`Job`] plus
//! `updated_at`). It answers structured listings and free-text search; callers
//! re-validate every returned document before trusting it.

pub mod elasticsearch;
pub mod in_memory;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;

use piiscan_core::{Job, JobFilter, JobId, Pagination, SearchTerm};

pub use elasticsearch::ElasticsearchIndex;
pub use in_memory::InMemorySearchIndex;

#[derive(Debug, Clone, thiserror::Error)]
pub enum SearchError {
    #[error("search request failed: {0}")]
    Request(String),

    #[error("search index returned {status}: {body}")]
    Response { status: u16, body: String },

    #[error("malformed search response: {0}")]
    InvalidResponse(String),

    #[error("cannot index job {id}: {reason}")]
    InvalidDocument { id: JobId, reason: String },
}

/// Document store used for job listings and search.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Create the index (with its mapping) if it does not exist yet.
    async fn ensure_index(&self) -> Result<(), SearchError>;

    /// Create or overwrite the document for `id`.
    async fn upsert(&self, id: JobId, document: JsonValue) -> Result<(), SearchError>;

    /// Documents matching `filter`, sorted and paged as requested.
    async fn query(&self, filter: &JobFilter) -> Result<Vec<JsonValue>, SearchError>;

    /// Documents whose tags, logs or finding values contain `term`.
    async fn search(&self, term: &SearchTerm, page: Pagination)
        -> Result<Vec<JsonValue>, SearchError>;
}

/// Serialise a job into its index document.
pub fn job_document(job: &Job) -> Result<JsonValue, SearchError> {
    let mut document = serde_json::to_value(job).map_err(|e| SearchError::InvalidDocument {
        id: job.id,
        reason: e.to_string(),
    })?;
    if let Some(object) = document.as_object_mut() {
        object.insert("updated_at".into(), JsonValue::String(Utc::now().to_rfc3339()));
    }
    Ok(document)
}
