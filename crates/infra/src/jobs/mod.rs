//! Job persistence and creation.
//!
//! ## Components
//!
//! - `PrimaryStore`: system of record (in-memory or Postgres)
//! - `JobRepository`: primary store + search index dual write, fail-closed reads
//! - `JobService`: create → index → publish job-created
//!
//! The primary store and the search index are never written in one
//! transaction. A failed index write leaves the primary row committed and is
//! reported as a distinct consistency error.

pub mod postgres;
pub mod repository;
pub mod service;
pub mod store;

use piiscan_events::Topic;

pub use postgres::PostgresJobStore;
pub use repository::{JobRepository, RepositoryError};
pub use service::{JobService, JobServiceError};
pub use store::{InMemoryJobStore, PrimaryStore, StoreError, StoreUpdate};

/// The two topics the pipeline communicates over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTopics {
    /// Carries newly created `processing` jobs to the processor.
    pub job_created: Topic,
    /// Carries finished jobs to the update applier.
    pub job_status_updated: Topic,
}

impl Default for JobTopics {
    fn default() -> Self {
        Self {
            job_created: Topic::new("job-created"),
            job_status_updated: Topic::new("job-status-updated"),
        }
    }
}
