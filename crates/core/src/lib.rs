//! `piiscan-core`: domain building blocks for the log-to-finding pipeline.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! the job entity and its state machine, findings, the PII taxonomy, and the
//! validated inputs accepted at the job boundary.

pub mod error;
pub mod finding;
pub mod id;
pub mod job;
pub mod request;
pub mod taxonomy;

pub use error::{DomainError, DomainResult};
pub use finding::{Finding, FindingSource};
pub use id::JobId;
pub use job::{
    merge_tags, DEFAULT_MAX_LOGS_PER_JOB, Job, JobFailure, JobState, JobStatus, SCHEMA_VERSION,
    SchemaVersion,
};
pub use request::{
    CreateJobRequest, JobFilter, MAX_PAGE_SIZE, Pagination, SearchTerm, SortBy, SortDirection,
};
pub use taxonomy::{PiiCategory, PiiType};
