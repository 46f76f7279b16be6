//! Inputs accepted at the job boundary: creation requests, filters, search terms.
//!
//! Everything here is validated before any storage is touched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::JobId;
use crate::job::{Job, SchemaVersion};

/// Largest page a caller may request.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Search terms shorter than this are rejected.
pub const MIN_SEARCH_TERM_CHARS: usize = 4;

/// Search terms longer than this are rejected.
pub const MAX_SEARCH_TERM_CHARS: usize = 255;

/// Request to create a job from a batch of logs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateJobRequest {
    /// Caller-chosen id; generated when absent.
    #[serde(default)]
    pub id: Option<JobId>,
    #[serde(default)]
    pub version: SchemaVersion,
    #[serde(default)]
    pub tags: Vec<String>,
    pub logs: Vec<String>,
}

impl CreateJobRequest {
    pub fn new(tags: Vec<String>, logs: Vec<String>) -> Self {
        Self {
            id: None,
            version: SchemaVersion,
            tags,
            logs,
        }
    }

    pub fn with_id(mut self, id: JobId) -> Self {
        self.id = Some(id);
        self
    }

    /// Validate and build the `processing` job this request describes.
    pub fn into_job(self, max_logs: usize, now: DateTime<Utc>) -> DomainResult<Job> {
        if self.logs.is_empty() {
            return Err(DomainError::validation("logs must not be empty"));
        }
        if self.logs.len() > max_logs {
            return Err(DomainError::validation(format!(
                "at most {max_logs} logs per job, got {}",
                self.logs.len()
            )));
        }

        let mut tags: Vec<String> = Vec::with_capacity(self.tags.len());
        for tag in self.tags {
            let tag = tag.trim();
            if tag.is_empty() {
                return Err(DomainError::validation("tags must not be empty"));
            }
            if !tags.iter().any(|t| t == tag) {
                tags.push(tag.to_string());
            }
        }

        Ok(Job::processing(
            self.id.unwrap_or_default(),
            tags,
            self.logs,
            now,
        ))
    }
}

/// Page selection (0-based page index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_page_size() -> u32 {
    10
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 0,
            page_size: default_page_size(),
        }
    }
}

impl Pagination {
    pub fn new(page: u32, page_size: u32) -> DomainResult<Self> {
        let pagination = Self { page, page_size };
        pagination.validate()?;
        Ok(pagination)
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.page_size > MAX_PAGE_SIZE {
            return Err(DomainError::validation(format!(
                "page_size must be at most {MAX_PAGE_SIZE}"
            )));
        }
        Ok(())
    }

    /// Number of documents to skip.
    pub fn offset(&self) -> usize {
        self.page as usize * self.page_size as usize
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    #[default]
    CreatedAt,
    CompletedAt,
}

impl SortBy {
    /// Document field the sort applies to.
    pub fn field(&self) -> &'static str {
        match self {
            SortBy::CreatedAt => "created_at",
            SortBy::CompletedAt => "completed_at",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

/// Structured job listing over the search index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFilter {
    #[serde(default)]
    pub status: Option<crate::job::JobStatus>,
    /// Matches jobs carrying any of these tags.
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub sort_by: SortBy,
    #[serde(default)]
    pub sort_direction: SortDirection,
    #[serde(flatten)]
    pub pagination: Pagination,
}

impl JobFilter {
    pub fn validate(&self) -> DomainResult<()> {
        if self.tags.iter().any(|t| t.trim().is_empty()) {
            return Err(DomainError::validation("filter tags must not be empty"));
        }
        self.pagination.validate()
    }
}

/// A validated free-text search term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SearchTerm(String);

impl SearchTerm {
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let term = raw.trim();
        let chars = term.chars().count();
        if !(MIN_SEARCH_TERM_CHARS..=MAX_SEARCH_TERM_CHARS).contains(&chars) {
            return Err(DomainError::validation(format!(
                "search term must be {MIN_SEARCH_TERM_CHARS}..={MAX_SEARCH_TERM_CHARS} characters, got {chars}"
            )));
        }
        Ok(Self(term.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for SearchTerm {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
