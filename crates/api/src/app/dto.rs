use serde::Deserialize;
use serde_json::Value as JsonValue;

use piiscan_core::{
    CreateJobRequest, DomainError, JobFilter, JobId, JobStatus, Pagination, SCHEMA_VERSION,
    SchemaVersion, SortBy, SortDirection,
};

// -------------------------
// Request DTOs
// -------------------------

/// `POST /api/jobs` body. Log lines may be strings or any JSON value.
#[derive(Debug, Deserialize)]
pub struct CreateJobBody {
    pub id: Option<String>,
    pub version: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub logs: Vec<JsonValue>,
}

impl CreateJobBody {
    pub fn into_request(self) -> Result<CreateJobRequest, DomainError> {
        if let Some(version) = &self.version {
            if version != SCHEMA_VERSION {
                return Err(DomainError::validation(format!(
                    "unsupported job schema version: {version}"
                )));
            }
        }
        let id = self.id.as_deref().map(str::parse::<JobId>).transpose()?;

        Ok(CreateJobRequest {
            id,
            version: SchemaVersion,
            tags: self.tags,
            logs: self.logs.into_iter().map(log_line).collect(),
        })
    }
}

fn log_line(value: JsonValue) -> String {
    match value {
        JsonValue::String(line) => line,
        other => other.to_string(),
    }
}

/// `GET /api/jobs` query string. Parsed by hand so bad values get a JSON 400.
#[derive(Debug, Default, Deserialize)]
pub struct JobListQuery {
    pub status: Option<String>,
    /// Comma-separated.
    pub tags: Option<String>,
    pub sort_by: Option<String>,
    pub sort_direction: Option<String>,
    pub page: Option<String>,
    pub page_size: Option<String>,
}

impl JobListQuery {
    pub fn into_filter(self) -> Result<JobFilter, DomainError> {
        let status = self
            .status
            .as_deref()
            .map(str::parse::<JobStatus>)
            .transpose()?;
        let tags = self
            .tags
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let sort_by = match self.sort_by.as_deref() {
            None | Some("created_at") => SortBy::CreatedAt,
            Some("completed_at") => SortBy::CompletedAt,
            Some(other) => {
                return Err(DomainError::validation(format!(
                    "sort_by must be created_at or completed_at, got {other}"
                )));
            }
        };
        let sort_direction = match self.sort_direction.as_deref() {
            None | Some("desc") => SortDirection::Desc,
            Some("asc") => SortDirection::Asc,
            Some(other) => {
                return Err(DomainError::validation(format!(
                    "sort_direction must be asc or desc, got {other}"
                )));
            }
        };

        let filter = JobFilter {
            status,
            tags,
            sort_by,
            sort_direction,
            pagination: pagination(self.page.as_deref(), self.page_size.as_deref())?,
        };
        filter.validate()?;
        Ok(filter)
    }
}

/// `GET /api/jobs/search/:term` query string.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
    pub page_size: Option<String>,
}

impl PageQuery {
    pub fn into_pagination(self) -> Result<Pagination, DomainError> {
        pagination(self.page.as_deref(), self.page_size.as_deref())
    }
}

fn pagination(page: Option<&str>, page_size: Option<&str>) -> Result<Pagination, DomainError> {
    let defaults = Pagination::default();
    Pagination::new(
        number("page", page)?.unwrap_or(defaults.page),
        number("page_size", page_size)?.unwrap_or(defaults.page_size),
    )
}

fn number(key: &str, raw: Option<&str>) -> Result<Option<u32>, DomainError> {
    raw.map(|value| {
        value
            .trim()
            .parse::<u32>()
            .map_err(|_| DomainError::validation(format!("{key} must be a non-negative integer")))
    })
    .transpose()
}
