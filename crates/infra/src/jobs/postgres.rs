//! Postgres-backed primary job store.
//!
//! ## Schema
//!
//! One row per job in `jobs`. `tags`, `logs` and `results` are JSONB; the
//! failure fields are plain columns. [`PostgresJobStore::ensure_schema`]
//! creates the table and its status index when absent.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `AlreadyExists` |
//! | Database (check constraint violation) | `23514` | `InvalidData` |
//! | Database (other) | Any other | `Storage` |
//! | PoolClosed / other | N/A | `Storage` |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::instrument;
use uuid::Uuid;

use piiscan_core::{Finding, Job, JobId, JobState, JobStatus, SchemaVersion};

use super::store::{PrimaryStore, StoreError, StoreUpdate, apply_update};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id UUID PRIMARY KEY,
    version TEXT NOT NULL DEFAULT '1.0.0',
    status TEXT NOT NULL CHECK (status IN ('processing', 'success', 'failed')),
    tags JSONB NOT NULL DEFAULT '[]'::jsonb,
    logs JSONB NOT NULL,
    results JSONB,
    error_message TEXT,
    error_code TEXT,
    error_details TEXT,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    completed_at TIMESTAMPTZ
)
"#;

const CREATE_STATUS_INDEX: &str = "CREATE INDEX IF NOT EXISTS jobs_status_idx ON jobs (status)";

const SELECT_COLUMNS: &str = "id, status, tags, logs, results, error_message, error_code, error_details, created_at, completed_at";

/// Postgres-backed [`PrimaryStore`].
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: Arc<PgPool>,
}

impl PostgresJobStore {
    /// Create a new store with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect to `database_url` with a default pool.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create the `jobs` table and its indexes if they do not exist.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_TABLE)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("create_table", e))?;
        sqlx::query(CREATE_STATUS_INDEX)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("create_index", e))?;
        Ok(())
    }
}

/// Column values for a job's status-dependent fields.
struct OutcomeColumns {
    results: Option<Json<Vec<Finding>>>,
    error_message: Option<String>,
    error_code: Option<String>,
    error_details: Option<String>,
    completed_at: Option<DateTime<Utc>>,
}

impl OutcomeColumns {
    fn of(job: &Job) -> Self {
        match &job.state {
            JobState::Processing => Self {
                results: None,
                error_message: None,
                error_code: None,
                error_details: None,
                completed_at: None,
            },
            JobState::Success {
                completed_at,
                results,
            } => Self {
                results: Some(Json(results.clone())),
                error_message: None,
                error_code: None,
                error_details: None,
                completed_at: Some(*completed_at),
            },
            JobState::Failed {
                completed_at,
                error_message,
                error_code,
                error_details,
            } => Self {
                results: None,
                error_message: Some(error_message.clone()),
                error_code: error_code.clone(),
                error_details: error_details.clone(),
                completed_at: Some(*completed_at),
            },
        }
    }
}

fn job_from_row(row: &PgRow) -> Result<Job, StoreError> {
    let invalid = |e: sqlx::Error| StoreError::InvalidData(e.to_string());

    let id: Uuid = row.try_get("id").map_err(invalid)?;
    let status: String = row.try_get("status").map_err(invalid)?;
    let Json(tags): Json<Vec<String>> = row.try_get("tags").map_err(invalid)?;
    let Json(logs): Json<Vec<String>> = row.try_get("logs").map_err(invalid)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(invalid)?;
    let completed_at: Option<DateTime<Utc>> = row.try_get("completed_at").map_err(invalid)?;

    let status: JobStatus = status
        .parse()
        .map_err(|e: piiscan_core::DomainError| StoreError::InvalidData(e.to_string()))?;
    let missing = |column: &str| StoreError::InvalidData(format!("{status} job {id} has no {column}"));

    let state = match status {
        JobStatus::Processing => JobState::Processing,
        JobStatus::Success => {
            let results: Option<Json<Vec<Finding>>> = row.try_get("results").map_err(invalid)?;
            JobState::Success {
                completed_at: completed_at.ok_or_else(|| missing("completed_at"))?,
                results: results.map(|Json(r)| r).ok_or_else(|| missing("results"))?,
            }
        }
        JobStatus::Failed => JobState::Failed {
            completed_at: completed_at.ok_or_else(|| missing("completed_at"))?,
            error_message: row
                .try_get::<Option<String>, _>("error_message")
                .map_err(invalid)?
                .ok_or_else(|| missing("error_message"))?,
            error_code: row.try_get("error_code").map_err(invalid)?,
            error_details: row.try_get("error_details").map_err(invalid)?,
        },
    };

    Ok(Job {
        id: JobId::from_uuid(id),
        version: SchemaVersion,
        tags,
        created_at,
        logs,
        state,
    })
}

#[async_trait]
impl PrimaryStore for PostgresJobStore {
    #[instrument(skip(self, job), fields(job_id = %job.id), err)]
    async fn insert(&self, job: &Job) -> Result<(), StoreError> {
        let outcome = OutcomeColumns::of(job);
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, version, status, tags, logs, results,
                error_message, error_code, error_details,
                created_at, updated_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW(), $11)
            "#,
        )
        .bind(*job.id.as_uuid())
        .bind(job.version.to_string())
        .bind(job.status().as_str())
        .bind(Json(&job.tags))
        .bind(Json(&job.logs))
        .bind(outcome.results)
        .bind(outcome.error_message)
        .bind(outcome.error_code)
        .bind(outcome.error_details)
        .bind(job.created_at)
        .bind(outcome.completed_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| match map_sqlx_error("insert_job", e) {
            StoreError::AlreadyExists(_) => StoreError::AlreadyExists(job.id),
            other => other,
        })?;
        Ok(())
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(&format!("SELECT {SELECT_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(*id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_job", e))?;

        row.as_ref().map(job_from_row).transpose()
    }

    /// Read-check-write under a row lock: concurrent updates cannot lose tags
    /// and a terminal row is never rewritten.
    #[instrument(skip(self, job), fields(job_id = %job.id, status = %job.status()), err)]
    async fn update(&self, job: &Job) -> Result<StoreUpdate, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM jobs WHERE id = $1 FOR UPDATE"
        ))
        .bind(*job.id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("lock_job", e))?
        .ok_or(StoreError::NotFound(job.id))?;

        let stored = job_from_row(&row)?;
        let Some(merged) = apply_update(&stored, job) else {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Ok(StoreUpdate::Unchanged(stored));
        };
        let outcome = OutcomeColumns::of(&merged);

        sqlx::query(
            r#"
            UPDATE jobs
            SET status = $2, tags = $3, results = $4,
                error_message = $5, error_code = $6, error_details = $7,
                completed_at = $8, updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(*merged.id.as_uuid())
        .bind(merged.status().as_str())
        .bind(Json(&merged.tags))
        .bind(outcome.results)
        .bind(outcome.error_message)
        .bind(outcome.error_code)
        .bind(outcome.error_details)
        .bind(outcome.completed_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_job", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;

        Ok(StoreUpdate::Applied(merged))
    }
}

/// Map SQLx errors to `StoreError`.
///
/// `AlreadyExists` carries a placeholder id; callers that know the job
/// replace it.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::AlreadyExists(JobId::from_uuid(Uuid::nil())),
                Some("23514") => StoreError::InvalidData(msg),
                _ => StoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Storage(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}
