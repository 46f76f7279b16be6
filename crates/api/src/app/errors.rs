use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use piiscan_core::DomainError;
use piiscan_infra::jobs::{JobServiceError, RepositoryError};

pub fn service_error_to_response(err: JobServiceError) -> axum::response::Response {
    match err {
        JobServiceError::Repository(err) => repository_error_to_response(err),
        JobServiceError::Publish { .. } => {
            tracing::error!(error = %err, "job created but not queued for processing");
            json_error(StatusCode::BAD_GATEWAY, "publish_error", err.to_string())
        }
    }
}

fn repository_error_to_response(err: RepositoryError) -> axum::response::Response {
    match err {
        RepositoryError::AlreadyExists(_) => {
            json_error(StatusCode::CONFLICT, "already_exists", err.to_string())
        }
        RepositoryError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", err.to_string()),
        RepositoryError::Validation(domain) => domain_error_to_response(domain),
        RepositoryError::InvalidData(_) => {
            tracing::error!(error = %err, "stored job data failed validation");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "invalid_data", err.to_string())
        }
        RepositoryError::Store(_) => {
            tracing::error!(error = %err, "primary store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", err.to_string())
        }
        RepositoryError::Search(_) | RepositoryError::SearchConsistency { .. } => {
            tracing::error!(error = %err, "search index failure");
            json_error(StatusCode::BAD_GATEWAY, "search_error", err.to_string())
        }
    }
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    match err {
        DomainError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DomainError::InvalidId(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_id", msg),
        DomainError::InvariantViolation(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg)
        }
        DomainError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        DomainError::Conflict(msg) => json_error(StatusCode::CONFLICT, "already_exists", msg),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
