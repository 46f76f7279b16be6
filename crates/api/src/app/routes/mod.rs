use axum::Router;

pub mod jobs;
pub mod logs;
pub mod system;

/// Router for everything under `/api`.
pub fn router() -> Router {
    Router::new()
        .nest("/jobs", jobs::router())
        .nest("/logs", logs::router())
}
