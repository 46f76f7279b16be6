//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: adapter selection (Postgres/Elasticsearch/Redis or in-memory) and pipeline start
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request DTOs and query parsing
//! - `errors.rs`: consistent `{"error", "message"}` responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use piiscan_infra::AppConfig;
use piiscan_infra::ingest::LogBufferHandle;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

use services::{AppServices, ServicesError};

/// A started application: the router plus the buffer to drain on shutdown.
#[derive(Debug)]
pub struct App {
    pub router: Router,
    pub buffer: LogBufferHandle,
}

/// Routes over already-built services.
pub fn router(services: Arc<AppServices>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .nest("/api", routes::router())
        .layer(ServiceBuilder::new().layer(Extension(services)))
}

/// Build adapters from `config`, start the pipeline and return the router.
pub async fn build_app(config: &AppConfig) -> Result<App, ServicesError> {
    let services = Arc::new(services::build_services(config).await?);
    let buffer = services.start().await?;
    Ok(App {
        router: router(services),
        buffer,
    })
}
