//! Infrastructure layer: configuration, persistence, search, queueing and the
//! workers that move jobs through the pipeline.

pub mod config;
pub mod event_bus;
pub mod ingest;
pub mod jobs;
pub mod pipeline;
pub mod search;
pub mod workers;

pub use config::{AppConfig, AppEnv, ConfigError};
pub use pipeline::{Pipeline, PipelineAdapters, PipelineError, PipelineSettings};

#[cfg(test)]
mod test_support;
