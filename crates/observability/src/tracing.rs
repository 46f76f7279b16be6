//! Tracing/logging initialization.
//!
//! Filtering comes from `RUST_LOG` (default `info`). Deployed environments log
//! one JSON object per line; local runs can opt into compact human output.

use tracing_subscriber::EnvFilter;

/// Output format of the process log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event.
    Json,
    /// Single-line human-readable output.
    Compact,
}

impl LogFormat {
    /// Compact for `local`, JSON everywhere else.
    pub fn for_app_env(app_env: &str) -> Self {
        if app_env.eq_ignore_ascii_case("local") {
            LogFormat::Compact
        } else {
            LogFormat::Json
        }
    }
}

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false);

    let _ = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
    };
}
