use std::time::Duration;

use thiserror::Error;

/// Failure talking to, or interpreting, a language model.
#[derive(Debug, Clone, Error)]
pub enum AiError {
    #[error("invalid model input: {0}")]
    InvalidInput(String),

    #[error("model request failed: {0}")]
    Request(String),

    #[error("model call timed out after {0:?}")]
    Timeout(Duration),

    #[error("model output is not a finding array: {0}")]
    InvalidOutput(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AiError {
    /// Stable machine-readable code, recorded as a failed job's `error_code`.
    pub fn code(&self) -> &'static str {
        match self {
            AiError::InvalidInput(_) => "llm_invalid_input",
            AiError::Request(_) => "llm_request_failed",
            AiError::Timeout(_) => "llm_timeout",
            AiError::InvalidOutput(_) => "llm_invalid_output",
            AiError::Internal(_) => "llm_internal",
        }
    }
}
