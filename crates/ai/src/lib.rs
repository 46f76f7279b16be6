//! `piiscan-ai`
//!
//! **Responsibility:** the language-model boundary of the pipeline.
//!
//! - Builds the PII detection prompt from a batch of logs.
//! - Estimates whether a prompt fits the model's token budget.
//! - Talks to the model and returns the raw JSON array it answered with.
//!
//! Interpreting that array as findings, and deciding what a failure means for
//! a job, belongs to the callers.

pub mod model;
pub mod ollama;
pub mod prompt;
pub mod result;
pub mod tokens;

pub use model::{LanguageModel, extract_json_array};
pub use ollama::OllamaClient;
pub use prompt::DetectionPrompt;
pub use result::AiError;
pub use tokens::{DEFAULT_MAX_PROMPT_TOKENS, TokenBudget};
