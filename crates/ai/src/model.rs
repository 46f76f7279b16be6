//! Language model boundary.

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::result::AiError;

/// A language model that answers a detection prompt with a JSON array.
///
/// Implementations do not bound their own latency; callers wrap `ask` in a
/// timeout.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Send `prompt` and return the parsed JSON array the model answered with.
    async fn ask(&self, prompt: &str) -> Result<Vec<JsonValue>, AiError>;

    /// Whether `prompt` is too large for the model's context budget.
    fn exceeds_token_budget(&self, prompt: &str) -> bool;
}

/// Pull the JSON array out of free-form model text.
///
/// Models like to wrap answers in prose or markdown fences; everything outside
/// the first `[` and the last `]` is discarded.
pub fn extract_json_array(text: &str) -> Result<Vec<JsonValue>, AiError> {
    let (Some(start), Some(end)) = (text.find('['), text.rfind(']')) else {
        return Err(AiError::InvalidOutput(format!(
            "no JSON array in model response ({} chars)",
            text.len()
        )));
    };
    if end < start {
        return Err(AiError::InvalidOutput("unbalanced JSON array brackets".into()));
    }

    match serde_json::from_str::<JsonValue>(&text[start..=end]) {
        Ok(JsonValue::Array(items)) => Ok(items),
        Ok(other) => Err(AiError::InvalidOutput(format!("expected an array, found {other}"))),
        Err(e) => Err(AiError::InvalidOutput(e.to_string())),
    }
}
