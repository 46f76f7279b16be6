//! Ollama-backed [`LanguageModel`] (`POST /api/generate`, non-streaming).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, instrument};

use crate::model::{LanguageModel, extract_json_array};
use crate::result::AiError;
use crate::tokens::TokenBudget;

/// Sampling temperature for detection; low so answers stay close to the taxonomy.
const TEMPERATURE: f32 = 0.1;

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// HTTP client for an Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    budget: TokenBudget,
}

impl OllamaClient {
    /// Create a client for `base_url` (e.g. `http://localhost:11434`).
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, budget: TokenBudget) -> Self {
        Self::with_http_client(reqwest::Client::new(), base_url, model, budget)
    }

    pub fn with_http_client(
        http: reqwest::Client,
        base_url: impl Into<String>,
        model: impl Into<String>,
        budget: TokenBudget,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            budget,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl LanguageModel for OllamaClient {
    #[instrument(skip(self, prompt), fields(model = %self.model, prompt_chars = prompt.len()), err)]
    async fn ask(&self, prompt: &str) -> Result<Vec<JsonValue>, AiError> {
        if prompt.trim().is_empty() {
            return Err(AiError::InvalidInput("prompt is empty".into()));
        }

        let body = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: TEMPERATURE,
            },
        };

        let response = self
            .http
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| AiError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AiError::Request(format!("ollama returned {status}: {text}")));
        }

        let generated: GenerateResponse = response
            .json()
            .await
            .map_err(|e| AiError::InvalidOutput(format!("unexpected ollama response: {e}")))?;

        debug!(response_chars = generated.response.len(), "model answered");
        extract_json_array(&generated.response)
    }

    fn exceeds_token_budget(&self, prompt: &str) -> bool {
        self.budget.exceeds(prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::StatusCode, routing::post};
    use serde_json::json;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn parses_generated_array() {
        let app = Router::new().route(
            "/api/generate",
            post(|Json(body): Json<JsonValue>| async move {
                assert_eq!(body["model"], "llama3");
                assert_eq!(body["stream"], false);
                Json(json!({
                    "response": "```json\n[{\"field\":\"a@b.c\",\"type\":\"email\"}]\n```",
                    "done": true
                }))
            }),
        );
        let client = OllamaClient::new(serve(app).await, "llama3", TokenBudget::default());

        let items = client.ask("find pii").await.unwrap();
        assert_eq!(items, vec![json!({"field": "a@b.c", "type": "email"})]);
    }

    #[tokio::test]
    async fn server_errors_are_request_failures() {
        let app = Router::new().route(
            "/api/generate",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "model not loaded") }),
        );
        let client = OllamaClient::new(serve(app).await, "llama3", TokenBudget::default());

        let err = client.ask("find pii").await.unwrap_err();
        assert!(matches!(err, AiError::Request(ref m) if m.contains("model not loaded")));
    }

    #[tokio::test]
    async fn prose_answers_are_invalid_output() {
        let app = Router::new().route(
            "/api/generate",
            post(|| async { Json(json!({"response": "I could not find anything."})) }),
        );
        let client = OllamaClient::new(serve(app).await, "llama3", TokenBudget::default());

        assert!(matches!(
            client.ask("find pii").await,
            Err(AiError::InvalidOutput(_))
        ));
    }

    #[test]
    fn budget_is_delegated() {
        let client = OllamaClient::new("http://localhost:11434/", "llama3", TokenBudget::new(1));
        assert!(client.exceeds_token_budget("more than four chars"));
        assert!(!client.exceeds_token_budget("ok"));
    }
}
