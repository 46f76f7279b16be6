use std::collections::HashMap;
use std::time::Duration;

use axum::{routing::post, Json, Router};
use piiscan_infra::AppConfig;
use reqwest::StatusCode;
use serde_json::json;

struct TestServer {
    base_url: String,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    async fn spawn() -> Self {
        let (model_url, model) = spawn_model().await;

        let env: HashMap<&str, String> = HashMap::from([
            ("APP_ENV", "test".to_string()),
            ("LLM_API_URL", model_url),
            ("LLM_MAX_PROMPT_TOKENS", "100000".to_string()),
            ("LOG_FLUSH_INTERVAL_IN_SECONDS", "1".to_string()),
        ]);
        let config = AppConfig::from_lookup(|key| env.get(key).cloned()).unwrap();

        // Same wiring as prod, but in-memory adapters and an ephemeral port.
        let app = piiscan_api::app::build_app(&config).await.unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let router = app.router;
        let server = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            base_url,
            handles: vec![model, server],
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

/// Fake Ollama server that reports every email address it is shown.
async fn spawn_model() -> (String, tokio::task::JoinHandle<()>) {
    let app = Router::new().route(
        "/api/generate",
        post(|Json(body): Json<serde_json::Value>| async move {
            let prompt = body["prompt"].as_str().unwrap_or_default();
            let logs = prompt.split("### Logs to analyse").nth(1).unwrap_or_default();
            let findings: Vec<serde_json::Value> = logs
                .split(|c: char| c.is_whitespace() || c == '"')
                .filter(|word| word.contains('@') && word.contains('.'))
                .map(|email| json!({"field": email, "type": "email", "source": "log-message"}))
                .collect();
            Json(json!({
                "response": serde_json::to_string(&findings).unwrap(),
                "done": true,
            }))
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), handle)
}

async fn get_job_eventually(
    client: &reqwest::Client,
    srv: &TestServer,
    id: &str,
    status: &str,
) -> serde_json::Value {
    // Processing is asynchronous; poll until the applier has stored the outcome.
    for _ in 0..100 {
        let res = client
            .get(srv.url(&format!("/api/jobs/{id}")))
            .send()
            .await
            .unwrap();
        if res.status() == StatusCode::OK {
            let job: serde_json::Value = res.json().await.unwrap();
            if job["status"] == status {
                return job;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    panic!("job {id} did not reach {status} within timeout");
}

#[tokio::test]
async fn health_is_public() {
    let srv = TestServer::spawn().await;

    let res = reqwest::get(srv.url("/health")).await.unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn created_job_is_processed_and_searchable() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/api/jobs"))
        .json(&json!({
            "tags": ["checkout"],
            "logs": [{"service": "checkout", "message": "receipt sent to ada@example.com"}],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let created: serde_json::Value = res.json().await.unwrap();
    assert_eq!(created["status"], "processing");
    assert_eq!(created["version"], "1.0.0");
    let id = created["id"].as_str().unwrap().to_string();

    let job = get_job_eventually(&client, &srv, &id, "success").await;
    assert_eq!(job["results"][0]["type"], "email");
    assert_eq!(job["results"][0]["field"], "ada@example.com");
    assert!(job["completed_at"].is_string());

    let res = client
        .get(srv.url("/api/jobs/search/ada@example.com"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let found: Vec<serde_json::Value> = res.json().await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["id"], id.as_str());
}

#[tokio::test]
async fn duplicate_ids_conflict() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let body = json!({
        "id": "0190b5a4-5b3c-7d2e-9f00-000000000001",
        "tags": ["auth"],
        "logs": ["user bob logged in"],
    });

    let first = client.post(srv.url("/api/jobs")).json(&body).send().await.unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = client.post(srv.url("/api/jobs")).json(&body).send().await.unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
    let error: serde_json::Value = second.json().await.unwrap();
    assert_eq!(error["error"], "already_exists");
}

#[tokio::test]
async fn invalid_requests_are_rejected_with_json_errors() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/api/jobs"))
        .json(&json!({"tags": ["auth"], "logs": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let error: serde_json::Value = res.json().await.unwrap();
    assert_eq!(error["error"], "validation_error");

    let res = client.get(srv.url("/api/jobs/not-a-uuid")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .get(srv.url("/api/jobs?page_size=500"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client.get(srv.url("/api/jobs/search/abc")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let srv = TestServer::spawn().await;

    let res = reqwest::get(srv.url("/api/jobs/0190b5a4-5b3c-7d2e-9f00-0000000000ff"))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let error: serde_json::Value = res.json().await.unwrap();
    assert_eq!(error["error"], "not_found");
}

#[tokio::test]
async fn collected_logs_become_jobs_after_the_flush_interval() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let payload = json!([
        {"service": "billing", "message": "invoice mailed to carol@example.org"},
        {"service": "billing", "message": "retry scheduled"},
    ]);
    let res = client
        .post(srv.url("/api/logs"))
        .body(payload.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["accepted"], 2);

    let mut jobs = Vec::new();
    for _ in 0..100 {
        let res = client
            .get(srv.url("/api/jobs?status=success&tags=billing"))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        jobs = res.json::<Vec<serde_json::Value>>().await.unwrap();
        if !jobs.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    assert_eq!(jobs.len(), 1, "expected one billing job after the flush");
    assert_eq!(jobs[0]["logs"].as_array().unwrap().len(), 2);
    assert_eq!(jobs[0]["results"][0]["field"], "carol@example.org");
}
