//! Elasticsearch-backed [`SearchIndex`] over the REST API.
//!
//! Documents live in a single index (default `jobs`) keyed by job id. Writes
//! use `_update` with `doc_as_upsert` so a status update never needs a prior
//! read; reads return `hits.hits[]._source`.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Value as JsonValue, json};
use tracing::{debug, instrument};

use piiscan_core::{JobFilter, JobId, Pagination, SearchTerm};

use super::{SearchError, SearchIndex};

/// HTTP client for one Elasticsearch index.
#[derive(Debug, Clone)]
pub struct ElasticsearchIndex {
    http: reqwest::Client,
    base_url: String,
    index: String,
}

impl ElasticsearchIndex {
    pub fn new(base_url: impl Into<String>, index: impl Into<String>) -> Self {
        Self::with_http_client(reqwest::Client::new(), base_url, index)
    }

    pub fn with_http_client(
        http: reqwest::Client,
        base_url: impl Into<String>,
        index: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            index: index.into(),
        }
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    fn url(&self, path: &str) -> String {
        if path.is_empty() {
            format!("{}/{}", self.base_url, self.index)
        } else {
            format!("{}/{}/{}", self.base_url, self.index, path)
        }
    }

    async fn run_search(&self, body: JsonValue) -> Result<Vec<JsonValue>, SearchError> {
        let response = self
            .http
            .post(self.url("_search"))
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;
        let response = ensure_success(response).await?;
        let body: JsonValue = response
            .json()
            .await
            .map_err(|e| SearchError::InvalidResponse(e.to_string()))?;
        sources(body)
    }
}

/// Index mapping: keyword ids/status/tags, date timestamps, nested findings.
pub fn index_mapping() -> JsonValue {
    json!({
        "mappings": {
            "properties": {
                "id": { "type": "keyword" },
                "version": { "type": "keyword" },
                "status": { "type": "keyword" },
                "tags": { "type": "keyword" },
                "logs": { "type": "text" },
                "created_at": { "type": "date" },
                "updated_at": { "type": "date" },
                "completed_at": { "type": "date" },
                "error_message": { "type": "text" },
                "error_code": { "type": "keyword" },
                "results": {
                    "type": "nested",
                    "properties": {
                        "field": { "type": "text", "fields": { "raw": { "type": "keyword" } } },
                        "type": { "type": "keyword" },
                        "source": { "type": "keyword" },
                        "log_entry": { "type": "text", "index": false }
                    }
                }
            }
        }
    })
}

/// `_search` body for a structured listing.
pub fn filter_query(filter: &JobFilter) -> JsonValue {
    let mut clauses = Vec::new();
    if let Some(status) = filter.status {
        clauses.push(json!({ "term": { "status": status.as_str() } }));
    }
    if !filter.tags.is_empty() {
        clauses.push(json!({ "terms": { "tags": filter.tags } }));
    }

    json!({
        "query": { "bool": { "filter": clauses } },
        "sort": [
            { (filter.sort_by.field()): { "order": filter.sort_direction.as_str(), "unmapped_type": "date" } },
            { "id": { "order": "asc" } }
        ],
        "from": filter.pagination.offset(),
        "size": filter.pagination.page_size,
    })
}

/// `_search` body for free-text search over tags, logs and finding values.
pub fn term_query(term: &SearchTerm, page: Pagination) -> JsonValue {
    json!({
        "query": {
            "bool": {
                "should": [
                    { "term": { "tags": term.as_str() } },
                    { "match": { "logs": term.as_str() } },
                    {
                        "nested": {
                            "path": "results",
                            "query": { "match": { "results.field": term.as_str() } }
                        }
                    }
                ],
                "minimum_should_match": 1
            }
        },
        "sort": [{ "created_at": { "order": "desc" } }],
        "from": page.offset(),
        "size": page.page_size,
    })
}

fn request_error(err: reqwest::Error) -> SearchError {
    SearchError::Request(err.to_string())
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, SearchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SearchError::Response {
        status: status.as_u16(),
        body,
    })
}

fn sources(body: JsonValue) -> Result<Vec<JsonValue>, SearchError> {
    let hits = body
        .get("hits")
        .and_then(|h| h.get("hits"))
        .and_then(JsonValue::as_array)
        .ok_or_else(|| SearchError::InvalidResponse("missing hits.hits".into()))?;

    hits.iter()
        .map(|hit| {
            hit.get("_source")
                .cloned()
                .ok_or_else(|| SearchError::InvalidResponse("hit without _source".into()))
        })
        .collect()
}

#[async_trait]
impl SearchIndex for ElasticsearchIndex {
    #[instrument(skip(self), fields(index = %self.index), err)]
    async fn ensure_index(&self) -> Result<(), SearchError> {
        let response = self
            .http
            .head(self.url(""))
            .send()
            .await
            .map_err(request_error)?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => {
                debug!("creating search index");
                let response = self
                    .http
                    .put(self.url(""))
                    .json(&index_mapping())
                    .send()
                    .await
                    .map_err(request_error)?;
                ensure_success(response).await.map(|_| ())
            }
            status => Err(SearchError::Response {
                status: status.as_u16(),
                body: String::new(),
            }),
        }
    }

    #[instrument(skip(self, document), fields(index = %self.index, job_id = %id), err)]
    async fn upsert(&self, id: JobId, document: JsonValue) -> Result<(), SearchError> {
        let response = self
            .http
            .post(self.url(&format!("_update/{id}")))
            .json(&json!({ "doc": document, "doc_as_upsert": true }))
            .send()
            .await
            .map_err(request_error)?;
        ensure_success(response).await.map(|_| ())
    }

    #[instrument(skip(self, filter), fields(index = %self.index), err)]
    async fn query(&self, filter: &JobFilter) -> Result<Vec<JsonValue>, SearchError> {
        self.run_search(filter_query(filter)).await
    }

    #[instrument(skip(self), fields(index = %self.index), err)]
    async fn search(
        &self,
        term: &SearchTerm,
        page: Pagination,
    ) -> Result<Vec<JsonValue>, SearchError> {
        self.run_search(term_query(term, page)).await
    }
}
