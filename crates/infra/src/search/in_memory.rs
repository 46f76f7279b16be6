//! In-memory search index for tests/dev.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use piiscan_core::{JobFilter, JobId, Pagination, SearchTerm, SortDirection};

use super::{SearchError, SearchIndex};

/// Search index backed by a map of raw JSON documents.
///
/// Documents are stored exactly as given, so tests can plant corrupt ones.
/// [`InMemorySearchIndex::set_available`] simulates an outage.
#[derive(Debug)]
pub struct InMemorySearchIndex {
    documents: RwLock<BTreeMap<String, JsonValue>>,
    available: AtomicBool,
}

impl Default for InMemorySearchIndex {
    fn default() -> Self {
        Self {
            documents: RwLock::new(BTreeMap::new()),
            available: AtomicBool::new(true),
        }
    }
}

impl InMemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call succeed (`true`) or fail (`false`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, AtomicOrdering::SeqCst);
    }

    /// Store a document verbatim, bypassing serialisation.
    pub fn insert_raw(&self, id: impl Into<String>, document: JsonValue) {
        if let Ok(mut docs) = self.documents.write() {
            docs.insert(id.into(), document);
        }
    }

    pub fn document(&self, id: JobId) -> Option<JsonValue> {
        self.documents
            .read()
            .ok()
            .and_then(|docs| docs.get(&id.to_string()).cloned())
    }

    pub fn len(&self) -> usize {
        self.documents.read().map(|docs| docs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<(), SearchError> {
        if self.available.load(AtomicOrdering::SeqCst) {
            Ok(())
        } else {
            Err(SearchError::Request("search index unavailable".into()))
        }
    }

    fn snapshot(&self) -> Result<Vec<JsonValue>, SearchError> {
        self.documents
            .read()
            .map(|docs| docs.values().cloned().collect())
            .map_err(|_| SearchError::Request("search index lock poisoned".into()))
    }
}

fn timestamp(document: &JsonValue, field: &str) -> Option<DateTime<Utc>> {
    document
        .get(field)
        .and_then(JsonValue::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn strings<'a>(document: &'a JsonValue, field: &str) -> impl Iterator<Item = &'a str> {
    document
        .get(field)
        .and_then(JsonValue::as_array)
        .into_iter()
        .flatten()
        .filter_map(JsonValue::as_str)
}

fn matches_filter(document: &JsonValue, filter: &JobFilter) -> bool {
    if let Some(status) = filter.status {
        if document.get("status").and_then(JsonValue::as_str) != Some(status.as_str()) {
            return false;
        }
    }
    if !filter.tags.is_empty() && !strings(document, "tags").any(|t| filter.tags.iter().any(|f| f == t)) {
        return false;
    }
    true
}

fn contains_term(document: &JsonValue, needle: &str) -> bool {
    let hit = |s: &str| s.to_lowercase().contains(needle);
    strings(document, "tags").any(hit)
        || strings(document, "logs").any(hit)
        || document
            .get("results")
            .and_then(JsonValue::as_array)
            .into_iter()
            .flatten()
            .filter_map(|r| r.get("field").and_then(JsonValue::as_str))
            .any(hit)
}

fn page(documents: Vec<JsonValue>, pagination: Pagination) -> Vec<JsonValue> {
    documents
        .into_iter()
        .skip(pagination.offset())
        .take(pagination.page_size as usize)
        .collect()
}

#[async_trait]
impl SearchIndex for InMemorySearchIndex {
    async fn ensure_index(&self) -> Result<(), SearchError> {
        self.check_available()
    }

    async fn upsert(&self, id: JobId, document: JsonValue) -> Result<(), SearchError> {
        self.check_available()?;
        let mut docs = self
            .documents
            .write()
            .map_err(|_| SearchError::Request("search index lock poisoned".into()))?;
        docs.insert(id.to_string(), document);
        Ok(())
    }

    async fn query(&self, filter: &JobFilter) -> Result<Vec<JsonValue>, SearchError> {
        self.check_available()?;
        let field = filter.sort_by.field();

        let mut hits: Vec<JsonValue> = self
            .snapshot()?
            .into_iter()
            .filter(|doc| matches_filter(doc, filter))
            .collect();

        hits.sort_by(|a, b| {
            let ordering = timestamp(a, field).cmp(&timestamp(b, field));
            let ordering = match filter.sort_direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            };
            if ordering == Ordering::Equal {
                let id = |d: &JsonValue| d.get("id").and_then(JsonValue::as_str).map(str::to_owned);
                id(a).cmp(&id(b))
            } else {
                ordering
            }
        });

        Ok(page(hits, filter.pagination))
    }

    async fn search(
        &self,
        term: &SearchTerm,
        pagination: Pagination,
    ) -> Result<Vec<JsonValue>, SearchError> {
        self.check_available()?;
        let needle = term.as_str().to_lowercase();

        let mut hits: Vec<JsonValue> = self
            .snapshot()?
            .into_iter()
            .filter(|doc| contains_term(doc, &needle))
            .collect();
        hits.sort_by_key(|doc| std::cmp::Reverse(timestamp(doc, "created_at")));

        Ok(page(hits, pagination))
    }
}
