//! Findings: detected instances of personal data inside a job's logs.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{DomainError, DomainResult};
use crate::taxonomy::PiiType;

/// Where in a log line a value was found.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FindingSource {
    Header,
    Body,
    LogMessage,
    QueryParam,
    Unknown,
}

/// One detected PII value.
///
/// Findings are owned by the job that produced them; `log_entry` is only a
/// back-reference to the log line (see [`crate::Job::log_for`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// The raw detected value, as text.
    #[serde(deserialize_with = "scalar_text")]
    pub field: String,

    #[serde(rename = "type")]
    pub pii_type: PiiType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<FindingSource>,

    /// Original log line the value was extracted from.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "log_entry_text")]
    pub log_entry: Option<String>,
}

impl Finding {
    pub fn new(field: impl Into<String>, pii_type: PiiType) -> Self {
        Self {
            field: field.into(),
            pii_type,
            source: None,
            log_entry: None,
        }
    }

    pub fn with_source(mut self, source: FindingSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_log_entry(mut self, log_entry: impl Into<String>) -> Self {
        self.log_entry = Some(log_entry.into());
        self
    }

    /// Parse the JSON objects a language model returned into findings.
    ///
    /// All-or-nothing: one malformed element rejects the whole answer.
    pub fn parse_all(values: Vec<JsonValue>) -> DomainResult<Vec<Finding>> {
        values
            .into_iter()
            .enumerate()
            .map(|(index, value)| {
                let finding: Finding = serde_json::from_value(value).map_err(|e| {
                    DomainError::validation(format!("finding #{index} is malformed: {e}"))
                })?;
                finding.validate().map_err(|e| {
                    DomainError::validation(format!("finding #{index} is invalid: {e}"))
                })?;
                Ok(finding)
            })
            .collect()
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.field.trim().is_empty() {
            return Err(DomainError::validation("finding field must not be empty"));
        }
        Ok(())
    }
}

/// Models sometimes report numeric values (phone numbers, ids) unquoted.
fn scalar_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match JsonValue::deserialize(deserializer)? {
        JsonValue::String(s) => Ok(s),
        JsonValue::Number(n) => Ok(n.to_string()),
        JsonValue::Bool(b) => Ok(b.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a scalar value, found {other}"
        ))),
    }
}

/// `log_entry` arrives either as the raw line or as the parsed JSON object.
fn log_entry_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<JsonValue>::deserialize(deserializer)? {
        None | Some(JsonValue::Null) => None,
        Some(JsonValue::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}
