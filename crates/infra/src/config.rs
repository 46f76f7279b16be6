//! Configuration loading and representation.
//!
//! Values come from the process environment. Every key has a default so a
//! bare `cargo run` starts a fully in-memory pipeline; pointing the URL keys
//! at real services swaps in Postgres, Elasticsearch and Redis.

use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;

use piiscan_events::Topic;

use crate::ingest::buffer::LogBufferConfig;
use crate::jobs::JobTopics;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("cannot parse {key}={value}: {reason}")]
    Parse {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AppEnv {
    #[default]
    Local,
    Test,
    Development,
    Production,
}

impl AppEnv {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppEnv::Local => "local",
            AppEnv::Test => "test",
            AppEnv::Development => "development",
            AppEnv::Production => "production",
        }
    }
}

impl FromStr for AppEnv {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(AppEnv::Local),
            "test" => Ok(AppEnv::Test),
            "development" => Ok(AppEnv::Development),
            "production" => Ok(AppEnv::Production),
            other => Err(format!(
                "expected one of local, test, development, production; got {other}"
            )),
        }
    }
}

/// Language model settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmConfig {
    pub api_url: String,
    pub model: String,
    /// Upper bound on a single model call.
    pub timeout: Duration,
    pub max_prompt_tokens: usize,
}

/// Search index settings. No URL means an in-memory index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchConfig {
    pub url: Option<String>,
    pub index: String,
}

/// Complete process configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub app_env: AppEnv,
    pub http_port: u16,
    /// Postgres connection string. No value means an in-memory primary store.
    pub database_url: Option<String>,
    /// Redis URL for the queue. No value means in-process pub/sub.
    pub queue_url: Option<String>,
    pub search: SearchConfig,
    pub llm: LlmConfig,
    pub topics: JobTopics,
    pub buffer: LogBufferConfig,
    pub max_logs_per_job: usize,
    /// Messages handled concurrently per topic.
    pub message_prefetch: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_env: AppEnv::Local,
            http_port: 6000,
            database_url: None,
            queue_url: None,
            search: SearchConfig {
                url: None,
                index: "jobs".to_owned(),
            },
            llm: LlmConfig {
                api_url: "http://localhost:11434".to_owned(),
                model: "llama3".to_owned(),
                timeout: Duration::from_secs(300),
                max_prompt_tokens: piiscan_ai::DEFAULT_MAX_PROMPT_TOKENS,
            },
            topics: JobTopics::default(),
            buffer: LogBufferConfig::default(),
            max_logs_per_job: piiscan_core::DEFAULT_MAX_LOGS_PER_JOB,
            message_prefetch: 10,
        }
    }
}

const FLUSH_INTERVAL_RANGE: RangeInclusive<u64> = 1..=300;
const LOG_COUNT_RANGE: RangeInclusive<usize> = 1..=300;
const LLM_TIMEOUT_RANGE: RangeInclusive<u64> = 1..=3600;

impl AppConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (tests, alternative sources).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());

        let app_env = match get("APP_ENV") {
            Some(raw) => raw.parse().map_err(|reason| ConfigError::Parse {
                key: "APP_ENV",
                value: raw.clone(),
                reason,
            })?,
            None => defaults.app_env,
        };

        let flush_secs: u64 = parse_or(
            &get,
            "LOG_FLUSH_INTERVAL_IN_SECONDS",
            defaults.buffer.flush_interval.as_secs(),
        )?;
        let llm_timeout_secs: u64 =
            parse_or(&get, "LLM_TIMEOUT_IN_SECONDS", defaults.llm.timeout.as_secs())?;

        let config = Self {
            app_env,
            http_port: parse_or(&get, "HTTP_PORT", defaults.http_port)?,
            database_url: get("DB_CONNECTION_STRING"),
            queue_url: get("QUEUE_URL"),
            search: SearchConfig {
                url: get("ELASTICSEARCH_URL"),
                index: get("JOB_ELASTICSEARCH_INDEX").unwrap_or(defaults.search.index),
            },
            llm: LlmConfig {
                api_url: get("LLM_API_URL").unwrap_or(defaults.llm.api_url),
                model: get("LLM_MODEL").unwrap_or(defaults.llm.model),
                timeout: Duration::from_secs(llm_timeout_secs),
                max_prompt_tokens: parse_or(
                    &get,
                    "LLM_MAX_PROMPT_TOKENS",
                    defaults.llm.max_prompt_tokens,
                )?,
            },
            topics: JobTopics {
                job_created: get("NEW_JOB_CREATED_TOPIC")
                    .map(Topic::new)
                    .unwrap_or(defaults.topics.job_created),
                job_status_updated: get("JOB_STATUS_UPDATED_TOPIC")
                    .map(Topic::new)
                    .unwrap_or(defaults.topics.job_status_updated),
            },
            buffer: LogBufferConfig {
                max_entries: parse_or(
                    &get,
                    "MAX_NUMBER_OF_LOGS_TO_COLLECT",
                    defaults.buffer.max_entries,
                )?,
                flush_interval: Duration::from_secs(flush_secs),
            },
            max_logs_per_job: parse_or(&get, "MAX_LOGS_PER_JOB", defaults.max_logs_per_job)?,
            message_prefetch: parse_or(&get, "MESSAGE_PREFETCH_COUNT", defaults.message_prefetch)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http_port == 0 {
            return Err(invalid("HTTP_PORT", "must be 1-65535"));
        }
        if !FLUSH_INTERVAL_RANGE.contains(&self.buffer.flush_interval.as_secs()) {
            return Err(invalid(
                "LOG_FLUSH_INTERVAL_IN_SECONDS",
                format!("must be {}-{}", FLUSH_INTERVAL_RANGE.start(), FLUSH_INTERVAL_RANGE.end()),
            ));
        }
        for (key, value) in [
            ("MAX_NUMBER_OF_LOGS_TO_COLLECT", self.buffer.max_entries),
            ("MAX_LOGS_PER_JOB", self.max_logs_per_job),
            ("MESSAGE_PREFETCH_COUNT", self.message_prefetch),
        ] {
            if !LOG_COUNT_RANGE.contains(&value) {
                return Err(invalid(
                    key,
                    format!("must be {}-{}", LOG_COUNT_RANGE.start(), LOG_COUNT_RANGE.end()),
                ));
            }
        }
        if !LLM_TIMEOUT_RANGE.contains(&self.llm.timeout.as_secs()) {
            return Err(invalid(
                "LLM_TIMEOUT_IN_SECONDS",
                format!("must be {}-{}", LLM_TIMEOUT_RANGE.start(), LLM_TIMEOUT_RANGE.end()),
            ));
        }
        if self.llm.max_prompt_tokens == 0 {
            return Err(invalid("LLM_MAX_PROMPT_TOKENS", "must be at least 1"));
        }
        if self.llm.model.is_empty() {
            return Err(invalid("LLM_MODEL", "must not be empty"));
        }
        if self.search.index.is_empty() {
            return Err(invalid("JOB_ELASTICSEARCH_INDEX", "must not be empty"));
        }
        if self.topics.job_created == self.topics.job_status_updated {
            return Err(invalid(
                "JOB_STATUS_UPDATED_TOPIC",
                "must differ from NEW_JOB_CREATED_TOPIC",
            ));
        }
        Ok(())
    }
}

fn invalid(key: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.into(),
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Parse {
            key,
            reason: e.to_string(),
            value: raw,
        }),
        None => Ok(default),
    }
}
