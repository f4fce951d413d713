//! Ingestion run configuration
//!
//! Every knob has a named default, can be overridden through `STATLINE_*`
//! environment variables, and is checked by `validate()` before a run starts.

use serde::{Deserialize, Serialize};
use statline_common::types::Category;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{IngestError, Result};
use crate::pipeline::backoff::{BackoffPolicy, DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_MAX_MS};

pub const DEFAULT_CONCURRENCY: usize = 10;
pub const DEFAULT_BATCH_SIZE: usize = 200;
pub const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 20;
pub const DEFAULT_BUFFER_CAPACITY: usize = 256;
pub const DEFAULT_PAGE_SIZE: usize = 1000;
pub const DEFAULT_USER_AGENT: &str = concat!("statline-ingest/", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_CHECKPOINT_DIR: &str = "./.statline/checkpoints";

/// Parameters for one ingestion run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Restrict the run to one category; `None` ingests everything
    pub category: Option<Category>,
    /// Maximum fetches in flight
    pub concurrency: usize,
    /// Buffered record count that triggers a flush
    pub batch_size: usize,
    /// Time since the last flush that triggers a flush
    pub flush_interval: Duration,
    /// Retries after the first attempt, for fetches and flushes
    pub max_retries: u32,
    /// Per-attempt fetch timeout
    pub fetch_timeout: Duration,
    pub backoff: BackoffPolicy,
    /// Outcomes queued between the fetch pool and the coordinator
    pub buffer_capacity: usize,
    /// Cap on the backlog size
    pub limit: Option<usize>,
    /// Start after the saved checkpoint cursor
    pub resume: bool,
    /// Catalog keyset page size
    pub page_size: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            category: None,
            concurrency: DEFAULT_CONCURRENCY,
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: Duration::from_secs(DEFAULT_FLUSH_INTERVAL_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            backoff: BackoffPolicy::default(),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            limit: None,
            resume: true,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

impl RunConfig {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let category = match std::env::var("STATLINE_CATEGORY") {
            Ok(value) => parse_category_filter(&value)?,
            Err(_) => None,
        };

        let backoff = BackoffPolicy::new(
            Duration::from_millis(
                env_parse("STATLINE_BACKOFF_BASE_MS").unwrap_or(DEFAULT_BACKOFF_BASE_MS),
            ),
            Duration::from_millis(
                env_parse("STATLINE_BACKOFF_MAX_MS").unwrap_or(DEFAULT_BACKOFF_MAX_MS),
            ),
        );

        let config = Self {
            category,
            concurrency: env_parse("STATLINE_CONCURRENCY").unwrap_or(defaults.concurrency),
            batch_size: env_parse("STATLINE_BATCH_SIZE").unwrap_or(defaults.batch_size),
            flush_interval: Duration::from_secs(
                env_parse("STATLINE_FLUSH_INTERVAL_SECS").unwrap_or(DEFAULT_FLUSH_INTERVAL_SECS),
            ),
            max_retries: env_parse("STATLINE_MAX_RETRIES").unwrap_or(defaults.max_retries),
            fetch_timeout: Duration::from_secs(
                env_parse("STATLINE_FETCH_TIMEOUT_SECS").unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS),
            ),
            backoff,
            buffer_capacity: env_parse("STATLINE_BUFFER_CAPACITY")
                .unwrap_or(defaults.buffer_capacity),
            limit: env_parse("STATLINE_LIMIT"),
            resume: env_parse("STATLINE_RESUME").unwrap_or(true),
            page_size: env_parse("STATLINE_PAGE_SIZE").unwrap_or(defaults.page_size),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(IngestError::config("concurrency must be greater than 0"));
        }
        if self.batch_size == 0 {
            return Err(IngestError::config("batch_size must be greater than 0"));
        }
        if self.flush_interval.is_zero() {
            return Err(IngestError::config("flush_interval must be greater than 0"));
        }
        if self.fetch_timeout.is_zero() {
            return Err(IngestError::config("fetch_timeout must be greater than 0"));
        }
        if self.buffer_capacity == 0 {
            return Err(IngestError::config("buffer_capacity must be greater than 0"));
        }
        if self.page_size == 0 {
            return Err(IngestError::config("page_size must be greater than 0"));
        }
        if self.limit == Some(0) {
            return Err(IngestError::config("limit must be greater than 0 when set"));
        }
        if self.backoff.base > self.backoff.max {
            return Err(IngestError::config(format!(
                "backoff base ({:?}) exceeds backoff max ({:?})",
                self.backoff.base, self.backoff.max
            )));
        }
        Ok(())
    }

    /// Checkpoint key for this run
    pub fn scope(&self) -> String {
        checkpoint_scope(self.category)
    }
}

/// Category filter from user input; empty or `all` means no filter
pub fn parse_category_filter(value: &str) -> Result<Option<Category>> {
    let value = value.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("all") {
        return Ok(None);
    }
    Ok(Some(value.parse()?))
}

/// Checkpoint key for a category filter
pub fn checkpoint_scope(category: Option<Category>) -> String {
    category.map_or_else(|| "all".to_string(), |c| c.as_str().to_string())
}

/// Remote stat provider connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub user_agent: String,
}

impl ProviderConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }

    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("STATLINE_PROVIDER_URL")
            .map_err(|_| IngestError::config("STATLINE_PROVIDER_URL not set"))?;

        let config = Self {
            base_url,
            api_key: std::env::var("STATLINE_PROVIDER_API_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
            user_agent: std::env::var("STATLINE_PROVIDER_USER_AGENT")
                .unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(IngestError::config(format!(
                "provider URL must start with http:// or https://, got: {}",
                self.base_url
            )));
        }
        if self.user_agent.trim().is_empty() {
            return Err(IngestError::config("provider user agent cannot be empty"));
        }
        Ok(())
    }
}

/// Where checkpoints are persisted
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum CheckpointBackend {
    #[default]
    Postgres,
    File { dir: PathBuf },
}

impl CheckpointBackend {
    pub fn parse(kind: &str, dir: Option<PathBuf>) -> Result<Self> {
        match kind.trim().to_lowercase().as_str() {
            "postgres" | "pg" | "db" => Ok(CheckpointBackend::Postgres),
            "file" => Ok(CheckpointBackend::File {
                dir: dir.unwrap_or_else(|| PathBuf::from(DEFAULT_CHECKPOINT_DIR)),
            }),
            other => Err(IngestError::config(format!(
                "invalid checkpoint backend '{}'. Must be 'postgres' or 'file'",
                other
            ))),
        }
    }

    pub fn from_env() -> Result<Self> {
        let kind =
            std::env::var("STATLINE_CHECKPOINT_BACKEND").unwrap_or_else(|_| "postgres".to_string());
        let dir = std::env::var("STATLINE_CHECKPOINT_DIR").ok().map(PathBuf::from);
        Self::parse(&kind, dir)
    }
}
