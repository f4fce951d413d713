//! Error types for the ingestion pipeline

use statline_common::StatlineError;
use thiserror::Error;

/// Result type for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Errors surfaced by the ingestion pipeline
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Work catalog unavailable: {0}")]
    CatalogUnavailable(String),

    #[error("Fetch failed for work item {work_id} after {attempts} attempt(s): {reason}")]
    FetchFailed {
        work_id: i64,
        attempts: u32,
        reason: String,
    },

    #[error("Flush failed after {attempts} attempt(s): {reason}")]
    FlushFailed { attempts: u32, reason: String },

    #[error("Checkpoint save failed for scope '{scope}': {reason}")]
    CheckpointSaveFailed { scope: String, reason: String },

    #[error("Checkpoint load failed for scope '{scope}': {reason}")]
    CheckpointLoad { scope: String, reason: String },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Common(#[from] StatlineError),
}

impl IngestError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }
}

impl From<sqlx::migrate::MigrateError> for IngestError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        IngestError::Store(format!("migration failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_failed_message() {
        let err = IngestError::FetchFailed {
            work_id: 7,
            attempts: 4,
            reason: "timeout".to_string(),
        };
        assert!(err.to_string().contains("work item 7"));
        assert!(err.to_string().contains("4 attempt(s)"));
    }

    #[test]
    fn test_flush_failed_message() {
        let err = IngestError::FlushFailed {
            attempts: 3,
            reason: "connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Flush failed after 3 attempt(s): connection refused"
        );
    }

    #[test]
    fn test_common_error_is_transparent() {
        let err: IngestError = StatlineError::InvalidCategory("golf".to_string()).into();
        assert_eq!(
            err.to_string(),
            "Unknown category 'golf'. Expected one of: nba, nfl, mlb, nhl"
        );
    }
}
