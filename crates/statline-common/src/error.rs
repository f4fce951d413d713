//! Error types for Statline

use thiserror::Error;

/// Result type alias for Statline operations
pub type Result<T> = std::result::Result<T, StatlineError>;

/// Main error type shared across Statline crates
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StatlineError {
    #[error("Unknown category '{0}'. Expected one of: nba, nfl, mlb, nhl")]
    InvalidCategory(String),
}
