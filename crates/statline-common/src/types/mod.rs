//! Common types used across Statline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::StatlineError;

// ============================================================================
// Catalog Types
// ============================================================================

/// Sport partition a work item belongs to.
///
/// The category selects the provider endpoint and the fantasy weighting used
/// to derive a player's score.
///
/// # Examples
///
/// ```
/// use statline_common::types::Category;
///
/// let category: Category = "Basketball".parse().unwrap();
/// assert_eq!(category, Category::Nba);
/// assert_eq!(category.to_string(), "nba");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Nba,
    Nfl,
    Mlb,
    Nhl,
}

impl Category {
    /// All known categories, in display order
    pub const ALL: [Category; 4] = [Category::Nba, Category::Nfl, Category::Mlb, Category::Nhl];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Nba => "nba",
            Category::Nfl => "nfl",
            Category::Mlb => "mlb",
            Category::Nhl => "nhl",
        }
    }
}

impl std::str::FromStr for Category {
    type Err = StatlineError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "nba" | "basketball" => Ok(Category::Nba),
            "nfl" | "football" => Ok(Category::Nfl),
            "mlb" | "baseball" => Ok(Category::Mlb),
            "nhl" | "hockey" => Ok(Category::Nhl),
            _ => Err(StatlineError::InvalidCategory(s.to_string())),
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One completed event in the source-of-truth catalog.
///
/// Work items are created by enumeration and never mutated afterwards. The
/// `id` is the ordering key used for checkpointing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Catalog identifier, unique and totally ordered
    pub id: i64,

    /// Provider-side event identifier
    pub external_ref: String,

    /// Sport partition
    pub category: Category,

    /// Team identifiers taking part in the event
    pub participants: Vec<String>,
}

impl WorkItem {
    pub fn new(id: i64, external_ref: impl Into<String>, category: Category) -> Self {
        Self {
            id,
            external_ref: external_ref.into(),
            category,
            participants: Vec::new(),
        }
    }

    pub fn with_participants<I, S>(mut self, participants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.participants = participants.into_iter().map(Into::into).collect();
        self
    }
}

// ============================================================================
// Stat Records
// ============================================================================

/// A single stat attribute value.
///
/// Most attributes are numeric; a few (position, starter flag) are kept as
/// text so nothing the provider reported is lost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatValue {
    Number(f64),
    Text(String),
}

impl StatValue {
    /// Numeric view of the value, `None` for text
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StatValue::Number(n) => Some(*n),
            StatValue::Text(_) => None,
        }
    }
}

impl From<f64> for StatValue {
    fn from(value: f64) -> Self {
        StatValue::Number(value)
    }
}

impl From<&str> for StatValue {
    fn from(value: &str) -> Self {
        StatValue::Text(value.to_string())
    }
}

/// Canonical per-player stat line for one work item.
///
/// Unique by `(subject_id, work_item_id)`; a later write for the same key
/// replaces the earlier one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalStatRecord {
    /// Player identifier
    pub subject_id: String,

    /// Work item (event) the line belongs to
    pub work_item_id: i64,

    /// Team identifier
    pub group_id: String,

    /// Sport partition of the work item
    pub category: Category,

    /// Canonical stat name -> value
    pub attributes: BTreeMap<String, StatValue>,

    /// Category-weighted fantasy score
    pub derived_score: f64,
}

impl CanonicalStatRecord {
    /// Upsert key
    pub fn key(&self) -> (&str, i64) {
        (self.subject_id.as_str(), self.work_item_id)
    }
}

// ============================================================================
// Checkpoints
// ============================================================================

/// Durable ingestion progress for one scope.
///
/// `last_completed_work_id` never moves backwards: [`Checkpoint::advance_to`]
/// ignores lower cursors.
///
/// # Examples
///
/// ```
/// use statline_common::types::Checkpoint;
///
/// let mut checkpoint = Checkpoint::default();
/// checkpoint.advance_to(Some(40));
/// checkpoint.advance_to(Some(12));
/// assert_eq!(checkpoint.last_completed_work_id, Some(40));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Highest work id whose whole prefix is durably settled
    pub last_completed_work_id: Option<i64>,

    /// Work items that reached a terminal state
    pub processed_count: u64,

    /// Work items that produced persisted stat records
    pub success_count: u64,

    /// Work items that exhausted fetch retries
    pub failure_count: u64,

    /// Work items whose payload could not be normalized
    #[serde(default)]
    pub skipped_count: u64,

    /// Work items the provider does not know about
    #[serde(default)]
    pub not_found_count: u64,

    /// When the checkpoint was last persisted
    pub saved_at: Option<DateTime<Utc>>,
}

impl Checkpoint {
    /// Move the cursor forward; lower or missing cursors are ignored
    pub fn advance_to(&mut self, work_id: Option<i64>) {
        if let Some(id) = work_id {
            if self.last_completed_work_id.map_or(true, |current| id > current) {
                self.last_completed_work_id = Some(id);
            }
        }
    }

    /// True when nothing was ever recorded for this scope
    pub fn is_zero(&self) -> bool {
        self.last_completed_work_id.is_none() && self.processed_count == 0
    }
}
