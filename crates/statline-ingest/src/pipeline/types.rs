//! Values passed between pipeline stages

use serde::{Deserialize, Serialize};
use serde_json::Value;
use statline_common::types::{CanonicalStatRecord, Checkpoint, WorkItem};
use uuid::Uuid;

/// Result of fetching one work item
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Fetched(Value),
    NotFound,
}

/// Terminal result of processing one work item in the fetch pool
#[derive(Debug, Clone)]
pub enum ItemResult {
    /// Normalized stat lines, never empty
    Records(Vec<CanonicalStatRecord>),
    NotFound,
    Skipped(String),
    /// Fetch retries exhausted or a permanent provider error
    Failed(String),
}

/// Message from the fetch pool to the coordinator
#[derive(Debug, Clone)]
pub struct ItemOutcome {
    pub work_id: i64,
    pub result: ItemResult,
}

impl ItemOutcome {
    pub fn new(item: &WorkItem, result: ItemResult) -> Self {
        Self {
            work_id: item.id,
            result,
        }
    }
}

/// What the caller gets back from a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    /// Work items that reached a durable terminal state this run
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    pub not_found: u64,
    pub flushes: u64,
    pub records_written: u64,
    pub cancelled: bool,
    pub final_checkpoint: Checkpoint,
    pub duration_secs: f64,
}

impl RunSummary {
    pub fn empty(run_id: Uuid, checkpoint: Checkpoint) -> Self {
        Self {
            run_id,
            processed: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            not_found: 0,
            flushes: 0,
            records_written: 0,
            cancelled: false,
            final_checkpoint: checkpoint,
            duration_secs: 0.0,
        }
    }
}
