//! Storage seams used by the pipeline
//!
//! The pipeline only talks to these traits. `PgStore`/`PgCheckpointStore`
//! back them with Postgres, `FileCheckpointStore` keeps checkpoints on disk,
//! and `MemoryStore` implements everything in-process.

use async_trait::async_trait;
use statline_common::types::{CanonicalStatRecord, Category, Checkpoint, WorkItem};
use std::collections::HashSet;

use crate::error::Result;

pub mod file_checkpoint;
pub mod memory;
pub mod postgres;

pub use file_checkpoint::FileCheckpointStore;
pub use memory::MemoryStore;
pub use postgres::{PgCheckpointStore, PgStore};

/// Source-of-truth list of completed events
#[async_trait]
pub trait WorkCatalog: Send + Sync {
    /// Up to `limit` work items with `id > after_id`, ordered by id
    async fn list_work_items(
        &self,
        category: Option<Category>,
        after_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<WorkItem>>;
}

/// Persisted stat records
#[async_trait]
pub trait StatStore: Send + Sync {
    /// Ids of work items owning at least one stat record
    async fn covered_work_ids(&self, category: Option<Category>) -> Result<HashSet<i64>>;

    /// Insert or overwrite records keyed by `(subject_id, work_item_id)`.
    ///
    /// All records land or none do. Callers must not pass duplicate keys.
    async fn upsert_records(&self, records: &[CanonicalStatRecord]) -> Result<u64>;
}

/// Durable checkpoint per scope
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Saved checkpoint, or the zero value when none exists
    async fn load(&self, scope: &str) -> Result<Checkpoint>;

    /// Persist before returning. The stored cursor never moves backwards.
    async fn save(&self, scope: &str, checkpoint: &Checkpoint) -> Result<()>;

    /// Forget the checkpoint for a scope
    async fn reset(&self, scope: &str) -> Result<()>;
}
