//! In-process store for tests and dry runs
//!
//! Implements the catalog, stat store and checkpoint store. Failures can be
//! injected to exercise retry and abort paths.

use async_trait::async_trait;
use statline_common::types::{CanonicalStatRecord, Category, Checkpoint, WorkItem};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::{CheckpointStore, StatStore, WorkCatalog};
use crate::error::{IngestError, Result};

#[derive(Default)]
struct Inner {
    work_items: BTreeMap<i64, WorkItem>,
    records: BTreeMap<(String, i64), CanonicalStatRecord>,
    checkpoints: HashMap<String, Checkpoint>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    upsert_failures: AtomicU32,
    save_failures: AtomicU32,
    catalog_down: AtomicBool,
    upsert_calls: AtomicUsize,
    save_calls: AtomicUsize,
}

/// Decrement a failure budget, returning true if this call should fail
fn take_failure(budget: &AtomicU32) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_work_items(items: impl IntoIterator<Item = WorkItem>) -> Self {
        let store = Self::new();
        store.add_work_items(items);
        store
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| IngestError::store("memory store lock poisoned"))
    }

    pub fn add_work_items(&self, items: impl IntoIterator<Item = WorkItem>) {
        if let Ok(mut inner) = self.lock() {
            for item in items {
                inner.work_items.insert(item.id, item);
            }
        }
    }

    /// Snapshot of all stored records, ordered by key
    pub fn records(&self) -> Vec<CanonicalStatRecord> {
        self.lock()
            .map(|inner| inner.records.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn record(&self, subject_id: &str, work_item_id: i64) -> Option<CanonicalStatRecord> {
        self.lock()
            .ok()
            .and_then(|inner| inner.records.get(&(subject_id.to_string(), work_item_id)).cloned())
    }

    pub fn record_count(&self) -> usize {
        self.lock().map(|inner| inner.records.len()).unwrap_or(0)
    }

    /// Fail the next `n` upserts
    pub fn fail_next_upserts(&self, n: u32) {
        self.upsert_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` checkpoint saves
    pub fn fail_next_checkpoint_saves(&self, n: u32) {
        self.save_failures.store(n, Ordering::SeqCst);
    }

    pub fn set_catalog_unavailable(&self, down: bool) {
        self.catalog_down.store(down, Ordering::SeqCst);
    }

    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    pub fn checkpoint_saves(&self) -> usize {
        self.save_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkCatalog for MemoryStore {
    async fn list_work_items(
        &self,
        category: Option<Category>,
        after_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<WorkItem>> {
        if self.catalog_down.load(Ordering::SeqCst) {
            return Err(IngestError::CatalogUnavailable(
                "memory catalog marked unavailable".to_string(),
            ));
        }

        let inner = self.lock()?;
        let lower = after_id.map_or(i64::MIN, |id| id.saturating_add(1));
        if after_id == Some(i64::MAX) {
            return Ok(Vec::new());
        }

        Ok(inner
            .work_items
            .range(lower..)
            .map(|(_, item)| item)
            .filter(|item| category.map_or(true, |c| item.category == c))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl StatStore for MemoryStore {
    async fn covered_work_ids(&self, category: Option<Category>) -> Result<HashSet<i64>> {
        let inner = self.lock()?;
        Ok(inner
            .records
            .values()
            .filter(|r| category.map_or(true, |c| r.category == c))
            .map(|r| r.work_item_id)
            .collect())
    }

    async fn upsert_records(&self, records: &[CanonicalStatRecord]) -> Result<u64> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.upsert_failures) {
            return Err(IngestError::store("injected upsert failure"));
        }

        let mut inner = self.lock()?;
        for record in records {
            inner
                .records
                .insert((record.subject_id.clone(), record.work_item_id), record.clone());
        }
        Ok(records.len() as u64)
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn load(&self, scope: &str) -> Result<Checkpoint> {
        let inner = self.lock()?;
        Ok(inner.checkpoints.get(scope).cloned().unwrap_or_default())
    }

    async fn save(&self, scope: &str, checkpoint: &Checkpoint) -> Result<()> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.save_failures) {
            return Err(IngestError::store("injected checkpoint save failure"));
        }

        let mut inner = self.lock()?;
        let mut merged = checkpoint.clone();
        if let Some(existing) = inner.checkpoints.get(scope) {
            merged.advance_to(existing.last_completed_work_id);
        }
        inner.checkpoints.insert(scope.to_string(), merged);
        Ok(())
    }

    async fn reset(&self, scope: &str) -> Result<()> {
        self.lock()?.checkpoints.remove(scope);
        Ok(())
    }
}
