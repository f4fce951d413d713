//! Which work items already own stat records

use statline_common::types::Category;
use std::collections::HashSet;
use tracing::info;

use crate::error::Result;
use crate::store::StatStore;

/// Set of covered work item ids, loaded once per run and extended after
/// each flush
#[derive(Debug, Clone, Default)]
pub struct CoverageIndex {
    covered: HashSet<i64>,
}

impl CoverageIndex {
    pub async fn load(store: &dyn StatStore, category: Option<Category>) -> Result<Self> {
        let covered = store.covered_work_ids(category).await?;
        info!(covered = covered.len(), category = ?category, "Coverage index loaded");
        Ok(Self { covered })
    }

    pub fn from_ids(ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            covered: ids.into_iter().collect(),
        }
    }

    pub fn contains(&self, work_id: i64) -> bool {
        self.covered.contains(&work_id)
    }

    pub fn mark_covered(&mut self, ids: impl IntoIterator<Item = i64>) {
        self.covered.extend(ids);
    }

    pub fn len(&self) -> usize {
        self.covered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.covered.is_empty()
    }
}
