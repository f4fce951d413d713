//! Backlog enumeration
//!
//! Walks the catalog in keyset pages (`id > cursor ORDER BY id LIMIT n`) and
//! keeps the work items that have no stat records yet.

use statline_common::types::{Category, WorkItem};
use tracing::{debug, info};

use super::coverage::CoverageIndex;
use crate::error::{IngestError, Result};
use crate::store::WorkCatalog;

pub struct WorkEnumerator<'a> {
    catalog: &'a dyn WorkCatalog,
    page_size: usize,
}

impl<'a> WorkEnumerator<'a> {
    pub fn new(catalog: &'a dyn WorkCatalog, page_size: usize) -> Self {
        Self {
            catalog,
            page_size: page_size.max(1),
        }
    }

    /// Ordered backlog of uncovered work items with `id > resume_from`.
    ///
    /// Ids are strictly increasing. `limit` caps the backlog length.
    pub async fn enumerate(
        &self,
        category: Option<Category>,
        resume_from: Option<i64>,
        coverage: &CoverageIndex,
        limit: Option<usize>,
    ) -> Result<Vec<WorkItem>> {
        let mut backlog = Vec::new();
        let mut cursor = resume_from;
        let mut scanned = 0usize;

        'pages: loop {
            let page = self
                .catalog
                .list_work_items(category, cursor, self.page_size)
                .await
                .map_err(|e| match e {
                    IngestError::CatalogUnavailable(_) => e,
                    other => IngestError::CatalogUnavailable(other.to_string()),
                })?;
            let page_len = page.len();

            for item in page {
                if cursor.is_some_and(|c| item.id <= c) {
                    return Err(IngestError::CatalogUnavailable(format!(
                        "catalog returned id {} out of order after {:?}",
                        item.id, cursor
                    )));
                }
                cursor = Some(item.id);
                scanned += 1;

                if coverage.contains(item.id) {
                    continue;
                }
                backlog.push(item);

                if limit.is_some_and(|l| backlog.len() >= l) {
                    break 'pages;
                }
            }

            debug!(page_len, scanned, backlog = backlog.len(), "Catalog page scanned");
            if page_len < self.page_size {
                break;
            }
        }

        info!(
            category = ?category,
            resume_from = ?resume_from,
            scanned,
            backlog = backlog.len(),
            "Backlog enumerated"
        );
        Ok(backlog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn catalog(n: i64) -> MemoryStore {
        MemoryStore::with_work_items((1..=n).map(|id| {
            let category = if id % 2 == 0 { Category::Nba } else { Category::Nhl };
            WorkItem::new(id, format!("evt-{}", id), category)
        }))
    }

    #[tokio::test]
    async fn test_enumerate_all_pages() {
        let store = catalog(25);
        let enumerator = WorkEnumerator::new(&store, 7);
        let backlog = enumerator
            .enumerate(None, None, &CoverageIndex::default(), None)
            .await
            .unwrap();

        assert_eq!(backlog.len(), 25);
        assert!(backlog.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[tokio::test]
    async fn test_enumerate_skips_covered_and_resumes() {
        let store = catalog(20);
        let enumerator = WorkEnumerator::new(&store, 4);
        let coverage = CoverageIndex::from_ids([12, 14]);

        let backlog = enumerator
            .enumerate(Some(Category::Nba), Some(10), &coverage, None)
            .await
            .unwrap();

        let ids: Vec<i64> = backlog.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![16, 18, 20]);
    }

    #[tokio::test]
    async fn test_enumerate_respects_limit() {
        let store = catalog(100);
        let enumerator = WorkEnumerator::new(&store, 10);
        let backlog = enumerator
            .enumerate(None, None, &CoverageIndex::default(), Some(15))
            .await
            .unwrap();

        assert_eq!(backlog.len(), 15);
        assert_eq!(backlog.last().map(|i| i.id), Some(15));
    }

    #[tokio::test]
    async fn test_same_parameters_same_backlog() {
        let store = catalog(30);
        let enumerator = WorkEnumerator::new(&store, 8);
        let coverage = CoverageIndex::from_ids([3, 9]);

        let first = enumerator.enumerate(None, Some(2), &coverage, None).await.unwrap();
        let second = enumerator.enumerate(None, Some(2), &coverage, None).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_catalog_unavailable_is_fatal() {
        let store = catalog(5);
        store.set_catalog_unavailable(true);
        let enumerator = WorkEnumerator::new(&store, 10);

        let err = enumerator
            .enumerate(None, None, &CoverageIndex::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::CatalogUnavailable(_)));
    }
}
