//! Buffered, idempotent bulk writes
//!
//! Outcomes from the fetch pool are buffered as records plus one progress
//! marker per work item. A flush de-duplicates the records by
//! `(subject_id, work_item_id)`, upserts them in one store call, and hands
//! the markers back so the coordinator can advance the checkpoint.

use statline_common::types::CanonicalStatRecord;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error};

use super::backoff::{retry_with_backoff, BackoffPolicy, Exhausted};
use super::types::{ItemOutcome, ItemResult};
use crate::config::RunConfig;
use crate::error::{IngestError, Result};
use crate::store::StatStore;

/// How a buffered work item ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerKind {
    Persisted,
    NotFound,
    Skipped,
    Failed,
}

impl MarkerKind {
    /// Counts toward the contiguous checkpoint floor
    pub fn is_settled(self) -> bool {
        !matches!(self, MarkerKind::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressMarker {
    pub work_id: i64,
    pub kind: MarkerKind,
}

/// What a successful flush made durable
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushReport {
    pub records_written: u64,
    /// Highest work item id among the flushed markers
    pub highest_work_id: Option<i64>,
    pub markers: Vec<ProgressMarker>,
}

impl FlushReport {
    pub fn persisted_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.markers
            .iter()
            .filter(|m| m.kind == MarkerKind::Persisted)
            .map(|m| m.work_id)
    }

    pub fn count(&self, kind: MarkerKind) -> u64 {
        self.markers.iter().filter(|m| m.kind == kind).count() as u64
    }
}

pub struct BufferedBulkWriter {
    store: Arc<dyn StatStore>,
    batch_size: usize,
    flush_interval: Duration,
    max_retries: u32,
    backoff: BackoffPolicy,
    records: Vec<CanonicalStatRecord>,
    markers: Vec<ProgressMarker>,
    last_flush: Instant,
}

impl BufferedBulkWriter {
    pub fn new(store: Arc<dyn StatStore>, config: &RunConfig) -> Self {
        Self {
            store,
            batch_size: config.batch_size.max(1),
            flush_interval: config.flush_interval,
            max_retries: config.max_retries,
            backoff: config.backoff,
            records: Vec::new(),
            markers: Vec::new(),
            last_flush: Instant::now(),
        }
    }

    /// Buffer one work item outcome
    pub fn add(&mut self, outcome: ItemOutcome) {
        let kind = match outcome.result {
            ItemResult::Records(records) => {
                self.records.extend(records);
                MarkerKind::Persisted
            },
            ItemResult::NotFound => MarkerKind::NotFound,
            ItemResult::Skipped(_) => MarkerKind::Skipped,
            ItemResult::Failed(_) => MarkerKind::Failed,
        };
        self.markers.push(ProgressMarker {
            work_id: outcome.work_id,
            kind,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.markers.is_empty()
    }

    pub fn buffered_records(&self) -> usize {
        self.records.len()
    }

    pub fn buffered_items(&self) -> usize {
        self.markers.len()
    }

    /// Size or time threshold reached; never true for an empty buffer
    pub fn should_flush(&self) -> bool {
        !self.is_empty()
            && (self.records.len() >= self.batch_size
                || self.last_flush.elapsed() >= self.flush_interval)
    }

    /// When the time threshold fires
    pub fn flush_deadline(&self) -> Instant {
        self.last_flush + self.flush_interval
    }

    /// Upsert everything buffered.
    ///
    /// On success the buffer is cleared. When retries run out the buffer is
    /// left as it was and [`IngestError::FlushFailed`] is returned.
    pub async fn flush(&mut self) -> Result<FlushReport> {
        if self.is_empty() {
            return Ok(FlushReport::default());
        }

        let records = dedup_latest(&self.records);
        let store = self.store.clone();

        let records_written = if records.is_empty() {
            0
        } else {
            retry_with_backoff(&self.backoff, self.max_retries, |_| true, |attempt| {
                let store = store.clone();
                let records = &records;
                async move {
                    debug!(attempt, records = records.len(), "Upserting batch");
                    store.upsert_records(records).await
                }
            })
            .await
            .map_err(|Exhausted { error, attempts }| {
                error!(attempts, error = %error, buffered = self.records.len(), "Flush failed");
                IngestError::FlushFailed {
                    attempts,
                    reason: error.to_string(),
                }
            })?
        };

        let markers = std::mem::take(&mut self.markers);
        self.records.clear();
        self.last_flush = Instant::now();

        Ok(FlushReport {
            records_written,
            highest_work_id: markers.iter().map(|m| m.work_id).max(),
            markers,
        })
    }
}

/// One record per key, the last buffered one winning, in first-seen order
fn dedup_latest(records: &[CanonicalStatRecord]) -> Vec<CanonicalStatRecord> {
    let mut index: HashMap<(&str, i64), usize> = HashMap::with_capacity(records.len());
    let mut unique: Vec<CanonicalStatRecord> = Vec::with_capacity(records.len());

    for record in records {
        match index.get(&record.key()) {
            Some(&slot) => unique[slot] = record.clone(),
            None => {
                index.insert(record.key(), unique.len());
                unique.push(record.clone());
            },
        }
    }
    unique
}
