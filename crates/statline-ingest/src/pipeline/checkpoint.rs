//! Run state owned by the coordinator and checkpoint floor tracking

use chrono::Utc;
use statline_common::types::Checkpoint;
use std::collections::HashSet;

use super::writer::{FlushReport, MarkerKind};

/// Whether progress exists that the saved checkpoint does not reflect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Clean,
    Dirty,
}

/// Highest backlog id whose entire prefix is durably settled.
///
/// Items settle when a flush containing their marker commits. A `Failed`
/// item never settles, so the floor stops below it for the rest of the run.
#[derive(Debug, Clone)]
pub struct CheckpointFloor {
    backlog: Vec<i64>,
    next: usize,
    settled: HashSet<i64>,
    floor: Option<i64>,
}

impl CheckpointFloor {
    /// `backlog` must be in ascending order
    pub fn new(backlog: Vec<i64>) -> Self {
        Self {
            backlog,
            next: 0,
            settled: HashSet::new(),
            floor: None,
        }
    }

    pub fn settle(&mut self, report: &FlushReport) -> Option<i64> {
        self.settled.extend(
            report
                .markers
                .iter()
                .filter(|m| m.kind.is_settled())
                .map(|m| m.work_id),
        );

        while let Some(&id) = self.backlog.get(self.next) {
            if !self.settled.remove(&id) {
                break;
            }
            self.floor = Some(id);
            self.next += 1;
        }
        self.floor
    }

    pub fn floor(&self) -> Option<i64> {
        self.floor
    }

    /// Id blocking further advancement, if any
    pub fn blocked_at(&self) -> Option<i64> {
        self.backlog.get(self.next).copied()
    }
}

/// Counters for the current run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounters {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    pub not_found: u64,
    pub flushes: u64,
    pub records_written: u64,
}

/// Everything the coordinator mutates during a run
#[derive(Debug)]
pub struct RunState {
    pub scope: String,
    pub status: RunStatus,
    pub checkpoint: Checkpoint,
    pub floor: CheckpointFloor,
    pub counters: RunCounters,
}

impl RunState {
    pub fn new(scope: String, checkpoint: Checkpoint, backlog: Vec<i64>) -> Self {
        Self {
            scope,
            status: RunStatus::Clean,
            checkpoint,
            floor: CheckpointFloor::new(backlog),
            counters: RunCounters::default(),
        }
    }

    pub fn mark_dirty(&mut self) {
        self.status = RunStatus::Dirty;
    }

    pub fn is_clean(&self) -> bool {
        self.status == RunStatus::Clean
    }

    /// Fold a committed flush into the counters and the pending checkpoint.
    ///
    /// The returned checkpoint still has to be saved; call
    /// [`RunState::mark_saved`] once that succeeded.
    pub fn apply_flush(&mut self, report: &FlushReport) -> Checkpoint {
        let succeeded = report.count(MarkerKind::Persisted);
        let failed = report.count(MarkerKind::Failed);
        let skipped = report.count(MarkerKind::Skipped);
        let not_found = report.count(MarkerKind::NotFound);
        let processed = report.markers.len() as u64;

        self.counters.processed += processed;
        self.counters.succeeded += succeeded;
        self.counters.failed += failed;
        self.counters.skipped += skipped;
        self.counters.not_found += not_found;
        self.counters.flushes += 1;
        self.counters.records_written += report.records_written;

        let floor = self.floor.settle(report);
        let checkpoint = &mut self.checkpoint;
        checkpoint.advance_to(floor);
        checkpoint.processed_count += processed;
        checkpoint.success_count += succeeded;
        checkpoint.failure_count += failed;
        checkpoint.skipped_count += skipped;
        checkpoint.not_found_count += not_found;
        checkpoint.saved_at = Some(Utc::now());

        checkpoint.clone()
    }

    pub fn mark_saved(&mut self) {
        self.status = RunStatus::Clean;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::writer::ProgressMarker;

    fn report(markers: &[(i64, MarkerKind)]) -> FlushReport {
        FlushReport {
            records_written: markers
                .iter()
                .filter(|(_, k)| *k == MarkerKind::Persisted)
                .count() as u64,
            highest_work_id: markers.iter().map(|(id, _)| *id).max(),
            markers: markers
                .iter()
                .map(|&(work_id, kind)| ProgressMarker { work_id, kind })
                .collect(),
        }
    }

    #[test]
    fn test_floor_is_contiguous() {
        let mut floor = CheckpointFloor::new(vec![10, 20, 30, 40]);

        assert_eq!(floor.settle(&report(&[(20, MarkerKind::Persisted)])), None);
        assert_eq!(floor.blocked_at(), Some(10));

        assert_eq!(
            floor.settle(&report(&[(10, MarkerKind::NotFound), (40, MarkerKind::Skipped)])),
            Some(20)
        );
        assert_eq!(floor.settle(&report(&[(30, MarkerKind::Persisted)])), Some(40));
        assert_eq!(floor.blocked_at(), None);
    }

    #[test]
    fn test_failed_item_blocks_floor() {
        let mut floor = CheckpointFloor::new(vec![1, 2, 3]);
        floor.settle(&report(&[
            (1, MarkerKind::Persisted),
            (2, MarkerKind::Failed),
            (3, MarkerKind::Persisted),
        ]));
        assert_eq!(floor.floor(), Some(1));
        assert_eq!(floor.blocked_at(), Some(2));
    }

    #[test]
    fn test_apply_flush_accumulates_on_loaded_checkpoint() {
        let loaded = Checkpoint {
            last_completed_work_id: Some(5),
            processed_count: 5,
            success_count: 5,
            ..Checkpoint::default()
        };
        let mut state = RunState::new("nba".to_string(), loaded, vec![6, 7, 8]);
        state.mark_dirty();
        assert!(!state.is_clean());

        let checkpoint = state.apply_flush(&report(&[
            (6, MarkerKind::Persisted),
            (7, MarkerKind::NotFound),
        ]));
        state.mark_saved();

        assert!(state.is_clean());
        assert_eq!(checkpoint.last_completed_work_id, Some(7));
        assert_eq!(checkpoint.processed_count, 7);
        assert_eq!(checkpoint.success_count, 6);
        assert_eq!(checkpoint.not_found_count, 1);
        assert_eq!(state.counters.processed, 2);
        assert_eq!(state.counters.flushes, 1);
    }

    #[test]
    fn test_floor_below_loaded_cursor_does_not_regress() {
        let loaded = Checkpoint {
            last_completed_work_id: Some(50),
            ..Checkpoint::default()
        };
        // A run without resume may revisit ids below the saved cursor.
        let mut state = RunState::new("all".to_string(), loaded, vec![3, 4]);
        let checkpoint = state.apply_flush(&report(&[(3, MarkerKind::Persisted)]));
        assert_eq!(checkpoint.last_completed_work_id, Some(50));
    }
}
