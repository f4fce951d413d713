//! Run progress counters and rendering
//!
//! Purely observational: the pipeline behaves the same with or without a
//! reporter attached.

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    FetchSucceeded,
    FetchFailed,
    NotFound,
    ParseSkipped,
    FlushCompleted { records: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    pub total: u64,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    pub not_found: u64,
    pub flushes: u64,
    pub records_written: u64,
    pub elapsed_secs: f64,
}

impl ProgressSnapshot {
    /// Work items per second since the reporter was created
    pub fn rate(&self) -> f64 {
        if self.elapsed_secs > 0.0 {
            self.processed as f64 / self.elapsed_secs
        } else {
            0.0
        }
    }
}

pub struct ProgressReporter {
    total: AtomicU64,
    fetched: AtomicU64,
    failed: AtomicU64,
    not_found: AtomicU64,
    skipped: AtomicU64,
    flushes: AtomicU64,
    records_written: AtomicU64,
    started: Instant,
    bar: Option<ProgressBar>,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            fetched: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            not_found: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
            records_written: AtomicU64::new(0),
            started: Instant::now(),
            bar: None,
        }
    }

    /// Reporter that also drives a terminal progress bar
    pub fn with_progress_bar() -> Self {
        let bar = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}")
        {
            bar.set_style(style.progress_chars("#>-"));
        }
        Self {
            bar: Some(bar),
            ..Self::new()
        }
    }

    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
        if let Some(ref bar) = self.bar {
            bar.set_length(total);
        }
    }

    pub fn observe(&self, event: &ProgressEvent) {
        let terminal = match *event {
            ProgressEvent::FetchSucceeded => {
                self.fetched.fetch_add(1, Ordering::Relaxed);
                true
            },
            ProgressEvent::FetchFailed => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                true
            },
            ProgressEvent::NotFound => {
                self.not_found.fetch_add(1, Ordering::Relaxed);
                true
            },
            ProgressEvent::ParseSkipped => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
                false
            },
            ProgressEvent::FlushCompleted { records } => {
                self.flushes.fetch_add(1, Ordering::Relaxed);
                self.records_written.fetch_add(records, Ordering::Relaxed);
                false
            },
        };

        if let Some(ref bar) = self.bar {
            if terminal {
                bar.inc(1);
            }
            bar.set_message(self.short_status());
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let fetched = self.fetched.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let not_found = self.not_found.load(Ordering::Relaxed);
        let skipped = self.skipped.load(Ordering::Relaxed);

        ProgressSnapshot {
            total: self.total.load(Ordering::Relaxed),
            processed: fetched + failed + not_found,
            succeeded: fetched.saturating_sub(skipped),
            failed,
            skipped,
            not_found,
            flushes: self.flushes.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
            elapsed_secs: self.started.elapsed().as_secs_f64(),
        }
    }

    fn short_status(&self) -> String {
        let s = self.snapshot();
        format!(
            "ok {} | failed {} | skipped {} | not found {}",
            s.succeeded, s.failed, s.skipped, s.not_found
        )
    }

    /// One-line human-readable status
    pub fn render(&self) -> String {
        let s = self.snapshot();
        format!(
            "processed {}/{} | ok {} | failed {} | skipped {} | not found {} | flushes {} | records {} | {:.1} items/s",
            s.processed,
            s.total,
            s.succeeded,
            s.failed,
            s.skipped,
            s.not_found,
            s.flushes,
            s.records_written,
            s.rate()
        )
    }

    pub fn finish(&self) {
        if let Some(ref bar) = self.bar {
            bar.finish_with_message(self.short_status());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let reporter = ProgressReporter::new();
        reporter.set_total(5);
        reporter.observe(&ProgressEvent::FetchSucceeded);
        reporter.observe(&ProgressEvent::FetchSucceeded);
        reporter.observe(&ProgressEvent::ParseSkipped);
        reporter.observe(&ProgressEvent::FetchFailed);
        reporter.observe(&ProgressEvent::NotFound);
        reporter.observe(&ProgressEvent::FlushCompleted { records: 12 });

        let s = reporter.snapshot();
        assert_eq!(s.total, 5);
        assert_eq!(s.processed, 4);
        assert_eq!(s.succeeded, 1);
        assert_eq!(s.skipped, 1);
        assert_eq!(s.failed, 1);
        assert_eq!(s.not_found, 1);
        assert_eq!(s.flushes, 1);
        assert_eq!(s.records_written, 12);
    }

    #[test]
    fn test_render() {
        let reporter = ProgressReporter::new();
        reporter.set_total(3);
        reporter.observe(&ProgressEvent::FetchSucceeded);

        let line = reporter.render();
        assert!(line.starts_with("processed 1/3 | ok 1 | failed 0"));
        assert!(line.ends_with("items/s"));
    }

    #[test]
    fn test_progress_bar_tracks_terminal_events() {
        let reporter = ProgressReporter::with_progress_bar();
        reporter.set_total(2);
        reporter.observe(&ProgressEvent::FetchSucceeded);
        reporter.observe(&ProgressEvent::ParseSkipped);

        let bar = reporter.bar.as_ref().unwrap();
        assert_eq!(bar.length(), Some(2));
        assert_eq!(bar.position(), 1);
        reporter.finish();
        assert!(bar.is_finished());
    }
}
