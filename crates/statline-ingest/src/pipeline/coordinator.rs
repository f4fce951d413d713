//! Run orchestration
//!
//! A spawned fetch pool runs fetch and normalize for up to `concurrency`
//! items at a time and sends each outcome over a bounded channel. The
//! coordinator task is the only owner of the writer, the coverage index and
//! the checkpoint, so flushes and checkpoint saves are totally ordered.

use futures::stream::{self, StreamExt};
use statline_common::types::WorkItem;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::checkpoint::RunState;
use super::coverage::CoverageIndex;
use super::enumerator::WorkEnumerator;
use super::fetcher::RateLimitedFetcher;
use super::normalizer::{Normalized, RecordNormalizer};
use super::progress::{ProgressEvent, ProgressReporter};
use super::types::{FetchOutcome, ItemOutcome, ItemResult, RunSummary};
use super::writer::BufferedBulkWriter;
use crate::config::RunConfig;
use crate::error::{IngestError, Result};
use crate::provider::StatProvider;
use crate::store::{CheckpointStore, StatStore, WorkCatalog};

pub struct IngestCoordinator {
    catalog: Arc<dyn WorkCatalog>,
    stats: Arc<dyn StatStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    provider: Arc<dyn StatProvider>,
    reporter: Arc<ProgressReporter>,
}

impl IngestCoordinator {
    pub fn new(
        catalog: Arc<dyn WorkCatalog>,
        stats: Arc<dyn StatStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        provider: Arc<dyn StatProvider>,
    ) -> Self {
        Self {
            catalog,
            stats,
            checkpoints,
            provider,
            reporter: Arc::new(ProgressReporter::new()),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn reporter(&self) -> &Arc<ProgressReporter> {
        &self.reporter
    }

    /// Run to completion
    pub async fn run(&self, config: &RunConfig) -> Result<RunSummary> {
        self.run_with_cancel(config, CancellationToken::new()).await
    }

    /// Run until the backlog is drained or `cancel` fires.
    ///
    /// On cancellation no new fetches are issued, in-flight fetches finish,
    /// and a final flush plus checkpoint save happen before the summary is
    /// returned with `cancelled` set.
    pub async fn run_with_cancel(
        &self,
        config: &RunConfig,
        cancel: CancellationToken,
    ) -> Result<RunSummary> {
        config.validate()?;

        let run_id = Uuid::new_v4();
        let scope = config.scope();
        let span = info_span!("ingest_run", %run_id, scope = %scope);

        self.execute(config, cancel, run_id, scope).instrument(span).await
    }

    async fn execute(
        &self,
        config: &RunConfig,
        cancel: CancellationToken,
        run_id: Uuid,
        scope: String,
    ) -> Result<RunSummary> {
        let started = Instant::now();

        let checkpoint = self.checkpoints.load(&scope).await?;
        let resume_from = if config.resume {
            checkpoint.last_completed_work_id
        } else {
            None
        };
        info!(
            resume = config.resume,
            resume_from = ?resume_from,
            processed_so_far = checkpoint.processed_count,
            "Checkpoint loaded"
        );

        let mut coverage = CoverageIndex::load(self.stats.as_ref(), config.category).await?;
        let backlog = WorkEnumerator::new(self.catalog.as_ref(), config.page_size)
            .enumerate(config.category, resume_from, &coverage, config.limit)
            .await?;
        self.reporter.set_total(backlog.len() as u64);

        if backlog.is_empty() {
            info!("Backlog empty, nothing to ingest");
            let mut summary = RunSummary::empty(run_id, checkpoint);
            summary.cancelled = cancel.is_cancelled();
            summary.duration_secs = started.elapsed().as_secs_f64();
            return Ok(summary);
        }

        info!(
            backlog = backlog.len(),
            first_id = backlog.first().map(|i| i.id),
            last_id = backlog.last().map(|i| i.id),
            concurrency = config.concurrency,
            batch_size = config.batch_size,
            "Starting ingestion"
        );

        let mut state = RunState::new(scope, checkpoint, backlog.iter().map(|i| i.id).collect());
        let mut writer = BufferedBulkWriter::new(self.stats.clone(), config);

        let (tx, mut rx) = mpsc::channel(config.buffer_capacity.max(1));
        let stop = cancel.child_token();
        let producer = tokio::spawn(fetch_pool(
            backlog,
            RateLimitedFetcher::from_config(self.provider.clone(), config),
            RecordNormalizer::new(),
            self.reporter.clone(),
            config.concurrency,
            stop.clone(),
            tx,
        ));

        let drained = self
            .drive(&mut rx, &mut writer, &mut state, &mut coverage, &cancel)
            .await;
        let finished = match drained {
            Ok(()) => self.flush_and_checkpoint(&mut writer, &mut state, &mut coverage).await,
            Err(e) => Err(e),
        };

        if let Err(e) = finished {
            error!(error = %e, "Run aborted");
            stop.cancel();
            producer.abort();
            self.reporter.finish();
            return Err(e);
        }

        if let Err(e) = producer.await {
            error!(error = %e, "Fetch pool ended abnormally");
        }
        debug_assert!(state.is_clean());

        let counters = state.counters;
        let summary = RunSummary {
            run_id,
            processed: counters.processed,
            succeeded: counters.succeeded,
            failed: counters.failed,
            skipped: counters.skipped,
            not_found: counters.not_found,
            flushes: counters.flushes,
            records_written: counters.records_written,
            cancelled: cancel.is_cancelled(),
            final_checkpoint: state.checkpoint.clone(),
            duration_secs: started.elapsed().as_secs_f64(),
        };

        self.reporter.finish();
        if counters.failed > 0 {
            warn!(
                failed = counters.failed,
                blocked_at = ?state.floor.blocked_at(),
                "Some work items failed and will be retried on the next run"
            );
        }
        info!(
            status = %self.reporter.render(),
            checkpoint = ?summary.final_checkpoint.last_completed_work_id,
            cancelled = summary.cancelled,
            "Run finished"
        );

        Ok(summary)
    }

    /// Consume outcomes until the fetch pool hangs up, flushing when due
    async fn drive(
        &self,
        rx: &mut mpsc::Receiver<ItemOutcome>,
        writer: &mut BufferedBulkWriter,
        state: &mut RunState,
        coverage: &mut CoverageIndex,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut cancel_seen = false;

        loop {
            let deadline = writer.flush_deadline();
            tokio::select! {
                received = rx.recv() => {
                    let Some(outcome) = received else { break };
                    writer.add(outcome);
                    state.mark_dirty();
                    if writer.should_flush() {
                        self.flush_and_checkpoint(writer, state, coverage).await?;
                    }
                },
                _ = tokio::time::sleep_until(deadline), if !writer.is_empty() => {
                    if writer.should_flush() {
                        debug!(buffered = writer.buffered_items(), "Flush interval elapsed");
                        self.flush_and_checkpoint(writer, state, coverage).await?;
                    }
                },
                _ = cancel.cancelled(), if !cancel_seen => {
                    cancel_seen = true;
                    info!("Cancellation requested, draining in-flight fetches");
                },
            }
        }
        Ok(())
    }

    /// Flush the writer, then persist the advanced checkpoint.
    ///
    /// A failed flush leaves the checkpoint untouched. A failed save is fatal.
    async fn flush_and_checkpoint(
        &self,
        writer: &mut BufferedBulkWriter,
        state: &mut RunState,
        coverage: &mut CoverageIndex,
    ) -> Result<()> {
        if writer.is_empty() {
            return Ok(());
        }

        let report = writer.flush().await?;
        coverage.mark_covered(report.persisted_ids());
        let checkpoint = state.apply_flush(&report);

        if let Err(e) = self.checkpoints.save(&state.scope, &checkpoint).await {
            error!(scope = %state.scope, error = %e, "Checkpoint save failed");
            return Err(match e {
                IngestError::CheckpointSaveFailed { .. } => e,
                other => IngestError::CheckpointSaveFailed {
                    scope: state.scope.clone(),
                    reason: other.to_string(),
                },
            });
        }
        state.mark_saved();

        self.reporter.observe(&ProgressEvent::FlushCompleted {
            records: report.records_written,
        });
        info!(
            flush = state.counters.flushes,
            items = report.markers.len(),
            records = report.records_written,
            highest = ?report.highest_work_id,
            checkpoint = ?checkpoint.last_completed_work_id,
            "Flush committed"
        );
        Ok(())
    }
}

/// Fetch and normalize every backlog item, at most `concurrency` at a time
async fn fetch_pool(
    backlog: Vec<WorkItem>,
    fetcher: RateLimitedFetcher,
    normalizer: RecordNormalizer,
    reporter: Arc<ProgressReporter>,
    concurrency: usize,
    stop: CancellationToken,
    tx: mpsc::Sender<ItemOutcome>,
) {
    let outcomes = stream::iter(backlog)
        .take_until(async move { stop.cancelled().await })
        .map(move |item| {
            let fetcher = fetcher.clone();
            let reporter = reporter.clone();
            async move { process_item(&fetcher, normalizer, &reporter, item).await }
        })
        .buffer_unordered(concurrency.max(1));
    let mut outcomes = std::pin::pin!(outcomes);

    while let Some(outcome) = outcomes.next().await {
        if tx.send(outcome).await.is_err() {
            debug!("Coordinator gone, stopping fetch pool");
            break;
        }
    }
}

async fn process_item(
    fetcher: &RateLimitedFetcher,
    normalizer: RecordNormalizer,
    reporter: &ProgressReporter,
    item: WorkItem,
) -> ItemOutcome {
    let result = match fetcher.fetch(&item).await {
        Ok(FetchOutcome::Fetched(payload)) => {
            reporter.observe(&ProgressEvent::FetchSucceeded);
            match normalizer.normalize(&item, &payload) {
                Normalized::Records(records) => ItemResult::Records(records),
                Normalized::Skipped(reason) => {
                    reporter.observe(&ProgressEvent::ParseSkipped);
                    ItemResult::Skipped(reason)
                },
            }
        },
        Ok(FetchOutcome::NotFound) => {
            reporter.observe(&ProgressEvent::NotFound);
            debug!(work_id = item.id, external_ref = %item.external_ref, "NotFound");
            ItemResult::NotFound
        },
        Err(e) => {
            reporter.observe(&ProgressEvent::FetchFailed);
            ItemResult::Failed(e.to_string())
        },
    };
    ItemOutcome::new(&item, result)
}
