//! Ingestion pipeline
//!
//! Enumeration, fetching, normalization, buffered writes and checkpointing,
//! wired together by [`IngestCoordinator`].

pub mod backoff;
pub mod checkpoint;
pub mod coordinator;
pub mod coverage;
pub mod enumerator;
pub mod fetcher;
pub mod normalizer;
pub mod progress;
pub mod types;
pub mod writer;

pub use backoff::{retry_with_backoff, BackoffPolicy};
pub use checkpoint::{CheckpointFloor, RunState, RunStatus};
pub use coordinator::IngestCoordinator;
pub use coverage::CoverageIndex;
pub use enumerator::WorkEnumerator;
pub use fetcher::RateLimitedFetcher;
pub use normalizer::{Normalized, RecordNormalizer};
pub use progress::{ProgressEvent, ProgressReporter, ProgressSnapshot};
pub use types::{FetchOutcome, ItemOutcome, ItemResult, RunSummary};
pub use writer::{BufferedBulkWriter, FlushReport, MarkerKind};
