//! Concurrency-bounded provider access with timeout and retry

use statline_common::types::WorkItem;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::warn;

use super::backoff::{retry_with_backoff, BackoffPolicy, Exhausted};
use super::types::FetchOutcome;
use crate::config::RunConfig;
use crate::error::{IngestError, Result};
use crate::provider::{FetchError, ProviderResponse, StatProvider};

/// Wraps a [`StatProvider`] so that at most `concurrency` attempts are in
/// flight across every clone of the fetcher.
#[derive(Clone)]
pub struct RateLimitedFetcher {
    provider: Arc<dyn StatProvider>,
    permits: Arc<Semaphore>,
    timeout: Duration,
    max_retries: u32,
    backoff: BackoffPolicy,
}

impl RateLimitedFetcher {
    pub fn new(
        provider: Arc<dyn StatProvider>,
        concurrency: usize,
        timeout: Duration,
        max_retries: u32,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            provider,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            timeout,
            max_retries,
            backoff,
        }
    }

    pub fn from_config(provider: Arc<dyn StatProvider>, config: &RunConfig) -> Self {
        Self::new(
            provider,
            config.concurrency,
            config.fetch_timeout,
            config.max_retries,
            config.backoff,
        )
    }

    /// Permits not currently held by an attempt
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// One attempt: hold a permit for its whole duration, bounded by the timeout
    async fn attempt(&self, item: &WorkItem) -> std::result::Result<ProviderResponse, FetchError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| FetchError::Permanent("fetch pool closed".to_string()))?;

        match tokio::time::timeout(self.timeout, self.provider.fetch_boxscore(item)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout),
        }
    }

    /// Fetch one work item.
    ///
    /// Not-found is an outcome, not an error. Transient failures are retried
    /// up to `max_retries` times; the final failure becomes
    /// [`IngestError::FetchFailed`].
    pub async fn fetch(&self, item: &WorkItem) -> Result<FetchOutcome> {
        let result = retry_with_backoff(
            &self.backoff,
            self.max_retries,
            FetchError::is_transient,
            |_| self.attempt(item),
        )
        .await;

        match result {
            Ok(ProviderResponse::Found(payload)) => Ok(FetchOutcome::Fetched(payload)),
            Ok(ProviderResponse::NotFound) => Ok(FetchOutcome::NotFound),
            Err(Exhausted { error, attempts }) => {
                warn!(
                    work_id = item.id,
                    external_ref = %item.external_ref,
                    attempts,
                    error = %error,
                    "FetchFailed"
                );
                Err(IngestError::FetchFailed {
                    work_id: item.id,
                    attempts,
                    reason: error.to_string(),
                })
            },
        }
    }
}
