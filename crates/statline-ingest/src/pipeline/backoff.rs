//! Exponential backoff shared by the fetch and flush paths

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BACKOFF_BASE_MS: u64 = 500;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;

/// Delay schedule `base * 2^(attempt - 1)`, capped at `max`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            max: Duration::from_millis(DEFAULT_BACKOFF_MAX_MS),
        }
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay to wait after the given failed attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base.checked_mul(factor).unwrap_or(self.max).min(self.max)
    }
}

/// Final error of a retried operation
#[derive(Debug)]
pub struct Exhausted<E> {
    pub error: E,
    pub attempts: u32,
}

/// Run `operation` until it succeeds, `should_retry` rejects the error, or
/// `max_retries` retries are used up (`max_retries + 1` attempts in total).
///
/// The operation receives the 1-based attempt number.
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    policy: &BackoffPolicy,
    max_retries: u32,
    should_retry: R,
    mut operation: F,
) -> Result<T, Exhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: Display,
{
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if attempt > max_retries || !should_retry(&error) {
                    return Err(Exhausted {
                        error,
                        attempts: attempt,
                    });
                }

                let delay = policy.delay_for(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, error = %error, "Retrying after backoff");
                tokio::time::sleep(delay).await;
                attempt += 1;
            },
        }
    }
}
