//! Caller-side retry with exponential backoff.
//!
//! The pipeline never retries on its own; it reports whether a failure is
//! transient through [`PipelineError::is_retryable`]. This module retries
//! those failures, honouring a service's `Retry-After` hint when present.

use std::future::Future;
use std::time::Duration;

use docqa_rag::{PipelineError, RagError};
use tracing::warn;

/// How often and how patiently to retry transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3, base_delay: Duration::from_millis(500), max_delay: Duration::from_secs(30) }
    }
}

impl RetryPolicy {
    /// The delay before retry number `attempt + 1`, or `None` to give up.
    pub fn delay_for(&self, attempt: u32, error: &PipelineError) -> Option<Duration> {
        if attempt >= self.max_retries || !error.is_retryable() {
            return None;
        }
        if let RagError::RateLimited { retry_after: Some(hint), .. } = &error.source {
            return Some((*hint).min(self.max_delay));
        }
        let backoff = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));
        Some(backoff.min(self.max_delay))
    }
}

/// Run `operation` until it succeeds, fails permanently, or retries run out.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T, PipelineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
{
    let mut attempt = 0;
    loop {
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        let Some(delay) = policy.delay_for(attempt, &error) else {
            return Err(error);
        };
        attempt += 1;
        warn!(attempt, delay_ms = delay.as_millis() as u64, error = %error, "retrying after transient failure");
        tokio::time::sleep(delay).await;
    }
}
