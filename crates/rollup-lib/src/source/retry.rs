//! Deadline and retry wrapper for metric sources
//!
//! Each call gets its own deadline. Failed or timed-out calls are retried a
//! bounded number of times with exponential backoff.

use super::{MetricSource, ScalarResult, VectorResult};
use crate::error::SourceError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry and deadline settings for metric source calls
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Deadline for a single attempt
    pub call_timeout: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Backoff before the first retry
    pub initial_backoff: Duration,
    /// Upper bound for the backoff
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(10),
            max_retries: 2,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    /// Backoff before retry number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        std::cmp::min(self.initial_backoff.saturating_mul(factor), self.max_backoff)
    }
}

/// Wraps a metric source with per-call deadlines and bounded retries
pub struct RetryingSource<S> {
    inner: S,
    config: RetryConfig,
}

impl<S: MetricSource> RetryingSource<S> {
    pub fn new(inner: S, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    async fn call<T, F, Fut>(&self, query: &str, op: F) -> Result<T, SourceError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let mut attempt = 0u32;
        loop {
            let result = match tokio::time::timeout(self.config.call_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(SourceError::Timeout(self.config.call_timeout)),
            };

            match result {
                Ok(value) => return Ok(value),
                // A malformed query fails the same way every time
                Err(SourceError::Query(msg)) => return Err(SourceError::Query(msg)),
                Err(e) if attempt >= self.config.max_retries => {
                    warn!(query = %query, attempts = attempt + 1, error = %e, "Metric source call failed");
                    return Err(e);
                }
                Err(e) => {
                    attempt += 1;
                    let backoff = self.config.backoff(attempt);
                    debug!(
                        query = %query,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Retrying metric source call"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

#[async_trait]
impl<S: MetricSource> MetricSource for RetryingSource<S> {
    async fn query(&self, query: &str, at: DateTime<Utc>) -> Result<ScalarResult, SourceError> {
        self.call(query, || self.inner.query(query, at)).await
    }

    async fn query_range(
        &self,
        query: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        step: Duration,
    ) -> Result<VectorResult, SourceError> {
        self.call(query, || self.inner.query_range(query, from, to, step))
            .await
    }
}
