//! Bounded retry for transient SMTP failures.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::config::RetryConfig;
use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};
use crate::observability::SmtpMetrics;

/// Retry executor with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
    metrics: Option<Arc<SmtpMetrics>>,
}

impl RetryExecutor {
    /// Creates a new retry executor.
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            metrics: None,
        }
    }

    /// Counts retries in `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<SmtpMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Runs `operation`, retrying 421/45x replies and socket timeouts.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> SmtpResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SmtpResult<T>>,
    {
        if !self.config.enabled {
            return operation().await;
        }

        let mut attempt = 0;
        let mut last_error: Option<SmtpError> = None;

        while attempt < self.config.max_attempts {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if !e.is_retryable() || attempt + 1 >= self.config.max_attempts {
                        return Err(e);
                    }

                    attempt += 1;
                    let delay = self.calculate_delay(attempt);

                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        attempt = attempt,
                        max_attempts = self.config.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying SMTP operation after transient failure"
                    );

                    if let Some(metrics) = &self.metrics {
                        metrics.record_retry();
                    }
                    last_error = Some(e);
                    sleep(delay).await;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| SmtpError::new(SmtpErrorKind::Unknown, "Retry exhausted")))
    }

    /// Delay before retry number `attempt` (1-based).
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_delay = self.config.initial_delay.as_millis() as f64
            * self.config.multiplier.powi(attempt as i32 - 1);
        let delay_ms = base_delay.min(self.config.max_delay.as_millis() as f64);

        let final_delay = if self.config.jitter {
            delay_ms + rand::random::<f64>() * 0.3 * delay_ms
        } else {
            delay_ms
        };

        Duration::from_millis(final_delay as u64)
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_secs(1),
            jitter: false,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_reply_then_succeeds() {
        let metrics = Arc::new(SmtpMetrics::new());
        let executor = RetryExecutor::new(config(3)).with_metrics(metrics.clone());
        let calls = &AtomicU32::new(0);

        let start = tokio::time::Instant::now();
        let result = executor
            .execute(move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(SmtpError::from_smtp_response(451, "try later"))
                } else {
                    Ok("queued")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "queued");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s then 2s of backoff.
        assert_eq!(start.elapsed(), Duration::from_secs(3));
        assert_eq!(metrics.snapshot().retries, 2);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let executor = RetryExecutor::new(config(3));
        let calls = &AtomicU32::new(0);

        let result: SmtpResult<()> = executor
            .execute(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(SmtpError::from_smtp_response(550, "no such user"))
            })
            .await;

        assert_eq!(result.unwrap_err().smtp_code(), Some(550));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delay_is_capped() {
        let executor = RetryExecutor::new(config(10));
        assert_eq!(executor.calculate_delay(1), Duration::from_secs(1));
        assert_eq!(executor.calculate_delay(3), Duration::from_secs(4));
        assert_eq!(executor.calculate_delay(8), Duration::from_secs(10));
    }
}
