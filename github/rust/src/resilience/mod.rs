//! Rate-limit bookkeeping and retry with backoff.
//!
//! [`RateLimitState`] is a plain value: callers pass it into each request and
//! receive the updated state back, so no hidden counters are shared between
//! requests or clients.

use crate::config::{RateLimitConfig, RetryConfig};
use crate::errors::{GitHubError, GitHubResult, RateLimitInfo};
use crate::observability::ClientMetrics;
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use reqwest::header::HeaderMap;
use std::sync::Arc;
use std::time::Duration;

/// Remaining budget and reset time as last reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitState {
    /// Requests left in the current window.
    pub remaining: u32,
    /// Window reset as epoch milliseconds, `None` until a response reports one.
    pub reset_at_epoch_millis: Option<i64>,
}

impl Default for RateLimitState {
    fn default() -> Self {
        Self::optimistic(crate::config::DEFAULT_OPTIMISTIC_REMAINING)
    }
}

impl RateLimitState {
    /// State used before the first response has been seen.
    pub fn optimistic(remaining: u32) -> Self {
        Self {
            remaining,
            reset_at_epoch_millis: None,
        }
    }

    /// Builds the state from parsed rate-limit headers.
    pub fn from_info(info: &RateLimitInfo) -> Self {
        Self {
            remaining: info.remaining,
            reset_at_epoch_millis: info.reset_at.map(|r| r.timestamp_millis()),
        }
    }

    /// Reads `x-ratelimit-remaining` and `x-ratelimit-reset` from a response.
    ///
    /// Returns `None` when the server did not send a remaining count.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let remaining = header_value::<u32>(headers, "x-ratelimit-remaining")?;
        let reset_at_epoch_millis =
            header_value::<i64>(headers, "x-ratelimit-reset").and_then(|secs| secs.checked_mul(1000));
        Some(Self {
            remaining,
            reset_at_epoch_millis,
        })
    }

    /// Returns true if the reset time is present and strictly in the future.
    pub fn has_valid_reset(&self, now_millis: i64) -> bool {
        matches!(self.reset_at_epoch_millis, Some(reset) if reset > now_millis)
    }

    /// How long to block before the next request, if at all.
    ///
    /// A wait is only required when the budget is at or below the threshold
    /// and the reset is both in the future and closer than the maximum wait.
    pub fn required_wait(&self, now_millis: i64, config: &RateLimitConfig) -> Option<Duration> {
        if !config.enabled || self.remaining > config.wait_threshold {
            return None;
        }
        let reset = self.reset_at_epoch_millis?;
        let until_reset = reset - now_millis;
        if until_reset <= 0 || until_reset as u128 >= config.max_wait.as_millis() {
            return None;
        }
        Some(Duration::from_millis(until_reset as u64) + config.reset_buffer)
    }

    /// State assumed after waiting out a reset. Corrected by the next response.
    pub fn after_wait(&self, config: &RateLimitConfig) -> Self {
        Self::optimistic(config.optimistic_remaining)
    }

    /// Returns true if the budget is below the low watermark.
    pub fn is_low(&self, config: &RateLimitConfig) -> bool {
        self.remaining < config.low_watermark
    }

    /// Picks the more recent of two observations.
    ///
    /// A later reset wins. With equal resets the lower remaining count wins,
    /// since budgets only shrink within a window.
    pub fn freshest(a: Self, b: Self) -> Self {
        match (a.reset_at_epoch_millis, b.reset_at_epoch_millis) {
            (Some(ra), Some(rb)) if ra != rb => {
                if ra > rb {
                    a
                } else {
                    b
                }
            }
            (Some(_), None) => a,
            (None, Some(_)) => b,
            _ => {
                if a.remaining <= b.remaining {
                    a
                } else {
                    b
                }
            }
        }
    }
}

fn header_value<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Suspends the current task. Injectable so tests can observe waits.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Sleeps for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] backed by `tokio::time::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Retry executor with exponential backoff and rate-limit waits.
pub struct RetryExecutor {
    retry: RetryConfig,
    rate_limit: RateLimitConfig,
    sleeper: Arc<dyn Sleeper>,
    metrics: Option<Arc<ClientMetrics>>,
}

impl RetryExecutor {
    /// Creates a new retry executor.
    pub fn new(retry: RetryConfig, rate_limit: RateLimitConfig, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            retry,
            rate_limit,
            sleeper,
            metrics: None,
        }
    }

    /// Attaches a metrics sink.
    pub fn with_metrics(mut self, metrics: Arc<ClientMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Executes an operation with retry logic.
    ///
    /// Transient network errors back off exponentially. Rate-limit errors wait
    /// until the reported reset when it is under the maximum wait. Every other
    /// error is returned on the first occurrence.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> GitHubResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = GitHubResult<T>>,
    {
        let max_attempts = if self.retry.enabled {
            self.retry.max_attempts.max(1)
        } else {
            1
        };
        let mut attempt = 0;

        loop {
            attempt += 1;
            let e = match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => e,
            };

            if attempt >= max_attempts {
                return Err(e);
            }

            let delay = if e.is_rate_limit() {
                match self.rate_limit_wait(&e) {
                    Some(delay) => {
                        tracing::warn!(
                            attempt = attempt,
                            wait_ms = delay.as_millis() as u64,
                            "Rate limit exceeded, waiting for reset"
                        );
                        if let Some(ref m) = self.metrics {
                            m.record_rate_limit_wait();
                        }
                        delay
                    }
                    None => return Err(e),
                }
            } else if e.is_retryable() {
                let delay = self.calculate_backoff(attempt);
                tracing::debug!(
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying after error"
                );
                delay
            } else {
                return Err(e);
            };

            if let Some(ref m) = self.metrics {
                m.record_retry();
            }
            self.sleeper.sleep(delay).await;
        }
    }

    /// Wait derived from a rate-limit error, `None` if it should be fatal.
    fn rate_limit_wait(&self, error: &GitHubError) -> Option<Duration> {
        let info = error.rate_limit()?;

        let wait = match (info.retry_after, info.reset_at) {
            (Some(secs), _) => Duration::from_secs(secs),
            (None, Some(reset_at)) => {
                let until = reset_at.timestamp_millis() - now_millis();
                if until <= 0 {
                    return None;
                }
                Duration::from_millis(until as u64) + self.rate_limit.reset_buffer
            }
            (None, None) => return None,
        };

        if wait >= self.rate_limit.max_wait {
            tracing::error!(
                wait_secs = wait.as_secs(),
                "Rate limit reset too far away, giving up"
            );
            return None;
        }
        Some(wait)
    }

    /// Calculates backoff duration for an attempt.
    fn calculate_backoff(&self, attempt: u32) -> Duration {
        let base = self.retry.initial_backoff.as_millis() as f64
            * self.retry.multiplier.powi(attempt.saturating_sub(1) as i32);
        let capped = base.min(self.retry.max_backoff.as_millis() as f64);

        let jitter_range = capped * self.retry.jitter;
        let jitter_value = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };
        let final_delay = (capped + jitter_value).max(0.0);

        Duration::from_millis(final_delay as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::GitHubErrorKind;
    use crate::mocks::RecordingSleeper;
    use chrono::{DateTime, Duration as ChronoDuration};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};

    const NOW: i64 = 1_700_000_000_000;

    fn executor(sleeper: Arc<RecordingSleeper>) -> RetryExecutor {
        RetryExecutor::new(RetryConfig::default(), RateLimitConfig::default(), sleeper)
    }

    #[test]
    fn test_retry_backoff_calculation() {
        let executor = executor(Arc::new(RecordingSleeper::new()));

        assert_eq!(executor.calculate_backoff(1), Duration::from_secs(2));
        assert_eq!(executor.calculate_backoff(2), Duration::from_secs(4));
        assert_eq!(executor.calculate_backoff(3), Duration::from_secs(8));
        assert_eq!(executor.calculate_backoff(4), Duration::from_secs(10));
    }

    #[test]
    fn test_waits_until_reset_plus_buffer() {
        let state = RateLimitState {
            remaining: 5,
            reset_at_epoch_millis: Some(NOW + 10_000),
        };
        let wait = state.required_wait(NOW, &RateLimitConfig::default());
        assert_eq!(wait, Some(Duration::from_millis(11_000)));
    }

    #[test]
    fn test_no_wait_without_valid_reset() {
        let config = RateLimitConfig::default();
        let missing = RateLimitState {
            remaining: 0,
            reset_at_epoch_millis: None,
        };
        let stale = RateLimitState {
            remaining: 0,
            reset_at_epoch_millis: Some(NOW - 1),
        };
        let too_far = RateLimitState {
            remaining: 0,
            reset_at_epoch_millis: Some(NOW + 3_600_000),
        };
        assert_eq!(missing.required_wait(NOW, &config), None);
        assert_eq!(stale.required_wait(NOW, &config), None);
        assert_eq!(too_far.required_wait(NOW, &config), None);
    }

    #[test]
    fn test_low_budget_does_not_block() {
        let config = RateLimitConfig::default();
        let state = RateLimitState {
            remaining: 30,
            reset_at_epoch_millis: Some(NOW + 10_000),
        };
        assert!(state.is_low(&config));
        assert_eq!(state.required_wait(NOW, &config), None);
    }

    #[test]
    fn test_after_wait_is_optimistic() {
        let config = RateLimitConfig::default();
        let state = RateLimitState {
            remaining: 2,
            reset_at_epoch_millis: Some(NOW + 5_000),
        };
        assert_eq!(state.after_wait(&config), RateLimitState::optimistic(5000));
    }

    #[test]
    fn test_freshest_prefers_later_reset_then_lower_remaining() {
        let early = RateLimitState {
            remaining: 3,
            reset_at_epoch_millis: Some(NOW),
        };
        let late = RateLimitState {
            remaining: 4000,
            reset_at_epoch_millis: Some(NOW + 60_000),
        };
        assert_eq!(RateLimitState::freshest(early, late), late);

        let a = RateLimitState {
            remaining: 40,
            reset_at_epoch_millis: Some(NOW),
        };
        let b = RateLimitState {
            remaining: 39,
            reset_at_epoch_millis: Some(NOW),
        };
        assert_eq!(RateLimitState::freshest(a, b), b);
    }

    #[test]
    fn test_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", "42".parse().unwrap());
        headers.insert("x-ratelimit-reset", "1700000010".parse().unwrap());

        let state = RateLimitState::from_headers(&headers).unwrap();
        assert_eq!(state.remaining, 42);
        assert_eq!(state.reset_at_epoch_millis, Some(1_700_000_010_000));
        assert!(RateLimitState::from_headers(&HeaderMap::new()).is_none());
    }

    #[test]
    fn test_oversized_reset_header_means_no_reset() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", "3".parse().unwrap());
        headers.insert("x-ratelimit-reset", i64::MAX.to_string().parse().unwrap());

        let state = RateLimitState::from_headers(&headers).unwrap();
        assert_eq!(state.reset_at_epoch_millis, None);
        assert!(!state.has_valid_reset(NOW));
    }

    #[tokio::test]
    async fn test_transient_errors_back_off_then_give_up() {
        let sleeper = Arc::new(RecordingSleeper::new());
        let calls = AtomicU32::new(0);

        let result: GitHubResult<()> = executor(sleeper.clone())
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(GitHubError::new(GitHubErrorKind::ConnectionReset, "reset")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            sleeper.recorded(),
            vec![Duration::from_secs(2), Duration::from_secs(4)]
        );
    }

    #[tokio::test]
    async fn test_terminal_error_is_not_retried() {
        let sleeper = Arc::new(RecordingSleeper::new());
        let calls = AtomicU32::new(0);

        let result: GitHubResult<()> = executor(sleeper.clone())
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(GitHubError::new(GitHubErrorKind::InternalError, "boom")) }
            })
            .await;

        assert_eq!(result.unwrap_err().kind(), GitHubErrorKind::InternalError);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sleeper.recorded().is_empty());
    }

    #[tokio::test]
    async fn test_rate_limit_beyond_ceiling_is_fatal() {
        let sleeper = Arc::new(RecordingSleeper::new());
        let reset_at: DateTime<Utc> = Utc::now() + ChronoDuration::hours(2);

        let result: GitHubResult<()> = executor(sleeper.clone())
            .execute(|| async move {
                Err(GitHubError::rate_limit_exceeded(RateLimitInfo {
                    limit: 5000,
                    remaining: 0,
                    reset_at: Some(reset_at),
                    retry_after: None,
                    resource: None,
                }))
            })
            .await;

        assert!(result.unwrap_err().is_rate_limit());
        assert!(sleeper.recorded().is_empty());
    }

    #[tokio::test]
    async fn test_rate_limit_with_near_reset_waits_then_succeeds() {
        let sleeper = Arc::new(RecordingSleeper::new());
        let calls = AtomicU32::new(0);

        let result = executor(sleeper.clone())
            .execute(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(GitHubError::rate_limit_exceeded(RateLimitInfo {
                            limit: 60,
                            remaining: 0,
                            reset_at: None,
                            retry_after: Some(5),
                            resource: None,
                        }))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(sleeper.recorded(), vec![Duration::from_secs(5)]);
    }
}
