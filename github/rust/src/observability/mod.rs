//! Request counters and log helpers for the API client.

use crate::resilience::RateLimitState;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Lock-free counters for API client activity.
#[derive(Debug, Default)]
pub struct ClientMetrics {
    requests_total: AtomicU64,
    requests_success: AtomicU64,
    requests_failed: AtomicU64,
    requests_retried: AtomicU64,
    rate_limit_waits: AtomicU64,
    latency_total_us: AtomicU64,
    latency_count: AtomicU64,
}

impl ClientMetrics {
    /// Creates a new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a request.
    pub fn record_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a successful request.
    pub fn record_success(&self) {
        self.requests_success.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed request.
    pub fn record_failure(&self) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a retried request.
    pub fn record_retry(&self) {
        self.requests_retried.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a wait for a rate-limit reset.
    pub fn record_rate_limit_wait(&self) {
        self.rate_limit_waits.fetch_add(1, Ordering::Relaxed);
    }

    /// Records request latency.
    pub fn record_latency(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.latency_total_us.fetch_add(us, Ordering::Relaxed);
        self.latency_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Gets a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let total = self.latency_total_us.load(Ordering::Relaxed);
        let count = self.latency_count.load(Ordering::Relaxed);
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_success: self.requests_success.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            requests_retried: self.requests_retried.load(Ordering::Relaxed),
            rate_limit_waits: self.rate_limit_waits.load(Ordering::Relaxed),
            average_latency_us: if count == 0 { 0 } else { total / count },
        }
    }
}

/// A snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Total requests, counting each retry attempt.
    pub requests_total: u64,
    /// Successful requests.
    pub requests_success: u64,
    /// Failed requests.
    pub requests_failed: u64,
    /// Retries scheduled by the executor.
    pub requests_retried: u64,
    /// Waits for a rate-limit reset, preemptive or after a 403/429.
    pub rate_limit_waits: u64,
    /// Average latency in microseconds.
    pub average_latency_us: u64,
}

/// Request timer for measuring latency.
pub struct RequestTimer {
    start: Instant,
    metrics: Arc<ClientMetrics>,
}

impl RequestTimer {
    /// Creates a new request timer.
    pub fn new(metrics: Arc<ClientMetrics>) -> Self {
        metrics.record_request();
        Self {
            start: Instant::now(),
            metrics,
        }
    }

    /// Records success and latency.
    pub fn success(self) {
        self.metrics.record_success();
        self.metrics.record_latency(self.start.elapsed());
    }

    /// Records failure and latency.
    pub fn failure(self) {
        self.metrics.record_failure();
        self.metrics.record_latency(self.start.elapsed());
    }
}

/// Logs a fresh rate-limit observation.
pub fn log_rate_limit(path: &str, state: &RateLimitState, low_watermark: u32) {
    if state.remaining < low_watermark {
        warn!(
            path = %path,
            remaining = state.remaining,
            reset_at_ms = state.reset_at_epoch_millis,
            "Rate limit budget running low"
        );
    } else {
        debug!(
            path = %path,
            remaining = state.remaining,
            "Rate limit updated"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics() {
        let metrics = ClientMetrics::new();

        metrics.record_request();
        metrics.record_success();
        metrics.record_latency(Duration::from_millis(100));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests_total, 1);
        assert_eq!(snapshot.requests_success, 1);
        assert_eq!(snapshot.requests_failed, 0);
        assert!(snapshot.average_latency_us >= 100_000);
    }

    #[test]
    fn test_timer_records_failure() {
        let metrics = Arc::new(ClientMetrics::new());

        RequestTimer::new(metrics.clone()).failure();
        metrics.record_retry();
        metrics.record_rate_limit_wait();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests_total, 1);
        assert_eq!(snapshot.requests_failed, 1);
        assert_eq!(snapshot.requests_retried, 1);
        assert_eq!(snapshot.rate_limit_waits, 1);
    }
}
