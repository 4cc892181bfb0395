//! Counters for SMTP sessions and sends.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// SMTP metrics collector.
#[derive(Debug, Default)]
pub struct SmtpMetrics {
    emails_sent: AtomicU64,
    emails_failed: AtomicU64,
    connection_attempts: AtomicU64,
    connections_failed: AtomicU64,
    auth_attempts: AtomicU64,
    auth_failed: AtomicU64,
    tls_upgrades: AtomicU64,
    verifications: AtomicU64,
    verifications_failed: AtomicU64,
    retries: AtomicU64,
}

impl SmtpMetrics {
    /// Creates a new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a successful send.
    pub fn record_send_success(&self) {
        self.emails_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed send.
    pub fn record_send_failure(&self) {
        self.emails_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a connection attempt.
    pub fn record_connection_attempt(&self, success: bool) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.connections_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records an authentication attempt.
    pub fn record_auth_attempt(&self, success: bool) {
        self.auth_attempts.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.auth_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records a STARTTLS upgrade.
    pub fn record_tls_upgrade(&self) {
        self.tls_upgrades.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a `verify()` outcome.
    pub fn record_verification(&self, success: bool) {
        self.verifications.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.verifications_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records a retry.
    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            emails_sent: self.emails_sent.load(Ordering::Relaxed),
            emails_failed: self.emails_failed.load(Ordering::Relaxed),
            connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
            connections_failed: self.connections_failed.load(Ordering::Relaxed),
            auth_attempts: self.auth_attempts.load(Ordering::Relaxed),
            auth_failed: self.auth_failed.load(Ordering::Relaxed),
            tls_upgrades: self.tls_upgrades.load(Ordering::Relaxed),
            verifications: self.verifications.load(Ordering::Relaxed),
            verifications_failed: self.verifications_failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Messages accepted by the server.
    pub emails_sent: u64,
    /// Messages that failed.
    pub emails_failed: u64,
    /// TCP connections opened.
    pub connection_attempts: u64,
    /// Connections or handshakes that failed.
    pub connections_failed: u64,
    /// AUTH exchanges started.
    pub auth_attempts: u64,
    /// AUTH exchanges rejected.
    pub auth_failed: u64,
    /// STARTTLS upgrades.
    pub tls_upgrades: u64,
    /// `verify()` calls.
    pub verifications: u64,
    /// `verify()` calls that failed or timed out.
    pub verifications_failed: u64,
    /// Retries of transient failures.
    pub retries: u64,
}

impl MetricsSnapshot {
    /// Fraction of sends that succeeded; 1.0 before any send.
    pub fn success_rate(&self) -> f64 {
        let total = self.emails_sent + self.emails_failed;
        if total == 0 {
            1.0
        } else {
            self.emails_sent as f64 / total as f64
        }
    }
}

/// Timer for measuring operation duration.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    name: &'static str,
}

impl Timer {
    /// Creates and starts a new timer.
    pub fn start(name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            name,
        }
    }

    /// Stops the timer and returns the duration.
    pub fn stop(self) -> Duration {
        let elapsed = self.start.elapsed();

        #[cfg(feature = "tracing")]
        tracing::debug!(timer = self.name, duration_ms = elapsed.as_millis() as u64, "Timer stopped");

        #[cfg(not(feature = "tracing"))]
        let _ = self.name;

        elapsed
    }
}
