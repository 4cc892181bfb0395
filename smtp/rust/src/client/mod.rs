//! High-level SMTP client.
//!
//! Holds a pool of established sessions. `verify()` proves that a full
//! handshake succeeds within the verify timeout, and `send()` encodes a
//! message once and retries transient failures over pooled sessions.

use std::sync::Arc;

use tokio::time::timeout;

use crate::config::SmtpConfig;
use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};
use crate::mime::MimeEncoder;
use crate::observability::{SmtpMetrics, Timer};
use crate::resilience::RetryExecutor;
use crate::session::{create_pool, pool_error, SessionPool, SmtpSession};
use crate::transport::{Connector, TcpConnector};
use crate::types::{Email, SendResult};

/// High-level SMTP client.
#[derive(Debug)]
pub struct SmtpClient {
    config: Arc<SmtpConfig>,
    connector: Arc<dyn Connector>,
    pool: SessionPool,
    retry: RetryExecutor,
    metrics: Arc<SmtpMetrics>,
}

impl SmtpClient {
    /// Creates a client connecting over TCP.
    pub fn new(config: SmtpConfig) -> SmtpResult<Self> {
        Self::with_connector(config, Arc::new(TcpConnector))
    }

    /// Creates a client using `connector` for new connections.
    pub fn with_connector(config: SmtpConfig, connector: Arc<dyn Connector>) -> SmtpResult<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let metrics = Arc::new(SmtpMetrics::new());
        let pool = create_pool(config.clone(), connector.clone(), metrics.clone())?;
        let retry = RetryExecutor::new(config.retry.clone()).with_metrics(metrics.clone());

        Ok(Self {
            config,
            connector,
            pool,
            retry,
            metrics,
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SmtpConfig {
        &self.config
    }

    /// Returns the metrics collector.
    pub fn metrics(&self) -> &SmtpMetrics {
        &self.metrics
    }

    /// Runs a complete handshake on a fresh connection, then quits.
    ///
    /// The handshake races the verify timeout; losing the race is a
    /// `VerifyTimeout` connectivity error.
    pub async fn verify(&self) -> SmtpResult<()> {
        let limit = self.config.verify_timeout;
        let outcome = timeout(
            limit,
            SmtpSession::establish(self.connector.as_ref(), &self.config, &self.metrics),
        )
        .await;

        let result = match outcome {
            Ok(Ok(session)) => {
                session.quit().await;
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SmtpError::timeout(
                SmtpErrorKind::VerifyTimeout,
                format!("No complete handshake with {} within {:?}", self.config.address(), limit),
            )),
        };

        self.metrics.record_verification(result.is_ok());

        #[cfg(feature = "tracing")]
        match &result {
            Ok(()) => tracing::info!(server = %self.config.address(), "SMTP connection verified"),
            Err(e) => tracing::warn!(
                server = %self.config.address(),
                error = %e,
                hint = e.hint().unwrap_or(""),
                "SMTP verification failed"
            ),
        }

        result
    }

    /// Sends `email`, retrying transient failures.
    pub async fn send(&self, email: Email) -> SmtpResult<SendResult> {
        let timer = Timer::start("smtp.send");
        let encoded = MimeEncoder::for_email(&email).encode(&email)?;

        let pool = &self.pool;
        let email = &email;
        let encoded = &encoded;
        let result = self
            .retry
            .execute(move || async move {
                let mut session = pool.get().await.map_err(pool_error)?;
                session.send(email, encoded).await
            })
            .await;

        let elapsed = timer.stop();
        match &result {
            Ok(receipt) => {
                self.metrics.record_send_success();
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    message_id = %receipt.message_id,
                    duration_ms = elapsed.as_millis() as u64,
                    "Message accepted"
                );
                #[cfg(not(feature = "tracing"))]
                let _ = (receipt, elapsed);
            }
            Err(_) => self.metrics.record_send_failure(),
        }

        result
    }

    /// Sends one message from the configured sender to `to`.
    pub async fn send_one(
        &self,
        to: &str,
        subject: &str,
        html: &str,
        text: Option<&str>,
    ) -> SmtpResult<SendResult> {
        let mut builder = Email::builder()
            .from_address(self.config.from.clone())
            .to(to)?
            .subject(subject)
            .html(html);
        if let Some(text) = text {
            builder = builder.text(text);
        }
        self.send(builder.build()?).await
    }

    /// Closes the pool; idle sessions are dropped.
    pub fn close(&self) {
        self.pool.close();
    }
}
