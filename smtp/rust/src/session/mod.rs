//! An established, authenticated SMTP session and the pool that holds them.
//!
//! Establishing a session reads the greeting, sends EHLO, upgrades with
//! STARTTLS when the mode requires it (refusal is an error, never a silent
//! downgrade), repeats EHLO and authenticates.

use async_trait::async_trait;
use deadpool::managed::{self, Metrics, Pool, PoolError, RecycleError, RecycleResult};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::timeout;

use crate::auth::{AuthMechanism, Credentials};
use crate::config::{SmtpConfig, TlsMode};
use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};
use crate::mime::{prepare_data_content, EncodedMessage};
use crate::observability::SmtpMetrics;
use crate::protocol::{codes, EsmtpCapabilities, SmtpCommand, SmtpResponse};
use crate::transport::{Connector, SmtpTransport};
use crate::types::{Email, SendResult};

/// A ready-to-send SMTP session.
pub struct SmtpSession {
    transport: Box<dyn SmtpTransport>,
    capabilities: EsmtpCapabilities,
    authenticated: bool,
    max_message_size: usize,
}

impl fmt::Debug for SmtpSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpSession")
            .field("transport", &self.transport)
            .field("authenticated", &self.authenticated)
            .finish()
    }
}

impl SmtpSession {
    /// Connects and runs the full handshake.
    pub async fn establish(
        connector: &dyn Connector,
        config: &SmtpConfig,
        metrics: &SmtpMetrics,
    ) -> SmtpResult<Self> {
        let transport = match connector.connect(config).await {
            Ok(t) => t,
            Err(e) => {
                metrics.record_connection_attempt(false);
                return Err(e);
            }
        };

        match Self::handshake(transport, config, metrics).await {
            Ok(session) => {
                metrics.record_connection_attempt(true);
                Ok(session)
            }
            Err(e) => {
                metrics.record_connection_attempt(false);
                Err(e)
            }
        }
    }

    async fn handshake(
        mut transport: Box<dyn SmtpTransport>,
        config: &SmtpConfig,
        metrics: &SmtpMetrics,
    ) -> SmtpResult<Self> {
        let greeting = timeout(config.greeting_timeout, transport.read_response())
            .await
            .map_err(|_| {
                SmtpError::timeout(
                    SmtpErrorKind::GreetingTimeout,
                    format!("No greeting from {} within {:?}", config.address(), config.greeting_timeout),
                )
            })??
            .expect_code(codes::SERVICE_READY)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(greeting = %greeting, "SMTP greeting received");
        #[cfg(not(feature = "tracing"))]
        let _ = greeting;

        let mut capabilities = ehlo(transport.as_mut(), config).await?;

        match config.tls_mode() {
            TlsMode::StartTlsRequired if !transport.is_tls() => {
                if !capabilities.starttls {
                    return Err(SmtpError::new(
                        SmtpErrorKind::StarttlsNotSupported,
                        format!("{} does not advertise STARTTLS", config.address()),
                    ));
                }
                let reply = transport.send_command(&SmtpCommand::StartTls).await?;
                if reply.code != codes::SERVICE_READY {
                    return Err(SmtpError::new(
                        SmtpErrorKind::StarttlsNotSupported,
                        format!("STARTTLS refused: {}", reply),
                    )
                    .with_smtp_code(reply.code));
                }
                transport.upgrade_tls(&config.tls, config.server_name()).await?;
                metrics.record_tls_upgrade();
                capabilities = ehlo(transport.as_mut(), config).await?;
            }
            TlsMode::Implicit if !transport.is_tls() => {
                return Err(SmtpError::tls("Implicit TLS connection is not encrypted"));
            }
            _ => {}
        }

        let mut session = Self {
            transport,
            capabilities,
            authenticated: false,
            max_message_size: config.max_message_size,
        };

        if let Some(credentials) = config.credentials() {
            let result = session.authenticate(&credentials).await;
            metrics.record_auth_attempt(result.is_ok());
            result?;
        }

        Ok(session)
    }

    async fn authenticate(&mut self, credentials: &Credentials) -> SmtpResult<()> {
        let mechanism = self.capabilities.best_auth_mechanism().ok_or_else(|| {
            SmtpError::new(
                SmtpErrorKind::AuthMethodNotSupported,
                "Server offers neither AUTH PLAIN nor AUTH LOGIN",
            )
        })?;

        #[cfg(feature = "tracing")]
        tracing::debug!(mechanism = %mechanism, username = credentials.username(), "Authenticating");

        let reply = match mechanism {
            AuthMechanism::Plain => {
                self.transport
                    .send_command(&SmtpCommand::Auth {
                        mechanism: mechanism.mechanism_name().to_string(),
                        initial_response: Some(credentials.plain_initial_response()),
                    })
                    .await?
            }
            AuthMechanism::Login => {
                let mut reply = self
                    .transport
                    .send_command(&SmtpCommand::Auth {
                        mechanism: mechanism.mechanism_name().to_string(),
                        initial_response: None,
                    })
                    .await?;
                let mut step = 0;
                while reply.code == codes::AUTH_CONTINUE {
                    let answer = credentials.login_answer(reply.first_message(), step)?;
                    reply = self
                        .transport
                        .send_command(&SmtpCommand::AuthResponse(answer))
                        .await?;
                    step += 1;
                }
                reply
            }
        };

        if reply.code != codes::AUTH_SUCCESS {
            let err = reply.to_error();
            // Any non-235 here means the credentials were not accepted.
            return Err(if err.is_authentication() {
                err
            } else {
                SmtpError::authentication(format!("Authentication rejected: {}", reply))
                    .with_smtp_code(reply.code)
            });
        }

        self.authenticated = true;
        Ok(())
    }

    /// Server capabilities from the last EHLO.
    pub fn capabilities(&self) -> &EsmtpCapabilities {
        &self.capabilities
    }

    /// Returns true if the channel is encrypted.
    pub fn is_tls(&self) -> bool {
        self.transport.is_tls()
    }

    /// Returns true after a successful AUTH.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Runs one MAIL/RCPT/DATA transaction.
    pub async fn send(&mut self, email: &Email, message: &EncodedMessage) -> SmtpResult<SendResult> {
        let started = Instant::now();
        let size = message.bytes.len();
        let limit = self.capabilities.size.unwrap_or(self.max_message_size).min(self.max_message_size);
        if size > limit {
            return Err(SmtpError::message_error(
                SmtpErrorKind::MessageTooLarge,
                format!("Message is {} bytes, limit is {}", size, limit),
            ));
        }

        match self.transaction(email, message).await {
            Ok(response) => {
                let accepted = email.to.iter().map(|a| a.email().to_string()).collect();
                Ok(SendResult {
                    message_id: message.message_id.clone(),
                    accepted,
                    response: response.full_message(),
                    duration: started.elapsed(),
                })
            }
            Err(e) => {
                // Reply-level failures leave the session usable once reset.
                if e.smtp_code().is_some() {
                    let _ = self.transport.send_command(&SmtpCommand::Rset).await;
                }
                Err(e)
            }
        }
    }

    async fn transaction(&mut self, email: &Email, message: &EncodedMessage) -> SmtpResult<SmtpResponse> {
        let size = self.capabilities.size.map(|_| message.bytes.len());
        self.transport
            .send_command(&SmtpCommand::MailFrom {
                address: email.from.email().to_string(),
                size,
            })
            .await?
            .expect_code(codes::OK)
            .map_err(|e| {
                if e.kind() == SmtpErrorKind::InvalidRecipientAddress {
                    SmtpError::new(SmtpErrorKind::InvalidFromAddress, e.message().to_string())
                        .with_smtp_code(e.smtp_code().unwrap_or_default())
                } else {
                    e
                }
            })?;

        for recipient in &email.to {
            let reply = self
                .transport
                .send_command(&SmtpCommand::RcptTo(recipient.email().to_string()))
                .await?;
            // 251: user not local, will forward.
            if reply.code != codes::OK && reply.code != 251 {
                return Err(reply.to_error());
            }
        }

        self.transport
            .send_command(&SmtpCommand::Data)
            .await?
            .expect_code(codes::START_MAIL_INPUT)?;

        self.transport
            .send_data(&prepare_data_content(&message.bytes))
            .await?
            .expect_code(codes::OK)
    }

    /// Sends NOOP to check the session is alive.
    pub async fn noop(&mut self) -> SmtpResult<()> {
        let reply = self.transport.send_command(&SmtpCommand::Noop).await?;
        if reply.is_success() {
            Ok(())
        } else {
            Err(SmtpError::pool(
                SmtpErrorKind::ConnectionUnhealthy,
                format!("NOOP failed: {}", reply),
            ))
        }
    }

    /// Sends QUIT and closes the connection.
    pub async fn quit(mut self) {
        self.transport.close().await;
    }
}

async fn ehlo(transport: &mut dyn SmtpTransport, config: &SmtpConfig) -> SmtpResult<EsmtpCapabilities> {
    let reply = transport
        .send_command(&SmtpCommand::Ehlo(config.client_id().to_string()))
        .await?
        .expect_code(codes::OK)?;
    Ok(EsmtpCapabilities::from_ehlo_response(&reply))
}

/// deadpool manager creating established sessions.
#[derive(Debug)]
pub struct SessionManager {
    config: Arc<SmtpConfig>,
    connector: Arc<dyn Connector>,
    metrics: Arc<SmtpMetrics>,
}

impl SessionManager {
    /// Creates a manager.
    pub fn new(config: Arc<SmtpConfig>, connector: Arc<dyn Connector>, metrics: Arc<SmtpMetrics>) -> Self {
        Self {
            config,
            connector,
            metrics,
        }
    }
}

#[async_trait]
impl managed::Manager for SessionManager {
    type Type = SmtpSession;
    type Error = SmtpError;

    async fn create(&self) -> Result<SmtpSession, SmtpError> {
        SmtpSession::establish(self.connector.as_ref(), &self.config, &self.metrics).await
    }

    async fn recycle(&self, session: &mut SmtpSession, _: &Metrics) -> RecycleResult<SmtpError> {
        session.noop().await.map_err(RecycleError::Backend)
    }
}

/// Pool of established sessions.
pub type SessionPool = Pool<SessionManager>;

/// Creates a session pool sized by the configuration.
pub fn create_pool(
    config: Arc<SmtpConfig>,
    connector: Arc<dyn Connector>,
    metrics: Arc<SmtpMetrics>,
) -> SmtpResult<SessionPool> {
    let max_size = config.pool.max_connections;
    let wait = config.pool.acquire_timeout;

    Pool::builder(SessionManager::new(config, connector, metrics))
        .max_size(max_size)
        .wait_timeout(Some(wait))
        .runtime(deadpool::Runtime::Tokio1)
        .build()
        .map_err(|e| SmtpError::configuration(format!("Failed to create pool: {}", e)))
}

/// Maps a pool checkout failure to an SMTP error.
pub fn pool_error(error: PoolError<SmtpError>) -> SmtpError {
    match error {
        PoolError::Backend(e) => e,
        PoolError::Timeout(_) => SmtpError::pool(
            SmtpErrorKind::AcquireTimeout,
            "Timed out waiting for a free SMTP session",
        ),
        other => SmtpError::pool(SmtpErrorKind::PoolExhausted, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mime::MimeEncoder;
    use crate::mocks::{MockConnector, MockServer};
    use pretty_assertions::assert_eq;

    fn config(port: u16) -> SmtpConfig {
        SmtpConfig::builder()
            .host("smtp.test")
            .port(port)
            .credentials("mailer", "s3cret")
            .from("news@corp.dev")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_starttls_handshake_order() {
        let server = MockServer::new();
        let connector = MockConnector::new(server.clone());
        let metrics = SmtpMetrics::new();

        let session = SmtpSession::establish(&connector, &config(587), &metrics).await.unwrap();

        assert!(session.is_tls());
        assert!(session.is_authenticated());
        assert_eq!(
            server.commands(),
            vec!["EHLO localhost", "STARTTLS", "EHLO localhost", "AUTH PLAIN ***"]
        );
        assert_eq!(metrics.snapshot().tls_upgrades, 1);
    }

    #[tokio::test]
    async fn test_implicit_tls_skips_starttls() {
        let server = MockServer::new();
        let connector = MockConnector::new(server.clone());

        let session = SmtpSession::establish(&connector, &config(465), &SmtpMetrics::new())
            .await
            .unwrap();

        assert!(session.is_tls());
        assert_eq!(server.commands(), vec!["EHLO localhost", "AUTH PLAIN ***"]);
    }

    #[tokio::test]
    async fn test_missing_starttls_is_not_downgraded() {
        let server = MockServer::new().without_starttls();
        let connector = MockConnector::new(server.clone());

        let err = SmtpSession::establish(&connector, &config(587), &SmtpMetrics::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), SmtpErrorKind::StarttlsNotSupported);
        assert!(!server.commands().iter().any(|c| c.starts_with("AUTH")));
    }

    #[tokio::test]
    async fn test_login_fallback() {
        let server = MockServer::new().with_auth_mechanisms(&["LOGIN"]);
        let connector = MockConnector::new(server.clone());

        let session = SmtpSession::establish(&connector, &config(587), &SmtpMetrics::new())
            .await
            .unwrap();

        assert!(session.is_authenticated());
        let commands = server.commands();
        assert_eq!(&commands[3..], &["AUTH LOGIN ***", "***", "***"]);
    }

    #[tokio::test]
    async fn test_bad_credentials() {
        let server = MockServer::new().rejecting_auth();
        let connector = MockConnector::new(server);
        let metrics = SmtpMetrics::new();

        let err = SmtpSession::establish(&connector, &config(587), &metrics)
            .await
            .unwrap_err();

        assert!(err.is_authentication());
        assert_eq!(err.smtp_code(), Some(535));
        assert_eq!(metrics.snapshot().auth_failed, 1);
    }

    #[tokio::test]
    async fn test_rejected_recipient_resets_transaction() {
        let server = MockServer::new().rejecting("gone@corp.dev");
        let connector = MockConnector::new(server.clone());
        let mut session = SmtpSession::establish(&connector, &config(587), &SmtpMetrics::new())
            .await
            .unwrap();

        let email = Email::builder()
            .from("news@corp.dev").unwrap()
            .to("gone@corp.dev").unwrap()
            .subject("s")
            .text("t")
            .build()
            .unwrap();
        let message = MimeEncoder::for_email(&email).encode(&email).unwrap();

        let err = session.send(&email, &message).await.unwrap_err();
        assert_eq!(err.smtp_code(), Some(550));
        assert_eq!(server.commands().last().map(String::as_str), Some("RSET"));
        assert!(server.delivered().is_empty());
    }
}
