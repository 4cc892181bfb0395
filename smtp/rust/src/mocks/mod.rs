//! In-memory SMTP server doubles.
//!
//! [`MockServer`] holds the scripted behaviour and everything the client
//! sent. [`MockConnector`] hands out [`MockTransport`]s that answer each
//! command the way a submission server would.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::config::{SmtpConfig, TlsConfig, TlsMode};
use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};
use crate::protocol::{SmtpCommand, SmtpResponse};
use crate::transport::{Connector, SmtpTransport};

/// A message accepted by the mock server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredMessage {
    /// Envelope sender.
    pub from: String,
    /// Envelope recipients.
    pub to: Vec<String>,
    /// Raw DATA payload, dot-stuffing included.
    pub data: String,
}

#[derive(Debug)]
struct ServerState {
    advertise_starttls: bool,
    auth_mechanisms: Vec<String>,
    reject_auth: bool,
    rejected_recipients: HashSet<String>,
    transient_data_failures: u32,
    commands: Vec<String>,
    delivered: Vec<DeliveredMessage>,
}

impl Default for ServerState {
    fn default() -> Self {
        Self {
            advertise_starttls: true,
            auth_mechanisms: vec!["PLAIN".to_string(), "LOGIN".to_string()],
            reject_auth: false,
            rejected_recipients: HashSet::new(),
            transient_data_failures: 0,
            commands: Vec::new(),
            delivered: Vec::new(),
        }
    }
}

/// Shared scripted server state.
#[derive(Debug, Clone, Default)]
pub struct MockServer {
    state: Arc<Mutex<ServerState>>,
}

impl MockServer {
    /// Server advertising STARTTLS and AUTH PLAIN LOGIN, accepting everything.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stops advertising STARTTLS.
    pub fn without_starttls(self) -> Self {
        self.state().advertise_starttls = false;
        self
    }

    /// Replaces the advertised AUTH mechanisms.
    pub fn with_auth_mechanisms(self, mechanisms: &[&str]) -> Self {
        self.state().auth_mechanisms = mechanisms.iter().map(|m| m.to_string()).collect();
        self
    }

    /// Answers every AUTH with 535.
    pub fn rejecting_auth(self) -> Self {
        self.state().reject_auth = true;
        self
    }

    /// Answers `RCPT TO` for `address` with 550.
    pub fn rejecting(self, address: &str) -> Self {
        self.state().rejected_recipients.insert(address.to_lowercase());
        self
    }

    /// Answers the next `count` message bodies with 451.
    pub fn with_transient_failures(self, count: u32) -> Self {
        self.state().transient_data_failures = count;
        self
    }

    /// Commands received, AUTH payloads masked.
    pub fn commands(&self) -> Vec<String> {
        self.state().commands.clone()
    }

    /// Messages accepted.
    pub fn delivered(&self) -> Vec<DeliveredMessage> {
        self.state().delivered.clone()
    }
}

/// Transport answering from a [`MockServer`].
#[derive(Debug)]
pub struct MockTransport {
    server: MockServer,
    tls: bool,
    greeted: bool,
    login_step: Option<usize>,
    envelope_from: Option<String>,
    envelope_to: Vec<String>,
    closed: bool,
}

impl MockTransport {
    /// Creates a transport; `tls` marks an implicit-TLS connection.
    pub fn new(server: MockServer, tls: bool) -> Self {
        Self {
            server,
            tls,
            greeted: false,
            login_step: None,
            envelope_from: None,
            envelope_to: Vec::new(),
            closed: false,
        }
    }

    fn ensure_open(&self) -> SmtpResult<()> {
        if self.closed {
            return Err(SmtpError::new(SmtpErrorKind::ConnectionReset, "Mock connection closed"));
        }
        Ok(())
    }

    fn ehlo_reply(&self) -> SmtpResponse {
        let state = self.server.state();
        let mut lines = vec!["mock.test".to_string(), "SIZE 10485760".to_string(), "8BITMIME".to_string()];
        if !state.auth_mechanisms.is_empty() {
            lines.push(format!("AUTH {}", state.auth_mechanisms.join(" ")));
        }
        if state.advertise_starttls && !self.tls {
            lines.push("STARTTLS".to_string());
        }
        SmtpResponse {
            code: 250,
            enhanced_code: None,
            message: lines,
        }
    }

    fn auth_result(&self) -> SmtpResponse {
        if self.server.state().reject_auth {
            SmtpResponse::new(535, "Authentication credentials invalid")
        } else {
            SmtpResponse::new(235, "Authentication successful")
        }
    }

    fn reply(&mut self, command: &SmtpCommand) -> SmtpResponse {
        match command {
            SmtpCommand::Ehlo(_) => self.ehlo_reply(),
            SmtpCommand::StartTls => {
                if self.server.state().advertise_starttls {
                    SmtpResponse::new(220, "Ready to start TLS")
                } else {
                    SmtpResponse::new(502, "Command not implemented")
                }
            }
            SmtpCommand::Auth { mechanism, .. } if mechanism == "LOGIN" => {
                self.login_step = Some(0);
                // "Username:"
                SmtpResponse::new(334, "VXNlcm5hbWU6")
            }
            SmtpCommand::Auth { .. } => self.auth_result(),
            SmtpCommand::AuthResponse(_) => match self.login_step {
                Some(0) => {
                    self.login_step = Some(1);
                    // "Password:"
                    SmtpResponse::new(334, "UGFzc3dvcmQ6")
                }
                Some(_) => {
                    self.login_step = None;
                    self.auth_result()
                }
                None => SmtpResponse::new(503, "Bad sequence of commands"),
            },
            SmtpCommand::MailFrom { address, .. } => {
                self.envelope_from = Some(address.clone());
                self.envelope_to.clear();
                SmtpResponse::new(250, "2.1.0 Ok")
            }
            SmtpCommand::RcptTo(address) => {
                if self.server.state().rejected_recipients.contains(&address.to_lowercase()) {
                    SmtpResponse::parse(&["550 5.1.1 Recipient address rejected".to_string()])
                        .unwrap_or_else(|_| SmtpResponse::new(550, "rejected"))
                } else {
                    self.envelope_to.push(address.clone());
                    SmtpResponse::new(250, "2.1.5 Ok")
                }
            }
            SmtpCommand::Data => {
                if self.envelope_from.is_some() && !self.envelope_to.is_empty() {
                    SmtpResponse::new(354, "End data with <CR><LF>.<CR><LF>")
                } else {
                    SmtpResponse::new(503, "Bad sequence of commands")
                }
            }
            SmtpCommand::Rset => {
                self.envelope_from = None;
                self.envelope_to.clear();
                SmtpResponse::new(250, "2.0.0 Ok")
            }
            SmtpCommand::Noop => SmtpResponse::new(250, "2.0.0 Ok"),
            SmtpCommand::Quit => {
                self.closed = true;
                SmtpResponse::new(221, "Bye")
            }
        }
    }
}

#[async_trait]
impl SmtpTransport for MockTransport {
    async fn read_response(&mut self) -> SmtpResult<SmtpResponse> {
        self.ensure_open()?;
        if self.greeted {
            return Err(SmtpError::protocol("Mock server has nothing more to say"));
        }
        self.greeted = true;
        Ok(SmtpResponse::new(220, "mock.test ESMTP ready"))
    }

    async fn send_command(&mut self, command: &SmtpCommand) -> SmtpResult<SmtpResponse> {
        self.ensure_open()?;
        self.server.state().commands.push(command.redacted());
        Ok(self.reply(command))
    }

    async fn send_data(&mut self, data: &[u8]) -> SmtpResult<SmtpResponse> {
        self.ensure_open()?;
        let mut state = self.server.state();
        if state.transient_data_failures > 0 {
            state.transient_data_failures -= 1;
            return Ok(SmtpResponse::new(451, "4.3.0 Try again later"));
        }

        state.delivered.push(DeliveredMessage {
            from: self.envelope_from.take().unwrap_or_default(),
            to: std::mem::take(&mut self.envelope_to),
            data: String::from_utf8_lossy(data).into_owned(),
        });
        let id = state.delivered.len();
        Ok(SmtpResponse::new(250, format!("2.0.0 Ok: queued as MOCK{}", id)))
    }

    async fn upgrade_tls(&mut self, _config: &TlsConfig, _server_name: &str) -> SmtpResult<()> {
        self.ensure_open()?;
        self.tls = true;
        Ok(())
    }

    fn is_tls(&self) -> bool {
        self.tls
    }

    async fn close(&mut self) {
        if !self.closed {
            let _ = self.send_command(&SmtpCommand::Quit).await;
        }
    }
}

/// Connector producing [`MockTransport`]s.
#[derive(Debug)]
pub struct MockConnector {
    server: MockServer,
    failure: Option<SmtpErrorKind>,
    delay: Option<Duration>,
    connects: AtomicUsize,
}

impl MockConnector {
    /// Connector for `server`.
    pub fn new(server: MockServer) -> Self {
        Self {
            server,
            failure: None,
            delay: None,
            connects: AtomicUsize::new(0),
        }
    }

    /// Every connect fails with `kind`.
    pub fn failing(mut self, kind: SmtpErrorKind) -> Self {
        self.failure = Some(kind);
        self
    }

    /// Every connect takes `delay` first.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of connects attempted.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, config: &SmtpConfig) -> SmtpResult<Box<dyn SmtpTransport>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(kind) = self.failure {
            return Err(SmtpError::new(kind, format!("Mock connect to {} failed", config.address())));
        }
        let implicit = config.tls_mode() == TlsMode::Implicit;
        Ok(Box::new(MockTransport::new(self.server.clone(), implicit)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_transport_flow() {
        let server = MockServer::new().rejecting("nobody@corp.dev");
        let mut transport = MockTransport::new(server.clone(), false);

        assert_eq!(transport.read_response().await.unwrap().code, 220);
        let ehlo = transport.send_command(&SmtpCommand::Ehlo("c".into())).await.unwrap();
        assert!(ehlo.message.iter().any(|l| l == "STARTTLS"));

        transport
            .send_command(&SmtpCommand::MailFrom { address: "a@corp.dev".into(), size: None })
            .await
            .unwrap();
        let rejected = transport.send_command(&SmtpCommand::RcptTo("nobody@corp.dev".into())).await.unwrap();
        assert_eq!(rejected.code, 550);
        let accepted = transport.send_command(&SmtpCommand::RcptTo("b@corp.dev".into())).await.unwrap();
        assert_eq!(accepted.code, 250);
        assert_eq!(transport.send_command(&SmtpCommand::Data).await.unwrap().code, 354);
        assert_eq!(transport.send_data(b"hi\r\n.\r\n").await.unwrap().code, 250);

        let delivered = server.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].to, vec!["b@corp.dev".to_string()]);
    }

    #[tokio::test]
    async fn test_failing_connector_counts() {
        let connector = MockConnector::new(MockServer::new()).failing(SmtpErrorKind::ConnectionRefused);
        let config = SmtpConfig::builder().host("h").from("a@b.dev").build().unwrap();

        assert!(connector.connect(&config).await.is_err());
        assert_eq!(connector.connects(), 1);
    }
}
