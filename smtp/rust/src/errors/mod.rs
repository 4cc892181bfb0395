//! Error types for the SMTP client.
//!
//! Errors carry the SMTP reply code when one was received, classify
//! themselves as transient or permanent, and can produce an operator hint
//! for connectivity and credential failures.

use std::fmt;
use thiserror::Error;

/// Result type for SMTP operations.
pub type SmtpResult<T> = Result<T, SmtpError>;

/// SMTP error kinds categorizing different failure modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SmtpErrorKind {
    // Connection errors
    /// DNS resolution failed.
    DnsResolution,
    /// Connection was refused.
    ConnectionRefused,
    /// Connection timed out.
    ConnectionTimeout,
    /// Connection was reset or closed by the peer.
    ConnectionReset,
    /// Network is unreachable.
    NetworkUnreachable,

    // TLS errors
    /// TLS handshake failed.
    TlsHandshakeFailed,
    /// STARTTLS not offered or refused by the server.
    StarttlsNotSupported,

    // Authentication errors
    /// Credentials are invalid.
    CredentialsInvalid,
    /// No mutually supported authentication mechanism.
    AuthMethodNotSupported,
    /// Server requires authentication.
    AuthenticationRequired,

    // Protocol errors
    /// Malformed reply from server.
    InvalidResponse,
    /// Reply code not expected at this point of the dialogue.
    UnexpectedResponse,
    /// Server is shutting down (421).
    ServerShutdown,
    /// Temporary rejection (450/451/452).
    TemporaryFailure,

    // Message errors
    /// Invalid sender address.
    InvalidFromAddress,
    /// Invalid or rejected recipient address.
    InvalidRecipientAddress,
    /// Message exceeds size limit.
    MessageTooLarge,
    /// Invalid header format.
    InvalidHeader,
    /// Encoding failed.
    EncodingFailed,

    // Timeout errors
    /// Server greeting not received in time.
    GreetingTimeout,
    /// Read timeout.
    ReadTimeout,
    /// Write timeout.
    WriteTimeout,
    /// Command reply not received in time.
    CommandTimeout,
    /// Connection verification did not finish in time.
    VerifyTimeout,

    // Pool errors
    /// Connection pool exhausted.
    PoolExhausted,
    /// Pool acquire timeout.
    AcquireTimeout,
    /// Connection is unhealthy.
    ConnectionUnhealthy,

    // Configuration errors
    /// Configuration is invalid.
    ConfigurationInvalid,

    // Generic
    /// Unknown or internal error.
    Unknown,
}

impl SmtpErrorKind {
    /// Returns true if this error kind is typically retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SmtpErrorKind::ConnectionTimeout
                | SmtpErrorKind::ConnectionReset
                | SmtpErrorKind::ReadTimeout
                | SmtpErrorKind::WriteTimeout
                | SmtpErrorKind::CommandTimeout
                | SmtpErrorKind::ServerShutdown
                | SmtpErrorKind::TemporaryFailure
                | SmtpErrorKind::PoolExhausted
                | SmtpErrorKind::AcquireTimeout
                | SmtpErrorKind::ConnectionUnhealthy
        )
    }

    /// Returns true for failures to reach or talk to the server at all.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            SmtpErrorKind::DnsResolution
                | SmtpErrorKind::ConnectionRefused
                | SmtpErrorKind::ConnectionTimeout
                | SmtpErrorKind::ConnectionReset
                | SmtpErrorKind::NetworkUnreachable
                | SmtpErrorKind::GreetingTimeout
                | SmtpErrorKind::ReadTimeout
                | SmtpErrorKind::WriteTimeout
                | SmtpErrorKind::CommandTimeout
                | SmtpErrorKind::VerifyTimeout
                | SmtpErrorKind::TlsHandshakeFailed
                | SmtpErrorKind::StarttlsNotSupported
        )
    }

    /// Returns true for credential failures.
    pub fn is_authentication(&self) -> bool {
        matches!(
            self,
            SmtpErrorKind::CredentialsInvalid
                | SmtpErrorKind::AuthMethodNotSupported
                | SmtpErrorKind::AuthenticationRequired
        )
    }
}

impl fmt::Display for SmtpErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SmtpErrorKind::DnsResolution => write!(f, "DNS resolution failed"),
            SmtpErrorKind::ConnectionRefused => write!(f, "Connection refused"),
            SmtpErrorKind::ConnectionTimeout => write!(f, "Connection timed out"),
            SmtpErrorKind::ConnectionReset => write!(f, "Connection reset"),
            SmtpErrorKind::NetworkUnreachable => write!(f, "Network unreachable"),
            SmtpErrorKind::TlsHandshakeFailed => write!(f, "TLS handshake failed"),
            SmtpErrorKind::StarttlsNotSupported => write!(f, "STARTTLS not supported"),
            SmtpErrorKind::CredentialsInvalid => write!(f, "Invalid credentials"),
            SmtpErrorKind::AuthMethodNotSupported => write!(f, "Auth method not supported"),
            SmtpErrorKind::AuthenticationRequired => write!(f, "Authentication required"),
            SmtpErrorKind::InvalidResponse => write!(f, "Invalid server response"),
            SmtpErrorKind::UnexpectedResponse => write!(f, "Unexpected response"),
            SmtpErrorKind::ServerShutdown => write!(f, "Server shutting down"),
            SmtpErrorKind::TemporaryFailure => write!(f, "Temporary failure"),
            SmtpErrorKind::InvalidFromAddress => write!(f, "Invalid sender address"),
            SmtpErrorKind::InvalidRecipientAddress => write!(f, "Invalid recipient address"),
            SmtpErrorKind::MessageTooLarge => write!(f, "Message too large"),
            SmtpErrorKind::InvalidHeader => write!(f, "Invalid header"),
            SmtpErrorKind::EncodingFailed => write!(f, "Encoding failed"),
            SmtpErrorKind::GreetingTimeout => write!(f, "Greeting timeout"),
            SmtpErrorKind::ReadTimeout => write!(f, "Read timeout"),
            SmtpErrorKind::WriteTimeout => write!(f, "Write timeout"),
            SmtpErrorKind::CommandTimeout => write!(f, "Command timeout"),
            SmtpErrorKind::VerifyTimeout => write!(f, "Verification timeout"),
            SmtpErrorKind::PoolExhausted => write!(f, "Connection pool exhausted"),
            SmtpErrorKind::AcquireTimeout => write!(f, "Pool acquire timeout"),
            SmtpErrorKind::ConnectionUnhealthy => write!(f, "Connection unhealthy"),
            SmtpErrorKind::ConfigurationInvalid => write!(f, "Invalid configuration"),
            SmtpErrorKind::Unknown => write!(f, "Unknown error"),
        }
    }
}

/// Enhanced SMTP status code (RFC 2034).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnhancedStatusCode {
    /// Class (2=success, 4=temporary, 5=permanent).
    pub class: u8,
    /// Subject (e.g., 1=addressing, 2=mailbox, 3=mail system).
    pub subject: u16,
    /// Detail code.
    pub detail: u16,
}

impl EnhancedStatusCode {
    /// Parses an enhanced status code from a string (e.g., "5.1.1").
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split('.');
        let code = Self {
            class: parts.next()?.parse().ok()?,
            subject: parts.next()?.parse().ok()?,
            detail: parts.next()?.parse().ok()?,
        };
        if parts.next().is_some() || !(2..=5).contains(&code.class) {
            return None;
        }
        Some(code)
    }

    /// Returns true if this is a permanent failure.
    pub fn is_permanent(&self) -> bool {
        self.class == 5
    }
}

impl fmt::Display for EnhancedStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.class, self.subject, self.detail)
    }
}

/// SMTP error with detailed information.
#[derive(Error, Debug)]
pub struct SmtpError {
    /// Error kind.
    kind: SmtpErrorKind,
    /// Human-readable message.
    message: String,
    /// SMTP status code if available.
    smtp_code: Option<u16>,
    /// Enhanced status code if available.
    enhanced_code: Option<EnhancedStatusCode>,
    /// Underlying cause.
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl SmtpError {
    /// Creates a new SMTP error.
    pub fn new(kind: SmtpErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            smtp_code: None,
            enhanced_code: None,
            cause: None,
        }
    }

    /// Sets the SMTP status code.
    pub fn with_smtp_code(mut self, code: u16) -> Self {
        self.smtp_code = Some(code);
        self
    }

    /// Sets the enhanced status code.
    pub fn with_enhanced_code(mut self, code: EnhancedStatusCode) -> Self {
        self.enhanced_code = Some(code);
        self
    }

    /// Sets the underlying cause.
    pub fn with_cause<E: std::error::Error + Send + Sync + 'static>(mut self, cause: E) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Returns the error kind.
    pub fn kind(&self) -> SmtpErrorKind {
        self.kind
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the SMTP status code if available.
    pub fn smtp_code(&self) -> Option<u16> {
        self.smtp_code
    }

    /// Returns the enhanced status code if available.
    pub fn enhanced_code(&self) -> Option<&EnhancedStatusCode> {
        self.enhanced_code.as_ref()
    }

    /// Returns true if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        if let Some(code) = self.smtp_code {
            return matches!(code, 421 | 450 | 451 | 452);
        }
        self.kind.is_retryable()
    }

    /// Returns true if the server could not be reached or negotiated with.
    pub fn is_connectivity(&self) -> bool {
        self.kind.is_connectivity()
    }

    /// Returns true for credential failures.
    pub fn is_authentication(&self) -> bool {
        self.kind.is_authentication()
    }

    /// Actionable hint for operators. Never includes credentials.
    pub fn hint(&self) -> Option<&'static str> {
        let hint = match self.kind {
            SmtpErrorKind::DnsResolution => {
                "Check the SMTP host name; it did not resolve"
            }
            SmtpErrorKind::ConnectionRefused | SmtpErrorKind::NetworkUnreachable => {
                "Check the SMTP host and port; the port may be blocked by a firewall or provider"
            }
            SmtpErrorKind::ConnectionTimeout
            | SmtpErrorKind::GreetingTimeout
            | SmtpErrorKind::VerifyTimeout => {
                "The server did not answer in time; outbound SMTP ports are often blocked, try 587 or 465"
            }
            SmtpErrorKind::TlsHandshakeFailed => {
                "TLS negotiation failed; use port 465 for implicit TLS or 587 for STARTTLS"
            }
            SmtpErrorKind::StarttlsNotSupported => {
                "The server does not offer STARTTLS on this port; use port 465 for implicit TLS"
            }
            SmtpErrorKind::CredentialsInvalid | SmtpErrorKind::AuthenticationRequired => {
                "Check the SMTP username and password; some providers require an app password"
            }
            SmtpErrorKind::AuthMethodNotSupported => {
                "The server offers no PLAIN or LOGIN authentication on this connection"
            }
            _ => return None,
        };
        Some(hint)
    }

    // Convenience constructors

    /// Creates a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::ConnectionRefused, message)
    }

    /// Creates a timeout error.
    pub fn timeout(kind: SmtpErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message)
    }

    /// Creates a TLS error.
    pub fn tls(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::TlsHandshakeFailed, message)
    }

    /// Creates an authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::CredentialsInvalid, message)
    }

    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::InvalidResponse, message)
    }

    /// Creates a message error.
    pub fn message_error(kind: SmtpErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message)
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::ConfigurationInvalid, message)
    }

    /// Creates a pool error.
    pub fn pool(kind: SmtpErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message)
    }

    /// Classifies an I/O failure.
    pub fn from_io(error: std::io::Error, context: &str) -> Self {
        use std::io::ErrorKind;
        let kind = match error.kind() {
            ErrorKind::ConnectionRefused => SmtpErrorKind::ConnectionRefused,
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => SmtpErrorKind::ConnectionReset,
            ErrorKind::TimedOut => SmtpErrorKind::ConnectionTimeout,
            ErrorKind::NotFound => SmtpErrorKind::DnsResolution,
            _ => SmtpErrorKind::Unknown,
        };
        Self::new(kind, format!("{}: {}", context, error)).with_cause(error)
    }

    /// Creates an error from an SMTP response.
    pub fn from_smtp_response(code: u16, message: impl Into<String>) -> Self {
        let kind = match code {
            421 => SmtpErrorKind::ServerShutdown,
            450 | 451 | 452 => SmtpErrorKind::TemporaryFailure,
            500..=504 => SmtpErrorKind::InvalidResponse,
            530 => SmtpErrorKind::AuthenticationRequired,
            534 | 535 => SmtpErrorKind::CredentialsInvalid,
            550 | 551 => SmtpErrorKind::InvalidRecipientAddress,
            552 => SmtpErrorKind::MessageTooLarge,
            553 => SmtpErrorKind::InvalidFromAddress,
            400..=599 => SmtpErrorKind::UnexpectedResponse,
            _ => SmtpErrorKind::Unknown,
        };
        Self::new(kind, message).with_smtp_code(code)
    }
}

impl fmt::Display for SmtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)?;
        if let Some(code) = self.smtp_code {
            write!(f, " (SMTP {})", code)?;
        }
        if let Some(enhanced) = &self.enhanced_code {
            write!(f, " [{}]", enhanced)?;
        }
        Ok(())
    }
}
