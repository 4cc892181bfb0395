//! SMTP command and reply handling (RFC 5321).

use std::collections::HashSet;
use std::fmt;

use crate::auth::AuthMechanism;
use crate::errors::{EnhancedStatusCode, SmtpError, SmtpResult};

/// Commands the client issues during a submission session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    /// Extended HELLO with client identity.
    Ehlo(String),
    /// Start TLS negotiation.
    StartTls,
    /// Begin authentication.
    Auth {
        /// Mechanism name.
        mechanism: String,
        /// Initial response (optional).
        initial_response: Option<String>,
    },
    /// Continuation line of an AUTH exchange.
    AuthResponse(String),
    /// MAIL FROM command.
    MailFrom {
        /// Sender address, unbracketed.
        address: String,
        /// SIZE parameter (optional).
        size: Option<usize>,
    },
    /// RCPT TO command.
    RcptTo(String),
    /// DATA command.
    Data,
    /// Reset transaction.
    Rset,
    /// No operation (keepalive).
    Noop,
    /// Quit connection.
    Quit,
}

impl SmtpCommand {
    /// Formats the command for sending, without the trailing CRLF.
    pub fn to_smtp_string(&self) -> String {
        match self {
            SmtpCommand::Ehlo(domain) => format!("EHLO {}", domain),
            SmtpCommand::StartTls => "STARTTLS".to_string(),
            SmtpCommand::Auth {
                mechanism,
                initial_response: Some(response),
            } => format!("AUTH {} {}", mechanism, response),
            SmtpCommand::Auth { mechanism, .. } => format!("AUTH {}", mechanism),
            SmtpCommand::AuthResponse(line) => line.clone(),
            SmtpCommand::MailFrom { address, size } => match size {
                Some(s) => format!("MAIL FROM:<{}> SIZE={}", address, s),
                None => format!("MAIL FROM:<{}>", address),
            },
            SmtpCommand::RcptTo(address) => format!("RCPT TO:<{}>", address),
            SmtpCommand::Data => "DATA".to_string(),
            SmtpCommand::Rset => "RSET".to_string(),
            SmtpCommand::Noop => "NOOP".to_string(),
            SmtpCommand::Quit => "QUIT".to_string(),
        }
    }

    /// Form safe to log: AUTH payloads are masked.
    pub fn redacted(&self) -> String {
        match self {
            SmtpCommand::Auth { mechanism, .. } => format!("AUTH {} ***", mechanism),
            SmtpCommand::AuthResponse(_) => "***".to_string(),
            other => other.to_smtp_string(),
        }
    }
}

impl fmt::Display for SmtpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.redacted())
    }
}

/// SMTP reply from server.
#[derive(Debug, Clone)]
pub struct SmtpResponse {
    /// Status code (e.g., 250, 354, 550).
    pub code: u16,
    /// Enhanced status code (optional).
    pub enhanced_code: Option<EnhancedStatusCode>,
    /// Reply text, one entry per line.
    pub message: Vec<String>,
}

impl SmtpResponse {
    /// Creates a single-line reply.
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            enhanced_code: None,
            message: vec![message.into()],
        }
    }

    /// Parses a reply from its raw lines (CRLF already stripped).
    pub fn parse(lines: &[String]) -> SmtpResult<Self> {
        if lines.is_empty() {
            return Err(SmtpError::protocol("Empty response"));
        }

        let mut messages = Vec::with_capacity(lines.len());
        let mut code = 0u16;
        let mut enhanced_code = None;

        for (i, line) in lines.iter().enumerate() {
            let parsed_code: u16 = line
                .get(..3)
                .and_then(|c| c.parse().ok())
                .ok_or_else(|| SmtpError::protocol(format!("Invalid status line: {:?}", line)))?;

            if i == 0 {
                code = parsed_code;
            } else if parsed_code != code {
                return Err(SmtpError::protocol(
                    "Inconsistent status codes in multiline response",
                ));
            }

            let text = line.get(4..).unwrap_or("");
            if i == 0 {
                if let Some((esc, rest)) = parse_enhanced_code(text) {
                    enhanced_code = Some(esc);
                    messages.push(rest.trim().to_string());
                    continue;
                }
            }
            messages.push(text.to_string());
        }

        Ok(Self {
            code,
            enhanced_code,
            message: messages,
        })
    }

    /// Returns true if this line ends a reply (`250 ` rather than `250-`).
    pub fn is_final_line(line: &str) -> bool {
        line.len() < 4 || line.as_bytes().get(3) != Some(&b'-')
    }

    /// Returns true for 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Returns true for 3xx.
    pub fn is_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }

    /// Returns true for 4xx.
    pub fn is_temporary_failure(&self) -> bool {
        (400..500).contains(&self.code)
    }

    /// Returns the first message line.
    pub fn first_message(&self) -> &str {
        self.message.first().map(|s| s.as_str()).unwrap_or("")
    }

    /// Returns all message lines joined.
    pub fn full_message(&self) -> String {
        self.message.join("\n")
    }

    /// Converts to an error.
    pub fn to_error(&self) -> SmtpError {
        let mut err = SmtpError::from_smtp_response(self.code, self.full_message());
        if let Some(enhanced) = &self.enhanced_code {
            err = err.with_enhanced_code(enhanced.clone());
        }
        err
    }

    /// Ok if the code is `expected`, otherwise the reply as an error.
    pub fn expect_code(self, expected: u16) -> SmtpResult<Self> {
        if self.code == expected {
            Ok(self)
        } else {
            Err(self.to_error())
        }
    }
}

fn parse_enhanced_code(msg: &str) -> Option<(EnhancedStatusCode, &str)> {
    let (first, rest) = match msg.split_once(' ') {
        Some((first, rest)) => (first, rest),
        None => (msg, ""),
    };
    EnhancedStatusCode::parse(first).map(|code| (code, rest))
}

impl fmt::Display for SmtpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.first_message())
    }
}

/// ESMTP capabilities advertised in an EHLO reply.
#[derive(Debug, Clone, Default)]
pub struct EsmtpCapabilities {
    /// Maximum message size.
    pub size: Option<usize>,
    /// Supported authentication mechanisms we know how to drive.
    pub auth_mechanisms: HashSet<AuthMechanism>,
    /// STARTTLS supported.
    pub starttls: bool,
    /// 8BITMIME supported.
    pub eight_bit_mime: bool,
    /// Enhanced status codes supported.
    pub enhanced_status_codes: bool,
}

impl EsmtpCapabilities {
    /// Parses capabilities from an EHLO reply.
    pub fn from_ehlo_response(response: &SmtpResponse) -> Self {
        let mut caps = Self::default();

        // The first line is the server's greeting name.
        for line in response.message.iter().skip(1) {
            let line = line.trim().to_uppercase();
            let (capability, params) = line.split_once(' ').unwrap_or((line.as_str(), ""));

            match capability {
                "SIZE" => caps.size = params.parse().ok().filter(|s| *s > 0),
                "AUTH" => caps
                    .auth_mechanisms
                    .extend(params.split_whitespace().filter_map(AuthMechanism::from_capability)),
                "STARTTLS" => caps.starttls = true,
                "8BITMIME" => caps.eight_bit_mime = true,
                "ENHANCEDSTATUSCODES" => caps.enhanced_status_codes = true,
                _ => {}
            }
        }

        caps
    }

    /// Preferred mechanism: PLAIN, then LOGIN.
    pub fn best_auth_mechanism(&self) -> Option<AuthMechanism> {
        [AuthMechanism::Plain, AuthMechanism::Login]
            .into_iter()
            .find(|m| self.auth_mechanisms.contains(m))
    }
}

/// Reply codes the session checks for.
pub mod codes {
    /// Service ready.
    pub const SERVICE_READY: u16 = 220;
    /// Service closing.
    pub const SERVICE_CLOSING: u16 = 221;
    /// Authentication successful.
    pub const AUTH_SUCCESS: u16 = 235;
    /// OK.
    pub const OK: u16 = 250;
    /// Continue (AUTH).
    pub const AUTH_CONTINUE: u16 = 334;
    /// Start mail input.
    pub const START_MAIL_INPUT: u16 = 354;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_command_formatting() {
        assert_eq!(
            SmtpCommand::Ehlo("localhost".to_string()).to_smtp_string(),
            "EHLO localhost"
        );
        assert_eq!(
            SmtpCommand::MailFrom {
                address: "news@corp.dev".to_string(),
                size: Some(1024),
            }
            .to_smtp_string(),
            "MAIL FROM:<news@corp.dev> SIZE=1024"
        );
        assert_eq!(
            SmtpCommand::RcptTo("jane@corp.dev".to_string()).to_smtp_string(),
            "RCPT TO:<jane@corp.dev>"
        );
    }

    #[test]
    fn test_auth_is_redacted_in_display() {
        let cmd = SmtpCommand::Auth {
            mechanism: "PLAIN".to_string(),
            initial_response: Some("AHVzZXIAcGFzcw==".to_string()),
        };
        assert_eq!(cmd.to_string(), "AUTH PLAIN ***");
        assert_eq!(SmtpCommand::AuthResponse("cGFzcw==".into()).to_string(), "***");
    }

    #[test]
    fn test_response_parse() {
        let response = SmtpResponse::parse(&["250 OK".to_string()]).unwrap();
        assert_eq!(response.code, 250);
        assert!(response.is_success());
        assert_eq!(response.first_message(), "OK");

        let lines = vec![
            "250-smtp.example.com Hello".to_string(),
            "250-SIZE 10485760".to_string(),
            "250 STARTTLS".to_string(),
        ];
        let response = SmtpResponse::parse(&lines).unwrap();
        assert_eq!(response.message.len(), 3);
        assert!(SmtpResponse::is_final_line("250 STARTTLS"));
        assert!(!SmtpResponse::is_final_line("250-SIZE 1"));
    }

    #[test]
    fn test_response_with_enhanced_code() {
        let response = SmtpResponse::parse(&["550 5.1.1 User unknown".to_string()]).unwrap();
        let esc = response.enhanced_code.clone().unwrap();
        assert_eq!((esc.class, esc.subject, esc.detail), (5, 1, 1));
        assert_eq!(response.first_message(), "User unknown");
        assert!(response.expect_code(250).is_err());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(SmtpResponse::parse(&["hi".to_string()]).is_err());
        assert!(SmtpResponse::parse(&[]).is_err());
    }

    #[test]
    fn test_capabilities_parse() {
        let response = SmtpResponse {
            code: 250,
            enhanced_code: None,
            message: vec![
                "smtp.example.com".to_string(),
                "SIZE 10485760".to_string(),
                "AUTH LOGIN CRAM-MD5".to_string(),
                "STARTTLS".to_string(),
                "8BITMIME".to_string(),
            ],
        };

        let caps = EsmtpCapabilities::from_ehlo_response(&response);
        assert_eq!(caps.size, Some(10485760));
        assert!(caps.starttls);
        assert_eq!(caps.auth_mechanisms.len(), 1);
        assert_eq!(caps.best_auth_mechanism(), Some(AuthMechanism::Login));
    }
}
