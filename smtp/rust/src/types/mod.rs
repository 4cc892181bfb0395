//! Message, address and send-result types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};

/// Email address with optional display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    /// Display name (e.g., "Jane Doe").
    pub name: Option<String>,
    /// Email address (e.g., "jane@example.com").
    pub email: String,
}

impl Address {
    /// Creates a new address with just an email.
    pub fn new(email: impl Into<String>) -> SmtpResult<Self> {
        let email = email.into().trim().to_string();
        Self::validate_email(&email)?;
        Ok(Self { name: None, email })
    }

    /// Creates a new address with display name and email.
    pub fn with_name(name: impl Into<String>, email: impl Into<String>) -> SmtpResult<Self> {
        let mut address = Self::new(email)?;
        let name = name.into();
        address.name = Some(name).filter(|n| !n.trim().is_empty());
        Ok(address)
    }

    /// Parses `jane@example.com` or `Jane Doe <jane@example.com>`.
    pub fn parse(s: &str) -> SmtpResult<Self> {
        let s = s.trim();

        if let (Some(start), Some(end)) = (s.find('<'), s.rfind('>')) {
            if start < end {
                let name = s[..start].trim().trim_matches('"');
                return Self::with_name(name, &s[start + 1..end]);
            }
        }

        Self::new(s)
    }

    /// Syntax check per RFC 5321 length limits.
    fn validate_email(email: &str) -> SmtpResult<()> {
        let invalid = |reason: &str| {
            SmtpError::message_error(
                SmtpErrorKind::InvalidRecipientAddress,
                format!("Invalid address {:?}: {}", email, reason),
            )
        };

        if email.is_empty() {
            return Err(invalid("empty"));
        }
        if email.len() > 254 {
            return Err(invalid("longer than 254 characters"));
        }
        if email.chars().any(|c| c.is_control() || c.is_whitespace() || c == '<' || c == '>') {
            return Err(invalid("contains whitespace, control or bracket characters"));
        }

        let (local, domain) = email
            .split_once('@')
            .ok_or_else(|| invalid("missing @"))?;
        if domain.contains('@') {
            return Err(invalid("more than one @"));
        }
        if local.is_empty() || local.len() > 64 {
            return Err(invalid("local part must be 1-64 characters"));
        }
        if domain.is_empty() {
            return Err(invalid("empty domain"));
        }

        Ok(())
    }

    /// Returns the email part only.
    pub fn email(&self) -> &str {
        &self.email
    }

    /// Returns the display name if present.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Formats the address for message headers.
    pub fn to_header(&self) -> String {
        match &self.name {
            Some(name) if name.is_ascii() => {
                if name.contains(|c: char| !c.is_alphanumeric() && c != ' ') {
                    format!("\"{}\" <{}>", name.replace('"', "\\\""), self.email)
                } else {
                    format!("{} <{}>", name, self.email)
                }
            }
            Some(name) => format!("{} <{}>", crate::mime::encode_header_word(name), self.email),
            None => self.email.clone(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_header())
    }
}

impl TryFrom<&str> for Address {
    type Error = SmtpError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Address::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = SmtpError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Address::parse(&s)
    }
}

impl TryFrom<&String> for Address {
    type Error = SmtpError;

    fn try_from(s: &String) -> Result<Self, Self::Error> {
        Address::parse(s)
    }
}

/// File attachment.
#[derive(Debug, Clone)]
pub struct Attachment {
    /// Filename.
    pub filename: String,
    /// MIME content type.
    pub content_type: String,
    /// Binary content.
    pub data: Vec<u8>,
}

impl Attachment {
    /// Creates a new attachment.
    pub fn new(filename: impl Into<String>, content_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            data,
        }
    }

    /// Creates an attachment with the content type guessed from the name.
    pub fn from_file(filename: impl Into<String>, data: Vec<u8>) -> Self {
        let filename = filename.into();
        let content_type = mime_guess::from_path(&filename)
            .first_or_octet_stream()
            .to_string();
        Self::new(filename, content_type, data)
    }
}

/// Outbound message.
#[derive(Debug, Clone)]
pub struct Email {
    /// Sender address.
    pub from: Address,
    /// Recipients.
    pub to: Vec<Address>,
    /// Reply-to address.
    pub reply_to: Option<Address>,
    /// Subject line.
    pub subject: String,
    /// Plain text body.
    pub text: Option<String>,
    /// HTML body.
    pub html: Option<String>,
    /// File attachments.
    pub attachments: Vec<Attachment>,
    /// Additional headers.
    pub headers: BTreeMap<String, String>,
    /// Message ID (generated if not set).
    pub message_id: Option<String>,
}

impl Email {
    /// Creates a new email builder.
    pub fn builder() -> EmailBuilder {
        EmailBuilder::default()
    }

    /// Returns true if the email has both text and HTML parts.
    pub fn is_multipart_alternative(&self) -> bool {
        self.text.is_some() && self.html.is_some()
    }

    /// Returns true if the email has any attachments.
    pub fn has_attachments(&self) -> bool {
        !self.attachments.is_empty()
    }
}

/// Builder for Email messages.
#[derive(Debug, Default)]
pub struct EmailBuilder {
    from: Option<Address>,
    to: Vec<Address>,
    reply_to: Option<Address>,
    subject: String,
    text: Option<String>,
    html: Option<String>,
    attachments: Vec<Attachment>,
    headers: BTreeMap<String, String>,
    message_id: Option<String>,
}

impl EmailBuilder {
    /// Sets the sender address.
    pub fn from(mut self, address: impl TryInto<Address, Error = SmtpError>) -> SmtpResult<Self> {
        self.from = Some(address.try_into()?);
        Ok(self)
    }

    /// Sets an already validated sender address.
    pub fn from_address(mut self, address: Address) -> Self {
        self.from = Some(address);
        self
    }

    /// Adds a recipient.
    pub fn to(mut self, address: impl TryInto<Address, Error = SmtpError>) -> SmtpResult<Self> {
        self.to.push(address.try_into()?);
        Ok(self)
    }

    /// Sets the reply-to address.
    pub fn reply_to(mut self, address: impl TryInto<Address, Error = SmtpError>) -> SmtpResult<Self> {
        self.reply_to = Some(address.try_into()?);
        Ok(self)
    }

    /// Sets the subject.
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Sets the plain text body.
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Sets the HTML body.
    pub fn html(mut self, html: impl Into<String>) -> Self {
        self.html = Some(html.into());
        self
    }

    /// Adds an attachment.
    pub fn attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Adds a custom header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets the message ID.
    pub fn message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Builds the email.
    pub fn build(self) -> SmtpResult<Email> {
        let from = self.from.ok_or_else(|| {
            SmtpError::message_error(SmtpErrorKind::InvalidFromAddress, "From address is required")
        })?;

        if self.to.is_empty() {
            return Err(SmtpError::message_error(
                SmtpErrorKind::InvalidRecipientAddress,
                "At least one recipient is required",
            ));
        }

        if self.text.is_none() && self.html.is_none() {
            return Err(SmtpError::message_error(
                SmtpErrorKind::EncodingFailed,
                "Email body is required (text or HTML)",
            ));
        }

        for name in self.headers.keys() {
            if name.is_empty() || name.contains(|c: char| c == ':' || c.is_whitespace()) {
                return Err(SmtpError::message_error(
                    SmtpErrorKind::InvalidHeader,
                    format!("Invalid header name {:?}", name),
                ));
            }
        }

        Ok(Email {
            from,
            to: self.to,
            reply_to: self.reply_to,
            subject: self.subject,
            text: self.text,
            html: self.html,
            attachments: self.attachments,
            headers: self.headers,
            message_id: self.message_id,
        })
    }
}

/// Receipt for one accepted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendResult {
    /// Message-ID header value sent with the message.
    pub message_id: String,
    /// Recipients the server accepted.
    pub accepted: Vec<String>,
    /// Final reply text after the message body.
    pub response: String,
    /// Time spent in the transaction.
    pub duration: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_address_parse() {
        let addr = Address::parse("test@example.com").unwrap();
        assert_eq!(addr.email, "test@example.com");
        assert!(addr.name.is_none());

        let addr = Address::parse("John Doe <john@example.com>").unwrap();
        assert_eq!(addr.email, "john@example.com");
        assert_eq!(addr.name, Some("John Doe".to_string()));

        let addr = Address::parse("\"Doe, John\" <john@example.com>").unwrap();
        assert_eq!(addr.name, Some("Doe, John".to_string()));
        assert_eq!(addr.to_header(), "\"Doe, John\" <john@example.com>");
    }

    #[test]
    fn test_address_validation() {
        assert!(Address::new("test.name@sub.example.com").is_ok());

        for bad in ["", "no-at-sign", "two@@signs.com", "@no-local.com", "no-domain@", "a b@c.d"] {
            let err = Address::new(bad).unwrap_err();
            assert_eq!(err.kind(), SmtpErrorKind::InvalidRecipientAddress, "{:?}", bad);
        }
    }

    #[test]
    fn test_email_builder() {
        let email = Email::builder()
            .from("Repo News <news@corp.dev>").unwrap()
            .to("jane@corp.dev").unwrap()
            .subject("Hello")
            .html("<p>Hi</p>")
            .text("Hi")
            .build()
            .unwrap();

        assert_eq!(email.from.name(), Some("Repo News"));
        assert!(email.is_multipart_alternative());
        assert!(!email.has_attachments());
    }

    #[test]
    fn test_email_builder_validation() {
        let missing_from = Email::builder().to("a@b.dev").unwrap().text("x").build();
        assert!(missing_from.is_err());

        let missing_to = Email::builder().from("a@b.dev").unwrap().text("x").build();
        assert!(missing_to.is_err());

        let missing_body = Email::builder()
            .from("a@b.dev").unwrap()
            .to("c@d.dev").unwrap()
            .build();
        assert!(missing_body.is_err());

        let bad_header = Email::builder()
            .from("a@b.dev").unwrap()
            .to("c@d.dev").unwrap()
            .text("x")
            .header("X Bad", "1")
            .build();
        assert_eq!(bad_header.unwrap_err().kind(), SmtpErrorKind::InvalidHeader);
    }

    #[test]
    fn test_attachment_content_type() {
        let attachment = Attachment::from_file("report.pdf", vec![1, 2, 3]);
        assert_eq!(attachment.content_type, "application/pdf");
    }
}
