//! RFC 5322 message assembly.
//!
//! Bodies are quoted-printable, non-ASCII header text is RFC 2047 encoded,
//! text plus HTML becomes multipart/alternative and attachments wrap the
//! body in multipart/mixed.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};
use crate::types::{Attachment, Email};

/// Encoded message ready for DATA.
#[derive(Debug, Clone)]
pub struct EncodedMessage {
    /// Message-ID without angle brackets.
    pub message_id: String,
    /// Headers and body, CRLF line endings, not yet dot-stuffed.
    pub bytes: Vec<u8>,
}

/// MIME encoder for outbound messages.
pub struct MimeEncoder {
    date: DateTime<Utc>,
    domain: String,
}

impl MimeEncoder {
    /// Creates an encoder that stamps Message-IDs with `domain`.
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            date: Utc::now(),
            domain: domain.into(),
        }
    }

    /// Creates an encoder using the sender's domain for Message-IDs.
    pub fn for_email(email: &Email) -> Self {
        let domain = email
            .from
            .email()
            .rsplit_once('@')
            .map(|(_, d)| d)
            .unwrap_or("localhost");
        Self::new(domain)
    }

    /// Encodes an email.
    pub fn encode(&self, email: &Email) -> SmtpResult<EncodedMessage> {
        let mut output = Vec::new();
        let message_id = email
            .message_id
            .clone()
            .unwrap_or_else(|| self.generate_message_id());

        write_header(&mut output, "Date", &self.format_date())?;
        write_header(&mut output, "From", &email.from.to_header())?;
        let to: Vec<String> = email.to.iter().map(|a| a.to_header()).collect();
        write_header(&mut output, "To", &to.join(", "))?;
        if let Some(reply_to) = &email.reply_to {
            write_header(&mut output, "Reply-To", &reply_to.to_header())?;
        }
        write_header(&mut output, "Subject", &encode_header_word(&email.subject))?;
        write_header(&mut output, "Message-ID", &format!("<{}>", message_id))?;
        for (name, value) in &email.headers {
            write_header(&mut output, name, &encode_header_word(value))?;
        }
        write_header(&mut output, "MIME-Version", "1.0")?;

        if email.has_attachments() {
            let boundary = generate_boundary();
            write_header(
                &mut output,
                "Content-Type",
                &format!("multipart/mixed; boundary=\"{}\"", boundary),
            )?;
            output.extend_from_slice(b"\r\n");

            open_part(&mut output, &boundary);
            write_body(&mut output, email)?;
            for attachment in &email.attachments {
                open_part(&mut output, &boundary);
                write_attachment(&mut output, attachment)?;
            }
            close_multipart(&mut output, &boundary);
        } else {
            write_body(&mut output, email)?;
        }

        Ok(EncodedMessage {
            message_id,
            bytes: output,
        })
    }

    fn generate_message_id(&self) -> String {
        format!("{}.{}@{}", Uuid::new_v4().simple(), self.date.timestamp(), self.domain)
    }

    fn format_date(&self) -> String {
        self.date.format("%a, %d %b %Y %H:%M:%S %z").to_string()
    }
}

impl Default for MimeEncoder {
    fn default() -> Self {
        Self::new("localhost")
    }
}

/// Encodes a header value as an RFC 2047 word when it is not plain ASCII.
pub fn encode_header_word(value: &str) -> String {
    if value.chars().all(|c| c.is_ascii() && !c.is_control()) {
        return value.to_string();
    }
    format!("=?UTF-8?B?{}?=", BASE64.encode(value.as_bytes()))
}

/// Dot-stuffs a message and appends the `<CRLF>.<CRLF>` terminator.
pub fn prepare_data_content(encoded: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(encoded.len() + 64);
    let mut at_line_start = true;

    for &byte in encoded {
        if at_line_start && byte == b'.' {
            output.push(b'.');
        }
        output.push(byte);
        at_line_start = byte == b'\n';
    }

    if !output.ends_with(b"\r\n") {
        if output.ends_with(b"\n") {
            output.pop();
        }
        output.extend_from_slice(b"\r\n");
    }
    output.extend_from_slice(b".\r\n");
    output
}

fn write_body(output: &mut Vec<u8>, email: &Email) -> SmtpResult<()> {
    match (&email.text, &email.html) {
        (Some(text), Some(html)) => {
            let boundary = generate_boundary();
            write_header(
                output,
                "Content-Type",
                &format!("multipart/alternative; boundary=\"{}\"", boundary),
            )?;
            output.extend_from_slice(b"\r\n");

            // Plain text first; clients pick the last part they can render.
            open_part(output, &boundary);
            write_text_part(output, "text/plain", text)?;
            open_part(output, &boundary);
            write_text_part(output, "text/html", html)?;
            close_multipart(output, &boundary);
            Ok(())
        }
        (None, Some(html)) => write_text_part(output, "text/html", html),
        (Some(text), None) => write_text_part(output, "text/plain", text),
        (None, None) => Err(SmtpError::message_error(
            SmtpErrorKind::EncodingFailed,
            "Email body is required (text or HTML)",
        )),
    }
}

fn write_text_part(output: &mut Vec<u8>, mime_type: &str, body: &str) -> SmtpResult<()> {
    write_header(output, "Content-Type", &format!("{}; charset=utf-8", mime_type))?;
    write_header(output, "Content-Transfer-Encoding", "quoted-printable")?;
    output.extend_from_slice(b"\r\n");
    output.extend_from_slice(&quoted_printable::encode(normalize_newlines(body).as_bytes()));
    output.extend_from_slice(b"\r\n");
    Ok(())
}

fn write_attachment(output: &mut Vec<u8>, attachment: &Attachment) -> SmtpResult<()> {
    let filename = encode_header_word(&attachment.filename.replace('"', ""));
    write_header(
        output,
        "Content-Type",
        &format!("{}; name=\"{}\"", attachment.content_type, filename),
    )?;
    write_header(output, "Content-Transfer-Encoding", "base64")?;
    write_header(
        output,
        "Content-Disposition",
        &format!("attachment; filename=\"{}\"", filename),
    )?;
    output.extend_from_slice(b"\r\n");

    let encoded = BASE64.encode(&attachment.data);
    for chunk in encoded.as_bytes().chunks(76) {
        output.extend_from_slice(chunk);
        output.extend_from_slice(b"\r\n");
    }
    Ok(())
}

fn write_header(output: &mut Vec<u8>, name: &str, value: &str) -> SmtpResult<()> {
    if name.chars().any(|c| c.is_control() || c == ':') {
        return Err(SmtpError::message_error(
            SmtpErrorKind::InvalidHeader,
            format!("Invalid header name: {}", name),
        ));
    }
    // Header injection guard.
    if value.contains(['\r', '\n']) {
        return Err(SmtpError::message_error(
            SmtpErrorKind::InvalidHeader,
            format!("Header {} contains a line break", name),
        ));
    }

    output.extend_from_slice(fold_header(&format!("{}: {}", name, value)).as_bytes());
    output.extend_from_slice(b"\r\n");
    Ok(())
}

/// Folds a header line at whitespace so lines stay under 78 characters.
fn fold_header(header: &str) -> String {
    if header.len() <= 78 {
        return header.to_string();
    }

    let mut result = String::new();
    let mut line = String::new();
    for word in header.split(' ') {
        if line.is_empty() {
            line.push_str(word);
        } else if line.len() + 1 + word.len() <= 76 {
            line.push(' ');
            line.push_str(word);
        } else {
            result.push_str(&line);
            result.push_str("\r\n ");
            line = word.to_string();
        }
    }
    result.push_str(&line);
    result
}

fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\n', "\r\n")
}

fn generate_boundary() -> String {
    format!("----=_Part_{}", Uuid::new_v4().simple())
}

fn open_part(output: &mut Vec<u8>, boundary: &str) {
    output.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
}

fn close_multipart(output: &mut Vec<u8>, boundary: &str) {
    output.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Attachment;

    fn email() -> crate::types::EmailBuilder {
        Email::builder()
            .from("Repo News <news@corp.dev>")
            .unwrap()
            .to("jane@corp.dev")
            .unwrap()
            .subject("Hello")
    }

    #[test]
    fn test_header_encoding() {
        assert_eq!(encode_header_word("Hello"), "Hello");
        assert!(encode_header_word("Héllo").starts_with("=?UTF-8?B?"));
    }

    #[test]
    fn test_dot_stuffing() {
        let output = prepare_data_content(b"Hello\r\n.World\r\n..Test\r\n");
        let output = String::from_utf8_lossy(&output);
        assert!(output.contains("\r\n..World"));
        assert!(output.contains("\r\n...Test"));
        assert!(output.ends_with("\r\n.\r\n"));
    }

    #[test]
    fn test_text_only() {
        let message = MimeEncoder::new("corp.dev")
            .encode(&email().text("Hi there").build().unwrap())
            .unwrap();
        let content = String::from_utf8_lossy(&message.bytes);

        assert!(content.contains("From: Repo News <news@corp.dev>"));
        assert!(content.contains("To: jane@corp.dev"));
        assert!(content.contains("Content-Type: text/plain; charset=utf-8"));
        assert!(!content.contains("multipart"));
        assert!(message.message_id.ends_with("@corp.dev"));
    }

    #[test]
    fn test_alternative_orders_text_before_html() {
        let message = MimeEncoder::default()
            .encode(&email().text("plain").html("<b>rich</b>").build().unwrap())
            .unwrap();
        let content = String::from_utf8_lossy(&message.bytes);

        assert!(content.contains("multipart/alternative"));
        let text_at = content.find("text/plain").unwrap();
        let html_at = content.find("text/html").unwrap();
        assert!(text_at < html_at);
    }

    #[test]
    fn test_attachments_use_mixed() {
        let message = MimeEncoder::default()
            .encode(
                &email()
                    .html("<p>see attached</p>")
                    .attachment(Attachment::from_file("notes.txt", b"abc".to_vec()))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let content = String::from_utf8_lossy(&message.bytes);

        assert!(content.contains("multipart/mixed"));
        assert!(content.contains("filename=\"notes.txt\""));
        assert!(content.contains("YWJj"));
    }

    #[test]
    fn test_subject_line_breaks_are_encoded() {
        let message = MimeEncoder::default()
            .encode(
                &email()
                    .subject("Hi\r\nBcc: victim@x.dev")
                    .text("x")
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let content = String::from_utf8_lossy(&message.bytes);

        assert!(!content.contains("\r\nBcc:"));
        assert!(content.contains("Subject: =?UTF-8?B?"));
    }

    #[test]
    fn test_raw_line_break_in_header_rejected() {
        let mut out = Vec::new();
        let err = write_header(&mut out, "X-Test", "a\r\nb").unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::InvalidHeader);
    }

    #[test]
    fn test_for_email_uses_sender_domain() {
        let email = email().text("x").build().unwrap();
        let message = MimeEncoder::for_email(&email).encode(&email).unwrap();
        assert!(message.message_id.ends_with("@corp.dev"));
    }
}
