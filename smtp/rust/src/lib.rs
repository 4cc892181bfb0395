//! # SMTP Submission Library
//!
//! An async SMTP client for templated bulk mail:
//! - Implicit TLS on port 465, mandatory STARTTLS everywhere else
//! - Self-signed certificates tolerated, TLS 1.2 minimum
//! - AUTH PLAIN with LOGIN fallback
//! - Pooled sessions recycled with NOOP
//! - Bounded retry of 421/45x replies
//! - `verify()` bounded by a hard timeout
//! - `{{var}}` template rendering
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use repomail_smtp::{MessageTemplate, SmtpClient, SmtpConfig, TemplateVars};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SmtpConfig::builder()
//!         .host("smtp.example.com")
//!         .port(587)
//!         .credentials("mailer@example.com", "password")
//!         .from_name("Release Team", "mailer@example.com")
//!         .build()?;
//!
//!     let client = SmtpClient::new(config)?;
//!     client.verify().await?;
//!
//!     let template = MessageTemplate::new("Hi {{name}}", "<p>Thanks for {{repository}}</p>");
//!     let vars = TemplateVars::for_email("jane@example.org")
//!         .name("Jane")
//!         .repository("acme/widgets");
//!     let message = template.render(&vars);
//!
//!     let receipt = client
//!         .send_one("jane@example.org", &message.subject, &message.html, None)
//!         .await?;
//!     println!("Message sent with ID: {}", receipt.message_id);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod config;
pub mod errors;
pub mod types;

// Protocol layer
pub mod protocol;

// Transport layer
pub mod transport;

// Authentication
pub mod auth;

// Sessions and pooling
pub mod session;

// MIME encoding
pub mod mime;

// Templates
pub mod template;

// Resilience
pub mod resilience;

// Observability
pub mod observability;

// Client
pub mod client;

// Mocks for testing
pub mod mocks;

// Re-exports for convenience
pub use auth::{AuthMechanism, Credentials};
pub use client::SmtpClient;
pub use config::{PoolConfig, RetryConfig, SmtpConfig, SmtpConfigBuilder, TlsConfig, TlsMode, TlsVersion};
pub use errors::{SmtpError, SmtpErrorKind, SmtpResult};
pub use mime::{EncodedMessage, MimeEncoder};
pub use observability::{MetricsSnapshot, SmtpMetrics};
pub use protocol::{EsmtpCapabilities, SmtpCommand, SmtpResponse};
pub use resilience::RetryExecutor;
pub use session::{SessionPool, SmtpSession};
pub use template::{render, MessageTemplate, RenderedMessage, TemplateVars};
pub use transport::{Connector, SmtpTransport, TcpConnector};
pub use types::{Address, Attachment, Email, EmailBuilder, SendResult};
