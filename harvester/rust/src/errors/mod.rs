//! Error types for harvesting and dispatch runs.

use repomail_github::{ErrorClass, GitHubError};
use repomail_smtp::{SmtpError, SmtpErrorKind};
use std::fmt;
use thiserror::Error;

use crate::store::StoreError;

/// Result type for harvester operations.
pub type HarvestResult<T> = Result<T, HarvestError>;

/// Where a run-level failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarvestErrorKind {
    /// The hosting API failed in a way the run cannot absorb.
    Source,
    /// The Record Store rejected a write.
    Store,
    /// The mail server could not be verified before dispatch.
    Verification,
    /// A single send failed.
    Delivery,
    /// Invalid repository identifier, address or settings.
    InvalidInput,
}

impl fmt::Display for HarvestErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Store => write!(f, "store"),
            Self::Verification => write!(f, "verification"),
            Self::Delivery => write!(f, "delivery"),
            Self::InvalidInput => write!(f, "invalid_input"),
        }
    }
}

/// Harvester error.
#[derive(Error, Debug)]
pub struct HarvestError {
    kind: HarvestErrorKind,
    class: ErrorClass,
    message: String,
    hint: Option<&'static str>,
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for HarvestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} ({})", self.kind, self.message, self.class)?;
        if let Some(hint) = self.hint {
            write!(f, " hint: {}", hint)?;
        }
        Ok(())
    }
}

impl HarvestError {
    /// Creates a new error.
    pub fn new(kind: HarvestErrorKind, class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            kind,
            class,
            message: message.into(),
            hint: None,
            cause: None,
        }
    }

    /// Attaches an operator hint.
    pub fn with_hint(mut self, hint: &'static str) -> Self {
        self.hint = Some(hint);
        self
    }

    /// Sets the underlying cause.
    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Gets the error kind.
    pub fn kind(&self) -> HarvestErrorKind {
        self.kind
    }

    /// Gets the failure class.
    pub fn class(&self) -> ErrorClass {
        self.class
    }

    /// Gets the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Gets the operator hint, if any.
    pub fn hint(&self) -> Option<&'static str> {
        self.hint
    }

    /// Returns true if the hosting API quota ran out.
    pub fn is_rate_limit(&self) -> bool {
        self.class == ErrorClass::RateLimit
    }

    /// Invalid caller input, raised before any network call.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(HarvestErrorKind::InvalidInput, ErrorClass::MalformedInput, message)
    }

    /// Mail server verification failed; no address was attempted.
    pub fn verification(error: SmtpError) -> Self {
        let mut err = Self::new(
            HarvestErrorKind::Verification,
            smtp_class(&error),
            format!("Mail server verification failed: {}", error.message()),
        );
        if let Some(hint) = error.hint() {
            err = err.with_hint(hint);
        }
        err.with_cause(error)
    }
}

impl From<GitHubError> for HarvestError {
    fn from(error: GitHubError) -> Self {
        let class = error.class();
        let kind = if class == ErrorClass::MalformedInput {
            HarvestErrorKind::InvalidInput
        } else {
            HarvestErrorKind::Source
        };
        Self::new(kind, class, error.message().to_string()).with_cause(error)
    }
}

impl From<SmtpError> for HarvestError {
    fn from(error: SmtpError) -> Self {
        let mut err = Self::new(
            HarvestErrorKind::Delivery,
            smtp_class(&error),
            error.message().to_string(),
        );
        if let Some(hint) = error.hint() {
            err = err.with_hint(hint);
        }
        err.with_cause(error)
    }
}

impl From<StoreError> for HarvestError {
    fn from(error: StoreError) -> Self {
        Self::new(HarvestErrorKind::Store, ErrorClass::Terminal, error.to_string()).with_cause(error)
    }
}

/// Maps an SMTP failure onto the shared failure classes.
pub fn smtp_class(error: &SmtpError) -> ErrorClass {
    if error.is_authentication() {
        return ErrorClass::Authentication;
    }
    if error.is_connectivity() || error.is_retryable() {
        return ErrorClass::TransientNetwork;
    }
    match error.kind() {
        SmtpErrorKind::InvalidRecipientAddress if error.smtp_code().is_none() => {
            ErrorClass::MalformedInput
        }
        SmtpErrorKind::InvalidFromAddress
        | SmtpErrorKind::InvalidHeader
        | SmtpErrorKind::ConfigurationInvalid => ErrorClass::MalformedInput,
        _ => ErrorClass::Terminal,
    }
}
