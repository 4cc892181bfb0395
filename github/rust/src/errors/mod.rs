//! Error types for the GitHub client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias for GitHub operations.
pub type GitHubResult<T> = Result<T, GitHubError>;

/// Error kinds for categorizing GitHub errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitHubErrorKind {
    // Configuration errors
    /// Missing authentication configuration.
    MissingAuth,
    /// Invalid base URL.
    InvalidBaseUrl,
    /// Invalid configuration.
    InvalidConfiguration,

    // Authentication errors
    /// Bad credentials (401).
    BadCredentials,
    /// Access forbidden without a rate-limit signal (403).
    Forbidden,

    // Request errors
    /// Request validation failed (400).
    ValidationError,
    /// Invalid parameter, rejected before any request is issued.
    InvalidParameter,
    /// Unprocessable entity (422).
    UnprocessableEntity,

    // Resource errors
    /// Resource not found (404).
    NotFound,
    /// Resource is gone (410).
    Gone,
    /// Resource conflict (409).
    Conflict,

    // Rate limit errors
    /// Primary rate limit exceeded (403/429 with `x-ratelimit-remaining: 0`).
    PrimaryRateLimitExceeded,
    /// Secondary rate limit exceeded (429 or 403 with `retry-after`).
    SecondaryRateLimitExceeded,

    // Network errors
    /// Connection failed or was refused.
    ConnectionFailed,
    /// Request timeout.
    Timeout,
    /// DNS resolution failed.
    DnsResolutionFailed,
    /// Connection reset or hung up mid-request.
    ConnectionReset,

    // Server errors
    /// Internal server error (500).
    InternalError,
    /// Bad gateway (502).
    BadGateway,
    /// Service unavailable (503).
    ServiceUnavailable,

    // Response errors
    /// Failed to deserialize response.
    DeserializationError,

    // Generic
    /// Unknown error.
    Unknown,
}

impl fmt::Display for GitHubErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingAuth => write!(f, "missing_auth"),
            Self::InvalidBaseUrl => write!(f, "invalid_base_url"),
            Self::InvalidConfiguration => write!(f, "invalid_configuration"),
            Self::BadCredentials => write!(f, "bad_credentials"),
            Self::Forbidden => write!(f, "forbidden"),
            Self::ValidationError => write!(f, "validation_error"),
            Self::InvalidParameter => write!(f, "invalid_parameter"),
            Self::UnprocessableEntity => write!(f, "unprocessable_entity"),
            Self::NotFound => write!(f, "not_found"),
            Self::Gone => write!(f, "gone"),
            Self::Conflict => write!(f, "conflict"),
            Self::PrimaryRateLimitExceeded => write!(f, "primary_rate_limit_exceeded"),
            Self::SecondaryRateLimitExceeded => write!(f, "secondary_rate_limit_exceeded"),
            Self::ConnectionFailed => write!(f, "connection_failed"),
            Self::Timeout => write!(f, "timeout"),
            Self::DnsResolutionFailed => write!(f, "dns_resolution_failed"),
            Self::ConnectionReset => write!(f, "connection_reset"),
            Self::InternalError => write!(f, "internal_error"),
            Self::BadGateway => write!(f, "bad_gateway"),
            Self::ServiceUnavailable => write!(f, "service_unavailable"),
            Self::DeserializationError => write!(f, "deserialization_error"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Coarse failure classes shared by the API client and its callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Reset, timeout, DNS failure, refused connection or hang-up. Retryable.
    TransientNetwork,
    /// Remote quota exhausted.
    RateLimit,
    /// Bad credentials. Never retried.
    Authentication,
    /// Rejected locally before any network call.
    MalformedInput,
    /// Any other API error, propagated without retry.
    Terminal,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransientNetwork => write!(f, "transient_network"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Authentication => write!(f, "authentication"),
            Self::MalformedInput => write!(f, "malformed_input"),
            Self::Terminal => write!(f, "terminal"),
        }
    }
}

/// Rate limit information extracted from an error response.
#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    /// Maximum requests allowed.
    pub limit: u32,
    /// Remaining requests in current window.
    pub remaining: u32,
    /// Time when the rate limit resets, if the server reported one.
    pub reset_at: Option<DateTime<Utc>>,
    /// Retry-After header value in seconds (if present).
    pub retry_after: Option<u64>,
    /// Resource category.
    pub resource: Option<String>,
}

/// GitHub API error with detailed information.
#[derive(Error, Debug)]
pub struct GitHubError {
    /// Error kind.
    kind: GitHubErrorKind,
    /// Error message.
    message: String,
    /// HTTP status code.
    status_code: Option<u16>,
    /// GitHub request ID.
    request_id: Option<String>,
    /// Documentation URL.
    documentation_url: Option<String>,
    /// Rate limit info (if applicable).
    rate_limit: Option<RateLimitInfo>,
    /// Underlying cause.
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for GitHubError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)?;
        if let Some(code) = self.status_code {
            write!(f, " (HTTP {})", code)?;
        }
        if let Some(ref id) = self.request_id {
            write!(f, " [request_id: {}]", id)?;
        }
        Ok(())
    }
}

impl GitHubError {
    /// Creates a new GitHub error.
    pub fn new(kind: GitHubErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
            request_id: None,
            documentation_url: None,
            rate_limit: None,
            cause: None,
        }
    }

    /// Sets the HTTP status code.
    pub fn with_status(mut self, code: u16) -> Self {
        self.status_code = Some(code);
        self
    }

    /// Sets the GitHub request ID.
    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    /// Sets the documentation URL.
    pub fn with_documentation_url(mut self, url: impl Into<String>) -> Self {
        self.documentation_url = Some(url.into());
        self
    }

    /// Sets the rate limit info.
    pub fn with_rate_limit(mut self, info: RateLimitInfo) -> Self {
        self.rate_limit = Some(info);
        self
    }

    /// Sets the underlying cause.
    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Gets the error kind.
    pub fn kind(&self) -> GitHubErrorKind {
        self.kind
    }

    /// Gets the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Gets the HTTP status code.
    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    /// Gets the request ID.
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Gets the documentation URL.
    pub fn documentation_url(&self) -> Option<&str> {
        self.documentation_url.as_deref()
    }

    /// Gets the rate limit info.
    pub fn rate_limit(&self) -> Option<&RateLimitInfo> {
        self.rate_limit.as_ref()
    }

    /// Returns true for transient network failures.
    ///
    /// Server errors are deliberately excluded: they surface to the caller
    /// without a retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            GitHubErrorKind::ConnectionFailed
                | GitHubErrorKind::Timeout
                | GitHubErrorKind::DnsResolutionFailed
                | GitHubErrorKind::ConnectionReset
        )
    }

    /// Returns true for primary or secondary rate-limit responses.
    ///
    /// Only an exhausted primary quota maps onto [`ErrorClass::RateLimit`].
    pub fn is_rate_limit(&self) -> bool {
        matches!(
            self.kind,
            GitHubErrorKind::PrimaryRateLimitExceeded | GitHubErrorKind::SecondaryRateLimitExceeded
        )
    }

    /// Maps the error kind onto its failure class.
    pub fn class(&self) -> ErrorClass {
        match self.kind {
            GitHubErrorKind::ConnectionFailed
            | GitHubErrorKind::Timeout
            | GitHubErrorKind::DnsResolutionFailed
            | GitHubErrorKind::ConnectionReset => ErrorClass::TransientNetwork,
            GitHubErrorKind::PrimaryRateLimitExceeded => ErrorClass::RateLimit,
            GitHubErrorKind::BadCredentials | GitHubErrorKind::MissingAuth => {
                ErrorClass::Authentication
            }
            GitHubErrorKind::InvalidParameter
            | GitHubErrorKind::InvalidBaseUrl
            | GitHubErrorKind::InvalidConfiguration => ErrorClass::MalformedInput,
            _ => ErrorClass::Terminal,
        }
    }

    /// Creates an error from an HTTP status code and GitHub error response.
    pub fn from_response(
        status: u16,
        message: String,
        documentation_url: Option<String>,
        request_id: Option<String>,
    ) -> Self {
        let kind = Self::kind_from_status(status);
        let mut error = Self::new(kind, message).with_status(status);

        if let Some(url) = documentation_url {
            error = error.with_documentation_url(url);
        }
        if let Some(id) = request_id {
            error = error.with_request_id(id);
        }

        error
    }

    /// Maps HTTP status code to error kind.
    fn kind_from_status(status: u16) -> GitHubErrorKind {
        match status {
            400 => GitHubErrorKind::ValidationError,
            401 => GitHubErrorKind::BadCredentials,
            403 => GitHubErrorKind::Forbidden,
            404 => GitHubErrorKind::NotFound,
            409 => GitHubErrorKind::Conflict,
            410 => GitHubErrorKind::Gone,
            422 => GitHubErrorKind::UnprocessableEntity,
            429 => GitHubErrorKind::SecondaryRateLimitExceeded,
            500 => GitHubErrorKind::InternalError,
            502 => GitHubErrorKind::BadGateway,
            503 => GitHubErrorKind::ServiceUnavailable,
            _ => GitHubErrorKind::Unknown,
        }
    }

    /// Classifies a transport failure reported by reqwest.
    pub fn from_transport(error: reqwest::Error) -> Self {
        let kind = if error.is_timeout() {
            GitHubErrorKind::Timeout
        } else if error.is_connect() {
            if chain_mentions(&error, &["dns", "resolve", "lookup"]) {
                GitHubErrorKind::DnsResolutionFailed
            } else {
                GitHubErrorKind::ConnectionFailed
            }
        } else if error.is_request() || error.is_body() {
            if chain_mentions(&error, &["reset", "hang up", "broken pipe", "closed"]) {
                GitHubErrorKind::ConnectionReset
            } else {
                GitHubErrorKind::ConnectionFailed
            }
        } else if error.is_decode() {
            GitHubErrorKind::DeserializationError
        } else {
            GitHubErrorKind::Unknown
        };

        Self::new(kind, format!("Request failed: {}", error)).with_cause(error)
    }

    // Convenience constructors

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(GitHubErrorKind::InvalidConfiguration, message)
    }

    /// Creates an invalid parameter error.
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::new(GitHubErrorKind::InvalidParameter, message)
    }

    /// Creates an authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(GitHubErrorKind::BadCredentials, message)
    }

    /// Creates a not found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(GitHubErrorKind::NotFound, message).with_status(404)
    }

    /// Creates a rate limit error.
    pub fn rate_limit_exceeded(info: RateLimitInfo) -> Self {
        Self::new(
            GitHubErrorKind::PrimaryRateLimitExceeded,
            "Rate limit exceeded",
        )
        .with_status(403)
        .with_rate_limit(info)
    }

    /// Creates a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(GitHubErrorKind::Timeout, message)
    }

    /// Creates a deserialization error.
    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::new(GitHubErrorKind::DeserializationError, message)
    }
}

fn chain_mentions(error: &(dyn std::error::Error + 'static), needles: &[&str]) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(error);
    while let Some(err) = current {
        let text = err.to_string().to_lowercase();
        if needles.iter().any(|n| text.contains(n)) {
            return true;
        }
        current = err.source();
    }
    false
}
