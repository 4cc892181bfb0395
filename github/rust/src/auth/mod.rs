//! Bearer-token authentication for the GitHub API.

use crate::errors::{GitHubError, GitHubErrorKind, GitHubResult};
use secrecy::{ExposeSecret, SecretString};

/// Environment variable consulted by [`AuthMethod::from_env`].
pub const TOKEN_ENV_VAR: &str = "GITHUB_TOKEN";

/// Authentication method for GitHub API.
///
/// Every variant is sent as an `Authorization: Bearer` header; the variants
/// only differ in how the token is logged.
#[derive(Debug, Clone)]
pub enum AuthMethod {
    /// Personal Access Token (classic or fine-grained).
    Pat(SecretString),
    /// OAuth access token.
    OAuth(SecretString),
    /// GitHub Actions token (from GITHUB_TOKEN inside a workflow).
    Actions(SecretString),
}

impl AuthMethod {
    /// Creates a PAT authentication method.
    pub fn pat(token: impl Into<String>) -> Self {
        Self::Pat(SecretString::new(token.into()))
    }

    /// Creates an OAuth authentication method.
    pub fn oauth(token: impl Into<String>) -> Self {
        Self::OAuth(SecretString::new(token.into()))
    }

    /// Creates a GitHub Actions token authentication method.
    pub fn actions(token: impl Into<String>) -> Self {
        Self::Actions(SecretString::new(token.into()))
    }

    /// Reads the token from `GITHUB_TOKEN`.
    ///
    /// Inside a GitHub Actions runner (`GITHUB_ACTIONS=true`) the token is
    /// tagged as an Actions token, otherwise it is treated as a PAT.
    pub fn from_env() -> GitHubResult<Self> {
        Self::from_env_var(TOKEN_ENV_VAR)
    }

    /// Reads the token from a custom environment variable.
    pub fn from_env_var(var_name: &str) -> GitHubResult<Self> {
        let token = std::env::var(var_name).map_err(|_| {
            GitHubError::new(
                GitHubErrorKind::MissingAuth,
                format!("Environment variable {} not set", var_name),
            )
        })?;

        if token.trim().is_empty() {
            return Err(GitHubError::new(
                GitHubErrorKind::MissingAuth,
                format!("Environment variable {} is empty", var_name),
            ));
        }

        let in_actions = std::env::var("GITHUB_ACTIONS")
            .map(|v| v == "true")
            .unwrap_or(false);

        Ok(if in_actions {
            Self::actions(token)
        } else {
            Self::pat(token)
        })
    }

    /// Returns the `Authorization` header value.
    pub fn header_value(&self) -> String {
        format!("Bearer {}", self.secret().expose_secret())
    }

    fn secret(&self) -> &SecretString {
        match self {
            Self::Pat(t) | Self::OAuth(t) | Self::Actions(t) => t,
        }
    }

    /// Gets the token prefix for logging.
    pub fn token_prefix(&self) -> &'static str {
        match self {
            Self::Pat(t) => {
                let exposed = t.expose_secret();
                if exposed.starts_with("ghp_") {
                    "ghp_***"
                } else if exposed.starts_with("github_pat_") {
                    "github_pat_***"
                } else {
                    "***"
                }
            }
            Self::OAuth(_) => "gho_***",
            Self::Actions(_) => "ghs_***",
        }
    }
}
