//! Core data types for GitHub API.

use crate::errors::{GitHubError, GitHubResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Owner and name of a repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryRef {
    /// Owning user or organization.
    pub owner: String,
    /// Repository name.
    pub name: String,
}

impl RepositoryRef {
    /// Creates a repository reference without validation.
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Parses `owner/name` or a `github.com` URL.
    ///
    /// Accepts an optional scheme, a `www.` prefix, a trailing slash and a
    /// `.git` suffix. Anything else is rejected before any request is made.
    pub fn parse(input: &str) -> GitHubResult<Self> {
        let trimmed = input.trim();
        let path = if trimmed.contains("://") {
            let url = url::Url::parse(trimmed).map_err(|e| {
                GitHubError::invalid_parameter(format!("Invalid repository URL {:?}: {}", input, e))
            })?;
            match url.host_str() {
                Some("github.com") | Some("www.github.com") => {}
                _ => {
                    return Err(GitHubError::invalid_parameter(format!(
                        "Not a GitHub repository URL: {:?}",
                        input
                    )))
                }
            }
            url.path().to_string()
        } else {
            trimmed
                .strip_prefix("www.github.com/")
                .or_else(|| trimmed.strip_prefix("github.com/"))
                .unwrap_or(trimmed)
                .to_string()
        };

        let path = path.trim_matches('/');
        let path = path.strip_suffix(".git").unwrap_or(path);
        let mut parts = path.split('/');

        match (parts.next(), parts.next(), parts.next()) {
            (Some(owner), Some(name), None) if is_valid_segment(owner) && is_valid_segment(name) => {
                Ok(Self::new(owner, name))
            }
            _ => Err(GitHubError::invalid_parameter(format!(
                "Expected owner/name, got {:?}",
                input
            ))),
        }
    }
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

impl fmt::Display for RepositoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Entry from `GET /repos/{owner}/{repo}/contributors`.
///
/// Anonymous contributors (requested with `anon=true`) have no login or id
/// but may carry an inline email and name.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Contributor {
    /// Username, absent for anonymous entries.
    #[serde(default)]
    pub login: Option<String>,
    /// Account ID, absent for anonymous entries.
    #[serde(default)]
    pub id: Option<u64>,
    /// `User`, `Bot` or `Anonymous`.
    #[serde(rename = "type", default)]
    pub contributor_type: String,
    /// Number of contributions.
    #[serde(default)]
    pub contributions: u64,
    /// Inline email, only present for anonymous entries.
    #[serde(default)]
    pub email: Option<String>,
    /// Inline name, only present for anonymous entries.
    #[serde(default)]
    pub name: Option<String>,
}

impl Contributor {
    /// Returns true for entries without an account.
    pub fn is_anonymous(&self) -> bool {
        self.login.is_none() || self.contributor_type.eq_ignore_ascii_case("anonymous")
    }

    /// Returns true for bot accounts.
    pub fn is_bot(&self) -> bool {
        self.contributor_type.eq_ignore_ascii_case("bot")
    }
}

/// Public profile from `GET /users/{username}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserProfile {
    /// Username (login).
    pub login: String,
    /// User ID.
    #[serde(default)]
    pub id: u64,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Publicly declared email.
    #[serde(default)]
    pub email: Option<String>,
    /// User type (User, Organization, Bot).
    #[serde(rename = "type", default)]
    pub user_type: String,
}

/// Minimal user reference embedded in other resources.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRef {
    /// Username (login).
    pub login: String,
    /// User ID.
    #[serde(default)]
    pub id: u64,
    /// User type.
    #[serde(rename = "type", default)]
    pub user_type: String,
}

/// Git author or committer signature.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GitActor {
    /// Name as recorded in the commit.
    #[serde(default)]
    pub name: Option<String>,
    /// Email as recorded in the commit.
    #[serde(default)]
    pub email: Option<String>,
    /// Signature time.
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
}

/// Git-level commit data.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitDetail {
    /// Commit author.
    #[serde(default)]
    pub author: Option<GitActor>,
    /// Commit committer.
    #[serde(default)]
    pub committer: Option<GitActor>,
    /// Commit message.
    #[serde(default)]
    pub message: String,
}

/// Entry from `GET /repos/{owner}/{repo}/commits`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitSummary {
    /// Commit SHA.
    pub sha: String,
    /// Git-level data.
    #[serde(default)]
    pub commit: CommitDetail,
    /// Linked GitHub account of the author, if the email maps to one.
    #[serde(default)]
    pub author: Option<UserRef>,
}

impl CommitSummary {
    /// Git author signature, if recorded.
    pub fn git_author(&self) -> Option<&GitActor> {
        self.commit.author.as_ref()
    }

    /// Login of the linked author account.
    pub fn author_login(&self) -> Option<&str> {
        self.author.as_ref().map(|a| a.login.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::GitHubErrorKind;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case("octocat/hello-world" ; "short form")]
    #[test_case("https://github.com/octocat/hello-world" ; "https url")]
    #[test_case("https://github.com/octocat/hello-world.git" ; "git suffix")]
    #[test_case("https://www.github.com/octocat/hello-world/" ; "trailing slash")]
    #[test_case("github.com/octocat/hello-world" ; "schemeless")]
    #[test_case("  octocat/hello-world  " ; "whitespace")]
    fn test_parse_repository_ref(input: &str) {
        assert_eq!(
            RepositoryRef::parse(input).unwrap(),
            RepositoryRef::new("octocat", "hello-world")
        );
    }

    #[test_case("" ; "empty")]
    #[test_case("octocat" ; "owner only")]
    #[test_case("a/b/c" ; "too many segments")]
    #[test_case("https://gitlab.com/octocat/hello" ; "other host")]
    #[test_case("octo cat/repo" ; "space")]
    #[test_case("../etc" ; "traversal")]
    fn test_parse_rejects(input: &str) {
        let err = RepositoryRef::parse(input).unwrap_err();
        assert_eq!(err.kind(), GitHubErrorKind::InvalidParameter);
    }

    #[test]
    fn test_anonymous_contributor() {
        let json = r#"{"type":"Anonymous","contributions":4,"email":"jane@corp.dev","name":"Jane"}"#;
        let c: Contributor = serde_json::from_str(json).unwrap();

        assert!(c.is_anonymous());
        assert_eq!(c.email.as_deref(), Some("jane@corp.dev"));
        assert_eq!(c.login, None);
    }

    #[test]
    fn test_commit_without_linked_account() {
        let json = r#"{
            "sha": "abc",
            "commit": {"author": {"name": "Jo", "email": "jo@x.dev", "date": "2024-01-01T00:00:00Z"}, "message": "m"},
            "author": null
        }"#;
        let c: CommitSummary = serde_json::from_str(json).unwrap();

        assert_eq!(c.author_login(), None);
        assert_eq!(c.git_author().and_then(|a| a.email.as_deref()), Some("jo@x.dev"));
    }
}
