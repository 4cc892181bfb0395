//! User operations.

use crate::client::GitHubClient;
use crate::errors::{GitHubError, GitHubResult};
use crate::resilience::RateLimitState;
use crate::types::UserProfile;

/// Service for user operations.
pub struct UsersService<'a> {
    client: &'a GitHubClient,
}

impl<'a> UsersService<'a> {
    /// Creates a new users service.
    pub fn new(client: &'a GitHubClient) -> Self {
        Self { client }
    }

    /// Gets a user's public profile.
    ///
    /// Returns the profile together with the rate-limit state it was served with.
    pub async fn get(
        &self,
        username: &str,
        state: RateLimitState,
    ) -> GitHubResult<(UserProfile, RateLimitState)> {
        if username.is_empty() || username.contains('/') {
            return Err(GitHubError::invalid_parameter(format!(
                "Invalid username {:?}",
                username
            )));
        }

        let response = self
            .client
            .get(
                &format!("/users/{}", username),
                &[] as &[(&str, &str)],
                state,
            )
            .await?;
        Ok((response.payload, response.rate_limit))
    }
}
