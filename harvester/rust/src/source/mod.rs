//! Hosting API operations the collector needs.

use async_trait::async_trait;
use repomail_github::{
    CommitSummary, Contributor, ContributorsParams, GitHubClient, GitHubResult, Page,
    PaginationParams, RateLimitState, RepositoryRef, UserProfile,
};

/// Paginated contributor, profile and commit lookups.
///
/// Every call takes the current rate-limit state and returns the state the
/// server reported with its response.
#[async_trait]
pub trait RepositorySource: Send + Sync {
    /// One page of contributors, anonymous entries included.
    async fn contributors(
        &self,
        repo: &RepositoryRef,
        page: u32,
        per_page: u32,
        state: RateLimitState,
    ) -> GitHubResult<Page<Contributor>>;

    /// Public profile of `login`.
    async fn user(
        &self,
        login: &str,
        state: RateLimitState,
    ) -> GitHubResult<(UserProfile, RateLimitState)>;

    /// One page of commits.
    async fn commits(
        &self,
        repo: &RepositoryRef,
        page: u32,
        per_page: u32,
        state: RateLimitState,
    ) -> GitHubResult<Page<CommitSummary>>;
}

#[async_trait]
impl RepositorySource for GitHubClient {
    async fn contributors(
        &self,
        repo: &RepositoryRef,
        page: u32,
        per_page: u32,
        state: RateLimitState,
    ) -> GitHubResult<Page<Contributor>> {
        let params = ContributorsParams::page(page).per_page(per_page);
        self.repositories().list_contributors(repo, &params, state).await
    }

    async fn user(
        &self,
        login: &str,
        state: RateLimitState,
    ) -> GitHubResult<(UserProfile, RateLimitState)> {
        self.users().get(login, state).await
    }

    async fn commits(
        &self,
        repo: &RepositoryRef,
        page: u32,
        per_page: u32,
        state: RateLimitState,
    ) -> GitHubResult<Page<CommitSummary>> {
        let params = PaginationParams::new().page(page).per_page(per_page);
        self.repositories().list_commits(repo, &params, state).await
    }
}
