//! Repository operations.

use crate::client::GitHubClient;
use crate::errors::GitHubResult;
use crate::pagination::{Page, PaginationParams, MAX_PER_PAGE};
use crate::resilience::RateLimitState;
use crate::types::{CommitSummary, Contributor, RepositoryRef};
use serde::Serialize;

/// Service for repository operations.
pub struct RepositoriesService<'a> {
    client: &'a GitHubClient,
}

impl<'a> RepositoriesService<'a> {
    /// Creates a new repositories service.
    pub fn new(client: &'a GitHubClient) -> Self {
        Self { client }
    }

    /// Lists one page of contributors.
    pub async fn list_contributors(
        &self,
        repo: &RepositoryRef,
        params: &ContributorsParams,
        state: RateLimitState,
    ) -> GitHubResult<Page<Contributor>> {
        let response = self
            .client
            .get(
                &format!("/repos/{}/{}/contributors", repo.owner, repo.name),
                params,
                state,
            )
            .await?;
        Ok(response.into_page(params.page, params.per_page))
    }

    /// Lists one page of commits on the default branch.
    pub async fn list_commits(
        &self,
        repo: &RepositoryRef,
        params: &PaginationParams,
        state: RateLimitState,
    ) -> GitHubResult<Page<CommitSummary>> {
        let response = self
            .client
            .get(
                &format!("/repos/{}/{}/commits", repo.owner, repo.name),
                params,
                state,
            )
            .await?;
        Ok(response.into_page(
            params.page.unwrap_or(1),
            params.per_page.unwrap_or(MAX_PER_PAGE),
        ))
    }
}

/// Parameters for listing contributors.
#[derive(Debug, Clone, Serialize)]
pub struct ContributorsParams {
    /// Page number (1-indexed).
    pub page: u32,
    /// Items per page (max 100).
    pub per_page: u32,
    /// Include contributors without a GitHub account.
    #[serde(serialize_with = "serialize_flag")]
    pub anon: bool,
}

impl ContributorsParams {
    /// Full page including anonymous contributors.
    pub fn page(page: u32) -> Self {
        Self {
            page,
            per_page: MAX_PER_PAGE,
            anon: true,
        }
    }

    /// Sets items per page.
    pub fn per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page.clamp(1, MAX_PER_PAGE);
        self
    }
}

fn serialize_flag<S: serde::Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(if *value { "1" } else { "0" })
}
