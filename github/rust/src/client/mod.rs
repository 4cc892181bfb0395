//! GitHub API client implementation.

use crate::auth::AuthMethod;
use crate::config::{GitHubConfig, GitHubConfigBuilder};
use crate::errors::{GitHubError, GitHubErrorKind, GitHubResult, RateLimitInfo};
use crate::observability::{log_rate_limit, ClientMetrics, RequestTimer};
use crate::pagination::{Page, PaginationLinks};
use crate::resilience::{now_millis, RateLimitState, RetryExecutor, Sleeper, TokioSleeper};
use crate::services::{RepositoriesService, UsersService};
use chrono::DateTime;
use reqwest::{
    header::{HeaderMap, ACCEPT, AUTHORIZATION, USER_AGENT},
    Client, Response, StatusCode,
};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;

/// GitHub error response format.
#[derive(Debug, serde::Deserialize)]
struct GitHubErrorResponse {
    message: String,
    documentation_url: Option<String>,
}

/// Decoded body plus the metadata every caller needs to continue.
#[derive(Debug, Clone)]
pub struct ApiResponse<T> {
    /// Deserialized response body.
    pub payload: T,
    /// Links parsed from the `Link` header.
    pub links: PaginationLinks,
    /// Rate-limit state to pass into the next request.
    pub rate_limit: RateLimitState,
}

impl<T> ApiResponse<Vec<T>> {
    /// Wraps a list response as a [`Page`].
    pub fn into_page(self, page: u32, per_page: u32) -> Page<T> {
        Page {
            items: self.payload,
            links: self.links,
            page,
            per_page,
            rate_limit: self.rate_limit,
        }
    }
}

/// GitHub API client.
///
/// The client holds no mutable rate-limit state of its own. Each call takes
/// the caller's [`RateLimitState`] and returns the state observed in the
/// response.
pub struct GitHubClient {
    http: Client,
    config: GitHubConfig,
    auth: AuthMethod,
    sleeper: Arc<dyn Sleeper>,
    metrics: Arc<ClientMetrics>,
}

impl GitHubClient {
    /// Creates a new GitHub client.
    pub fn new(config: GitHubConfig) -> GitHubResult<Self> {
        config.validate()?;

        let auth = config.auth.clone().ok_or_else(|| {
            GitHubError::new(GitHubErrorKind::MissingAuth, "Authentication required")
        })?;

        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.pool.max_idle_per_host)
            .pool_idle_timeout(config.pool.idle_timeout)
            .build()
            .map_err(|e| {
                GitHubError::new(
                    GitHubErrorKind::InvalidConfiguration,
                    format!("Failed to create HTTP client: {}", e),
                )
            })?;

        tracing::debug!(
            base_url = %config.base_url,
            token = auth.token_prefix(),
            "GitHub client created"
        );

        Ok(Self {
            http,
            config,
            auth,
            sleeper: Arc::new(TokioSleeper),
            metrics: Arc::new(ClientMetrics::new()),
        })
    }

    /// Creates a new client builder.
    pub fn builder() -> GitHubClientBuilder {
        GitHubClientBuilder::new()
    }

    /// Replaces the sleeper used for backoff and rate-limit waits.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Gets the base URL.
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Gets the configuration.
    pub fn config(&self) -> &GitHubConfig {
        &self.config
    }

    /// Gets the client metrics.
    pub fn metrics(&self) -> &ClientMetrics {
        &self.metrics
    }

    // Service accessors

    /// Gets the repositories service.
    pub fn repositories(&self) -> RepositoriesService<'_> {
        RepositoriesService::new(self)
    }

    /// Gets the users service.
    pub fn users(&self) -> UsersService<'_> {
        UsersService::new(self)
    }

    /// Blocks until the reset if the budget is nearly spent.
    ///
    /// Only waits when the reset time is valid. Returns the state to use for
    /// the request.
    pub async fn throttle(&self, state: RateLimitState) -> RateLimitState {
        let limits = &self.config.rate_limit;
        match state.required_wait(now_millis(), limits) {
            Some(wait) => {
                tracing::warn!(
                    remaining = state.remaining,
                    wait_ms = wait.as_millis() as u64,
                    "Rate limit nearly exhausted, waiting for reset"
                );
                self.metrics.record_rate_limit_wait();
                self.sleeper.sleep(wait).await;
                state.after_wait(limits)
            }
            None => {
                if state.is_low(limits) {
                    tracing::info!(
                        remaining = state.remaining,
                        "Rate limit budget low, proceeding without wait"
                    );
                }
                state
            }
        }
    }

    /// Makes a GET request with query parameters.
    pub async fn get<T, P>(
        &self,
        path: &str,
        params: &P,
        state: RateLimitState,
    ) -> GitHubResult<ApiResponse<T>>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        let url = self.build_url(path, params)?;
        let state = self.throttle(state).await;

        let executor = RetryExecutor::new(
            self.config.retry.clone(),
            self.config.rate_limit.clone(),
            self.sleeper.clone(),
        )
        .with_metrics(self.metrics.clone());

        let response = executor.execute(|| self.send_once(&url)).await?;

        let rate_limit = RateLimitState::from_headers(response.headers()).unwrap_or(state);
        log_rate_limit(path, &rate_limit, self.config.rate_limit.low_watermark);
        let links = PaginationLinks::from_headers(response.headers());

        let payload = response.json::<T>().await.map_err(|e| {
            GitHubError::new(
                GitHubErrorKind::DeserializationError,
                format!("Failed to deserialize response: {}", e),
            )
            .with_cause(e)
        })?;

        Ok(ApiResponse {
            payload,
            links,
            rate_limit,
        })
    }

    async fn send_once(&self, url: &str) -> GitHubResult<Response> {
        let timer = RequestTimer::new(self.metrics.clone());

        let result = self
            .http
            .get(url)
            .header(AUTHORIZATION, self.auth.header_value())
            .header(USER_AGENT, &self.config.user_agent)
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", &self.config.api_version)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                timer.failure();
                return Err(GitHubError::from_transport(e));
            }
        };

        if !response.status().is_success() {
            timer.failure();
            let rate_limit = Self::extract_rate_limit(response.headers());
            return Err(Self::handle_error_response(response, rate_limit).await);
        }

        timer.success();
        Ok(response)
    }

    fn build_url<P: Serialize + ?Sized>(&self, path: &str, params: &P) -> GitHubResult<String> {
        let base = self.config.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');

        let query = serde_urlencoded::to_string(params).map_err(|e| {
            GitHubError::new(
                GitHubErrorKind::InvalidParameter,
                format!("Failed to serialize parameters: {}", e),
            )
        })?;

        Ok(if query.is_empty() {
            format!("{}/{}", base, path)
        } else {
            format!("{}/{}?{}", base, path, query)
        })
    }

    fn extract_rate_limit(headers: &HeaderMap) -> Option<RateLimitInfo> {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string())
        };

        let remaining = header("x-ratelimit-remaining").and_then(|v| v.parse().ok());
        let retry_after = header("retry-after").and_then(|v| v.parse().ok());
        if remaining.is_none() && retry_after.is_none() {
            return None;
        }

        let reset_at = header("x-ratelimit-reset")
            .and_then(|v| v.parse::<i64>().ok())
            .and_then(|ts| DateTime::from_timestamp(ts, 0));

        Some(RateLimitInfo {
            limit: header("x-ratelimit-limit")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            remaining: remaining.unwrap_or(0),
            reset_at,
            retry_after,
            resource: header("x-ratelimit-resource"),
        })
    }

    async fn handle_error_response(
        response: Response,
        rate_limit: Option<RateLimitInfo>,
    ) -> GitHubError {
        let status = response.status();
        let request_id = response
            .headers()
            .get("x-github-request-id")
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let quota_exhausted = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim() == "0")
            .unwrap_or(false);

        if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
            if let Some(info) = rate_limit.clone() {
                if quota_exhausted {
                    let mut error =
                        GitHubError::rate_limit_exceeded(info).with_status(status.as_u16());
                    if let Some(id) = request_id {
                        error = error.with_request_id(id);
                    }
                    return error;
                }
                if info.retry_after.is_some() {
                    return GitHubError::new(
                        GitHubErrorKind::SecondaryRateLimitExceeded,
                        "Secondary rate limit exceeded",
                    )
                    .with_status(status.as_u16())
                    .with_rate_limit(info);
                }
            }
        }

        let error_body = response.json::<GitHubErrorResponse>().await.ok();

        let message = error_body
            .as_ref()
            .map(|e| e.message.clone())
            .unwrap_or_else(|| format!("HTTP {} error", status.as_u16()));

        let documentation_url = error_body.and_then(|e| e.documentation_url);

        let mut error =
            GitHubError::from_response(status.as_u16(), message, documentation_url, request_id);

        if let Some(info) = rate_limit {
            error = error.with_rate_limit(info);
        }

        error
    }
}

/// Builder for GitHubClient.
pub struct GitHubClientBuilder {
    config_builder: GitHubConfigBuilder,
    sleeper: Option<Arc<dyn Sleeper>>,
}

impl GitHubClientBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self {
            config_builder: GitHubConfig::builder(),
            sleeper: None,
        }
    }

    /// Sets the base URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config_builder = self.config_builder.base_url(url);
        self
    }

    /// Sets the authentication method.
    pub fn auth(mut self, auth: AuthMethod) -> Self {
        self.config_builder = self.config_builder.auth(auth);
        self
    }

    /// Sets a personal access token.
    pub fn pat(self, token: impl Into<String>) -> Self {
        self.auth(AuthMethod::pat(token))
    }

    /// Sets the timeout.
    pub fn timeout(mut self, timeout: std::time::Duration) -> Self {
        self.config_builder = self.config_builder.timeout(timeout);
        self
    }

    /// Sets the User-Agent.
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.config_builder = self.config_builder.user_agent(ua);
        self
    }

    /// Disables retries.
    pub fn no_retry(mut self) -> Self {
        self.config_builder = self.config_builder.no_retry();
        self
    }

    /// Sets the sleeper used for backoff and rate-limit waits.
    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    /// Builds the client.
    pub fn build(self) -> GitHubResult<GitHubClient> {
        let config = self.config_builder.build()?;
        let client = GitHubClient::new(config)?;
        Ok(match self.sleeper {
            Some(sleeper) => client.with_sleeper(sleeper),
            None => client,
        })
    }
}

impl Default for GitHubClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> GitHubClient {
        GitHubClient::builder().pat("test").build().unwrap()
    }

    #[test]
    fn test_build_url() {
        let client = client();

        assert_eq!(
            client
                .build_url("/repos/owner/repo", &[] as &[(&str, &str)])
                .unwrap(),
            "https://api.github.com/repos/owner/repo"
        );
        assert_eq!(
            client
                .build_url("repos/owner/repo/commits", &[("page", 2), ("per_page", 100)])
                .unwrap(),
            "https://api.github.com/repos/owner/repo/commits?page=2&per_page=100"
        );
    }

    #[test]
    fn test_missing_auth() {
        let err = GitHubClient::new(GitHubConfig::default()).err().unwrap();
        assert_eq!(err.kind(), GitHubErrorKind::MissingAuth);
    }

    #[test]
    fn test_extract_rate_limit() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-limit", "60".parse().unwrap());
        headers.insert("x-ratelimit-remaining", "0".parse().unwrap());
        headers.insert("x-ratelimit-reset", "1700000000".parse().unwrap());

        let info = GitHubClient::extract_rate_limit(&headers).unwrap();
        assert_eq!(info.limit, 60);
        assert_eq!(info.remaining, 0);
        assert_eq!(info.reset_at.map(|r| r.timestamp()), Some(1_700_000_000));
        assert!(GitHubClient::extract_rate_limit(&HeaderMap::new()).is_none());
    }

    #[tokio::test]
    async fn test_throttle_passes_through_healthy_budget() {
        let client = client();
        let state = RateLimitState::default();
        assert_eq!(client.throttle(state).await, state);
        assert_eq!(client.metrics().snapshot().rate_limit_waits, 0);
    }
}
