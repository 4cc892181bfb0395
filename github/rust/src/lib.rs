//! # GitHub Harvesting Client
//!
//! A rate-limit aware GitHub REST client used to enumerate repository
//! contributors and commit authors:
//! - Bearer-token authentication (PAT, OAuth, Actions)
//! - Explicit rate-limit state threaded through every call
//! - Retry with exponential backoff for transient network failures
//! - Waits for rate-limit resets under one hour, fails fast otherwise
//! - Permissive `Link` header parsing
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use repomail_github::{
//!     AuthMethod, ContributorsParams, GitHubClient, GitHubConfig, RateLimitState, RepositoryRef,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = GitHubConfig::builder()
//!         .auth(AuthMethod::from_env()?)
//!         .build()?;
//!     let client = GitHubClient::new(config)?;
//!
//!     let repo = RepositoryRef::parse("https://github.com/rust-lang/rust")?;
//!     let page = client
//!         .repositories()
//!         .list_contributors(&repo, &ContributorsParams::page(1), RateLimitState::default())
//!         .await?;
//!
//!     for contributor in &page.items {
//!         println!("{:?} ({} contributions)", contributor.login, contributor.contributions);
//!     }
//!     println!("next page advertised: {}", page.has_next());
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

// Authentication
pub mod auth;

// HTTP client and transport
pub mod client;

// Pagination handling
pub mod pagination;

// API Services
pub mod services;

// Rate limiting and retry
pub mod resilience;

// Observability
pub mod observability;

// Mocks for testing
pub mod mocks;

// Re-exports for convenience
pub use auth::AuthMethod;
pub use client::{ApiResponse, GitHubClient, GitHubClientBuilder};
pub use config::{GitHubConfig, GitHubConfigBuilder, RateLimitConfig, RetryConfig};
pub use errors::{ErrorClass, GitHubError, GitHubErrorKind, GitHubResult, RateLimitInfo};
pub use pagination::{Page, PaginationLinks, PaginationParams};
pub use resilience::{RateLimitState, Sleeper, TokioSleeper};
pub use services::ContributorsParams;
pub use types::*;
