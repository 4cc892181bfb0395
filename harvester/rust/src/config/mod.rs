//! Run settings for collection and dispatch.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::{HarvestError, HarvestResult};

/// Items requested per page.
pub const DEFAULT_PER_PAGE: u32 = 100;

/// Hard ceiling on pages fetched in one contributors pass.
pub const DEFAULT_MAX_PAGES: u32 = 1000;

/// Consecutive empty pages that end a contributors pass.
pub const DEFAULT_EMPTY_PAGE_STREAK: u32 = 3;

/// Consecutive failed pages that end a pass.
pub const DEFAULT_ERROR_STREAK: u32 = 3;

/// Pause before retrying a failed page.
pub const DEFAULT_ERROR_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Concurrent profile lookups per sub-batch.
pub const DEFAULT_PROFILE_BATCH_SIZE: usize = 5;

/// Commits read per run.
pub const DEFAULT_COMMIT_CAP: u32 = 1000;

/// Concurrent sends per dispatch batch.
pub const DEFAULT_BATCH_SIZE: usize = 5;

/// Pause between dispatch batches.
pub const DEFAULT_INTER_BATCH_DELAY: Duration = Duration::from_millis(1000);

/// Collector settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Items per page for both passes.
    pub per_page: u32,
    /// Page ceiling for the contributors pass.
    pub max_pages: u32,
    /// Empty pages in a row that end the contributors pass.
    pub empty_page_streak: u32,
    /// Failed pages in a row that end a pass.
    pub error_streak: u32,
    /// Delay before a failed page is fetched again.
    #[serde(with = "humantime_serde")]
    pub error_retry_delay: Duration,
    /// Profile lookups in flight at once.
    pub profile_batch_size: usize,
    /// Total commits read by the commits pass.
    pub commit_cap: u32,
    /// Run the commits pass after the contributors pass.
    pub include_commits: bool,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            per_page: DEFAULT_PER_PAGE,
            max_pages: DEFAULT_MAX_PAGES,
            empty_page_streak: DEFAULT_EMPTY_PAGE_STREAK,
            error_streak: DEFAULT_ERROR_STREAK,
            error_retry_delay: DEFAULT_ERROR_RETRY_DELAY,
            profile_batch_size: DEFAULT_PROFILE_BATCH_SIZE,
            commit_cap: DEFAULT_COMMIT_CAP,
            include_commits: true,
        }
    }
}

impl CollectorConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> HarvestResult<()> {
        if self.per_page == 0 || self.per_page > DEFAULT_PER_PAGE {
            return Err(HarvestError::invalid_input(format!(
                "per_page must be between 1 and {}",
                DEFAULT_PER_PAGE
            )));
        }
        if self.max_pages == 0 {
            return Err(HarvestError::invalid_input("max_pages must be positive"));
        }
        if self.empty_page_streak == 0 || self.error_streak == 0 {
            return Err(HarvestError::invalid_input("Stop streaks must be positive"));
        }
        if self.profile_batch_size == 0 {
            return Err(HarvestError::invalid_input("profile_batch_size must be positive"));
        }
        Ok(())
    }
}

/// Dispatcher settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Addresses sent concurrently per batch.
    pub batch_size: usize,
    /// Pause between batches, skipped after the last one.
    #[serde(with = "humantime_serde")]
    pub inter_batch_delay: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            inter_batch_delay: DEFAULT_INTER_BATCH_DELAY,
        }
    }
}

impl DispatchConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> HarvestResult<()> {
        if self.batch_size == 0 {
            return Err(HarvestError::invalid_input("batch_size must be positive"));
        }
        Ok(())
    }
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let collector = CollectorConfig::default();
        assert_eq!(collector.per_page, 100);
        assert_eq!(collector.max_pages, 1000);
        assert_eq!(collector.empty_page_streak, 3);
        assert_eq!(collector.error_retry_delay, Duration::from_secs(2));
        assert!(collector.validate().is_ok());

        let dispatch = DispatchConfig::default();
        assert_eq!(dispatch.batch_size, 5);
        assert_eq!(dispatch.inter_batch_delay, Duration::from_millis(1000));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: DispatchConfig =
            serde_json::from_str(r#"{"inter_batch_delay": "250ms"}"#).unwrap();
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.inter_batch_delay, Duration::from_millis(250));

        let config: CollectorConfig = serde_json::from_str(r#"{"commit_cap": 40}"#).unwrap();
        assert_eq!(config.commit_cap, 40);
        assert_eq!(config.max_pages, 1000);
    }

    #[test]
    fn test_validation() {
        let config = DispatchConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = CollectorConfig {
            per_page: 250,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
