//! Values passed between the collector, the dispatcher and the store.

use chrono::{DateTime, Utc};
use repomail_github::ErrorClass;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Harvesting sweep over one data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pass {
    /// Contributor listing plus profile lookups.
    Contributors,
    /// Commit author signatures.
    Commits,
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Contributors => write!(f, "contributors"),
            Self::Commits => write!(f, "commits"),
        }
    }
}

/// An address extracted from the hosting API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateAddress {
    /// Trimmed, lowercased address.
    pub address: String,
    /// Name shown by the source, if any.
    pub display_name: Option<String>,
    /// Account handle on the hosting service.
    pub handle: Option<String>,
    /// `owner/name` of the repository it came from.
    pub origin_repository: String,
    /// Pass that produced it.
    pub pass: Pass,
}

/// Why a pass stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Too many empty pages in a row.
    EmptyStreak,
    /// Too many failed pages in a row.
    ErrorStreak,
    /// Page ceiling reached.
    MaxPages,
    /// A commit page came back short.
    ShortPage,
    /// Commit cap reached.
    CommitCap,
}

/// Counters for one pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassReport {
    /// Which pass.
    pub pass: Pass,
    /// Pages fetched successfully.
    pub pages: u32,
    /// Entries seen across all pages.
    pub items_seen: u64,
    /// Plausible addresses found, before cross-pass dedup.
    pub candidates: u64,
    /// Failed page fetches, retried or not.
    pub page_errors: u32,
    /// Profile lookups that failed and were skipped.
    pub lookup_errors: u32,
    /// Why the pass ended.
    pub stop_reason: StopReason,
}

/// Outcome of persisting one run's addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistenceReport {
    /// New records written.
    pub inserted: u64,
    /// Addresses already stored.
    pub duplicates: u64,
    /// Writes that failed for other reasons.
    pub failed: u64,
}

/// Result of a collection run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSummary {
    /// `owner/name`.
    pub repository: String,
    /// Per-pass counters, in run order.
    pub passes: Vec<PassReport>,
    /// Distinct addresses after merging both passes.
    pub unique_addresses: u64,
    /// Store outcome.
    pub persistence: PersistenceReport,
    /// When the run finished.
    pub collected_at: DateTime<Utc>,
}

impl CollectionSummary {
    /// Report for `pass`, if it ran.
    pub fn pass(&self, pass: Pass) -> Option<&PassReport> {
        self.passes.iter().find(|p| p.pass == pass)
    }
}

/// One dispatch target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    /// Delivery address.
    pub address: String,
    /// Display name for templates.
    pub name: Option<String>,
    /// Handle for templates.
    pub username: Option<String>,
    /// Repository for templates.
    pub repository: Option<String>,
}

impl Recipient {
    /// Recipient with only an address.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
            username: None,
            repository: None,
        }
    }
}

impl From<&CandidateAddress> for Recipient {
    fn from(candidate: &CandidateAddress) -> Self {
        Self {
            address: candidate.address.clone(),
            name: candidate.display_name.clone(),
            username: candidate.handle.clone(),
            repository: Some(candidate.origin_repository.clone()),
        }
    }
}

/// Per-address dispatch result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    /// Target address.
    pub address: String,
    /// Whether the server accepted the message.
    pub succeeded: bool,
    /// Message-ID on success.
    pub message_id: Option<String>,
    /// Failure class on failure.
    pub error_class: Option<ErrorClass>,
    /// Failure text on failure.
    pub error: Option<String>,
}

impl DeliveryOutcome {
    /// Accepted delivery.
    pub fn sent(address: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            succeeded: true,
            message_id: Some(message_id.into()),
            error_class: None,
            error: None,
        }
    }

    /// Failed delivery.
    pub fn failed(address: impl Into<String>, class: ErrorClass, error: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            succeeded: false,
            message_id: None,
            error_class: Some(class),
            error: Some(error.into()),
        }
    }
}

/// Result of a dispatch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSummary {
    /// Accepted deliveries.
    pub sent: Vec<DeliveryOutcome>,
    /// Failed deliveries.
    pub failed: Vec<DeliveryOutcome>,
    /// Addresses in the request.
    pub total: usize,
}

impl DispatchSummary {
    /// Share of `total` attempted so far, 0 to 100.
    pub fn percentage(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        let done = self.sent.len() + self.failed.len();
        ((done * 100) / self.total).min(100) as u8
    }
}

/// Who a dispatch was sent as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderIdentity {
    /// Display name.
    pub name: String,
    /// Sender address.
    pub address: String,
}

impl SenderIdentity {
    /// Creates an identity.
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage_rounds_down() {
        let mut summary = DispatchSummary {
            total: 12,
            ..Default::default()
        };
        for i in 0..5 {
            summary.sent.push(DeliveryOutcome::sent(format!("u{}@corp.dev", i), "id"));
        }
        assert_eq!(summary.percentage(), 41);

        summary.total = 0;
        assert_eq!(summary.percentage(), 100);
    }

    #[test]
    fn test_recipient_from_candidate() {
        let candidate = CandidateAddress {
            address: "jane@corp.dev".into(),
            display_name: Some("Jane".into()),
            handle: Some("jane".into()),
            origin_repository: "acme/widgets".into(),
            pass: Pass::Contributors,
        };
        let recipient = Recipient::from(&candidate);
        assert_eq!(recipient.username.as_deref(), Some("jane"));
        assert_eq!(recipient.repository.as_deref(), Some("acme/widgets"));
    }
}
