//! Record Store seam and an in-memory implementation.
//!
//! The unique address constraint enforced by [`RecordStore::insert`] is the
//! source of truth for deduplication. [`RecordStore::upsert`] looks the
//! address up first only to skip a doomed write, and treats a
//! [`StoreErrorKind::UniqueViolation`] exactly like a found record.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::types::CandidateAddress;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Store failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// A record with the same unique address already exists.
    UniqueViolation,
    /// No record for the requested key.
    NotFound,
    /// Backend failure.
    Backend,
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UniqueViolation => write!(f, "unique_violation"),
            Self::NotFound => write!(f, "not_found"),
            Self::Backend => write!(f, "backend"),
        }
    }
}

/// Record Store error.
#[derive(Error, Debug)]
#[error("[{kind}] {message}")]
pub struct StoreError {
    kind: StoreErrorKind,
    message: String,
}

impl StoreError {
    /// Creates a new error.
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Gets the error kind.
    pub fn kind(&self) -> StoreErrorKind {
        self.kind
    }

    /// Returns true for a unique-constraint conflict.
    pub fn is_unique_violation(&self) -> bool {
        self.kind == StoreErrorKind::UniqueViolation
    }
}

/// Result of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// A new record was written.
    Inserted,
    /// The address was already stored; nothing changed.
    Duplicate,
}

/// One sent message in an address's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    /// Sender display name.
    pub sender: String,
    /// Sender address.
    pub sender_address: String,
    /// When it was accepted.
    pub at: DateTime<Utc>,
}

/// One dispatch in a repository's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySendRecord {
    /// Sender display name.
    pub sender: String,
    /// Sender address.
    pub sender_address: String,
    /// Messages accepted in that dispatch.
    pub count: usize,
    /// When the dispatch finished.
    pub at: DateTime<Utc>,
}

/// Per-repository collection summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryRollup {
    /// Addresses found in the last run.
    pub total_count: u64,
    /// When the last run finished.
    pub collected_at: DateTime<Utc>,
}

/// A stored contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRecord {
    /// Normalized address, unique.
    pub address: String,
    /// Display name when first seen.
    pub display_name: Option<String>,
    /// Handle when first seen.
    pub handle: Option<String>,
    /// Repository it was first harvested from.
    pub origin_repository: String,
    /// First insert time.
    pub created_at: DateTime<Utc>,
    /// Messages sent to this address.
    pub deliveries: Vec<DeliveryRecord>,
}

impl ContactRecord {
    fn from_candidate(candidate: &CandidateAddress) -> Self {
        Self {
            address: candidate.address.clone(),
            display_name: candidate.display_name.clone(),
            handle: candidate.handle.clone(),
            origin_repository: candidate.origin_repository.clone(),
            created_at: Utc::now(),
            deliveries: Vec::new(),
        }
    }
}

/// Persistence used by collection runs and delivery bookkeeping.
///
/// Implementations must be safe under concurrent writers keyed by address.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Looks up a contact by normalized address.
    async fn find_by_address(&self, address: &str) -> StoreResult<Option<ContactRecord>>;

    /// Writes a new contact, failing with `UniqueViolation` if it exists.
    async fn insert(&self, candidate: &CandidateAddress) -> StoreResult<()>;

    /// Records the latest collection totals for a repository.
    async fn upsert_repository_rollup(&self, name: &str, rollup: RepositoryRollup) -> StoreResult<()>;

    /// Appends to an address's delivery history.
    async fn append_delivery_history(&self, address: &str, entry: DeliveryRecord) -> StoreResult<()>;

    /// Appends to a repository's dispatch history.
    async fn append_repository_send_history(
        &self,
        name: &str,
        entry: RepositorySendRecord,
    ) -> StoreResult<()>;

    /// Inserts `candidate` unless its address is already stored.
    async fn upsert(&self, candidate: &CandidateAddress) -> StoreResult<UpsertOutcome> {
        if self.find_by_address(&candidate.address).await?.is_some() {
            return Ok(UpsertOutcome::Duplicate);
        }
        match self.insert(candidate).await {
            Ok(()) => Ok(UpsertOutcome::Inserted),
            Err(e) if e.is_unique_violation() => Ok(UpsertOutcome::Duplicate),
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    contacts: HashMap<String, ContactRecord>,
    rollups: HashMap<String, RepositoryRollup>,
    send_history: HashMap<String, Vec<RepositorySendRecord>>,
}

/// [`RecordStore`] held in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored contacts.
    pub async fn len(&self) -> usize {
        self.state.read().await.contacts.len()
    }

    /// Returns true if no contact is stored.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Stored addresses, sorted.
    pub async fn addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.state.read().await.contacts.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    /// Latest rollup for `name`.
    pub async fn rollup(&self, name: &str) -> Option<RepositoryRollup> {
        self.state.read().await.rollups.get(name).cloned()
    }

    /// Dispatch history for `name`.
    pub async fn send_history(&self, name: &str) -> Vec<RepositorySendRecord> {
        self.state
            .read()
            .await
            .send_history
            .get(name)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn find_by_address(&self, address: &str) -> StoreResult<Option<ContactRecord>> {
        Ok(self.state.read().await.contacts.get(address).cloned())
    }

    async fn insert(&self, candidate: &CandidateAddress) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if state.contacts.contains_key(&candidate.address) {
            return Err(StoreError::new(
                StoreErrorKind::UniqueViolation,
                format!("{} already stored", candidate.address),
            ));
        }
        state
            .contacts
            .insert(candidate.address.clone(), ContactRecord::from_candidate(candidate));
        Ok(())
    }

    async fn upsert_repository_rollup(&self, name: &str, rollup: RepositoryRollup) -> StoreResult<()> {
        self.state.write().await.rollups.insert(name.to_string(), rollup);
        Ok(())
    }

    async fn append_delivery_history(&self, address: &str, entry: DeliveryRecord) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let contact = state.contacts.get_mut(address).ok_or_else(|| {
            StoreError::new(StoreErrorKind::NotFound, format!("No contact {}", address))
        })?;
        contact.deliveries.push(entry);
        Ok(())
    }

    async fn append_repository_send_history(
        &self,
        name: &str,
        entry: RepositorySendRecord,
    ) -> StoreResult<()> {
        self.state
            .write()
            .await
            .send_history
            .entry(name.to_string())
            .or_default()
            .push(entry);
        Ok(())
    }
}
