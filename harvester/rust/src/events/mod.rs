//! Run progress events and the channels they are published on.
//!
//! Publishing is fire-and-forget: a channel never blocks the run and never
//! reports a delivery failure back to it.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::{CollectionSummary, DispatchSummary, Pass};

/// Default buffered events per [`BroadcastChannel`].
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Collection stage named in progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionStage {
    /// A pass is starting.
    PassStarted,
    /// A page has been processed.
    Page,
    /// A pass has ended.
    PassFinished,
    /// Addresses are being written.
    Persisting,
}

/// Running counters carried by collection progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionCounters {
    /// Current pass.
    pub pass: Option<Pass>,
    /// Page just processed, or pages so far.
    pub page: u32,
    /// Entries seen in the current pass.
    pub items_seen: u64,
    /// Distinct plausible addresses so far.
    pub unique_addresses: u64,
    /// Empty pages in a row.
    pub empty_streak: u32,
    /// Failed pages in a row.
    pub error_streak: u32,
}

/// Every event a run can publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HarvestEvent {
    /// Collection progress.
    CollectionProgress {
        /// `owner/name`.
        repository: String,
        /// Stage reached.
        stage: CollectionStage,
        /// Human-readable status.
        message: String,
        /// Counters at this point.
        counters: CollectionCounters,
    },
    /// Collection finished.
    CollectionCompleted {
        /// Final summary.
        summary: CollectionSummary,
    },
    /// Collection aborted.
    CollectionFailed {
        /// `owner/name`.
        repository: String,
        /// Error text.
        error: String,
    },
    /// A dispatch batch finished.
    DispatchProgress {
        /// Human-readable status.
        message: String,
        /// Accepted so far.
        sent: usize,
        /// Failed so far.
        failed: usize,
        /// Addresses in the run.
        total: usize,
        /// Attempted share of `total`.
        percentage: u8,
    },
    /// Dispatch finished.
    DispatchCompleted {
        /// Final summary.
        summary: DispatchSummary,
    },
    /// Dispatch aborted before or during sending.
    DispatchFailed {
        /// Error text.
        error: String,
        /// Operator hint.
        hint: Option<String>,
    },
}

/// Sink for run events.
pub trait NotificationChannel: Send + Sync {
    /// Publishes `event` without waiting for subscribers.
    fn publish(&self, event: HarvestEvent);
}

/// Channel backed by `tokio::sync::broadcast`.
#[derive(Debug, Clone)]
pub struct BroadcastChannel {
    sender: broadcast::Sender<HarvestEvent>,
}

impl BroadcastChannel {
    /// Creates a channel buffering `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Adds a subscriber. It only sees events published afterwards.
    pub fn subscribe(&self) -> broadcast::Receiver<HarvestEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastChannel {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl NotificationChannel for BroadcastChannel {
    fn publish(&self, event: HarvestEvent) {
        // No subscribers is not an error.
        if self.sender.send(event).is_err() {
            tracing::trace!("Event dropped, no subscribers");
        }
    }
}

/// Channel that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullChannel;

impl NotificationChannel for NullChannel {
    fn publish(&self, _event: HarvestEvent) {}
}

/// Drains every event currently buffered in `receiver`.
pub fn drain(receiver: &mut broadcast::Receiver<HarvestEvent>) -> Vec<HarvestEvent> {
    let mut events = Vec::new();
    loop {
        match receiver.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => return events,
        }
    }
}
