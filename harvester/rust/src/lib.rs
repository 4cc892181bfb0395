//! # Contributor Harvest and Dispatch
//!
//! Collects plausible contributor and commit-author addresses from a
//! repository and sends templated mail to them:
//! - Two collection passes with streak-based stop rules
//! - First-seen-wins merge keyed by normalized address
//! - Idempotent persistence through a [`RecordStore`]
//! - Batched, throttled dispatch after a single transport check
//! - Progress events on a [`NotificationChannel`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use repomail_github::{AuthMethod, GitHubClient, GitHubConfig};
//! use repomail_harvester::{
//!     record_deliveries, BroadcastChannel, Collector, CollectorConfig, DispatchConfig, Dispatcher,
//!     MemoryStore, Recipient, RecordStore, SenderIdentity,
//! };
//! use repomail_smtp::{MessageTemplate, SmtpClient, SmtpConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let github = GitHubClient::new(GitHubConfig::builder().auth(AuthMethod::from_env()?).build()?)?;
//!     let store = Arc::new(MemoryStore::new());
//!     let channel = Arc::new(BroadcastChannel::default());
//!
//!     let collector = Collector::new(Arc::new(github), store.clone(), channel.clone(), CollectorConfig::default())?;
//!     let summary = collector.collect_by_name("acme/widgets").await?;
//!     println!("{} addresses collected", summary.unique_addresses);
//!
//!     let mut recipients = Vec::new();
//!     for address in store.addresses().await {
//!         if let Some(contact) = store.find_by_address(&address).await? {
//!             let mut recipient = Recipient::new(contact.address);
//!             recipient.name = contact.display_name;
//!             recipient.repository = Some(contact.origin_repository);
//!             recipients.push(recipient);
//!         }
//!     }
//!
//!     let smtp = SmtpClient::new(SmtpConfig::from_env()?)?;
//!     let dispatcher = Dispatcher::new(Arc::new(smtp), channel, DispatchConfig::default())?;
//!     let template = MessageTemplate::new("Hi {{name}}", "<p>Thanks for working on {{repository}}</p>");
//!     let result = dispatcher.send_bulk(&recipients, &template).await?;
//!
//!     let sender = SenderIdentity::new("Release Team", "team@acme.dev");
//!     record_deliveries(store.as_ref(), &result, Some("acme/widgets"), &sender).await?;
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

// Address plausibility
pub mod filter;

// External collaborators
pub mod events;
pub mod source;
pub mod store;

// Pipeline stages
pub mod collector;
pub mod dispatcher;

// Re-exports for convenience
pub use collector::Collector;
pub use config::{CollectorConfig, DispatchConfig};
pub use dispatcher::{record_deliveries, Dispatcher, MailTransport};
pub use errors::{HarvestError, HarvestErrorKind, HarvestResult};
pub use events::{
    BroadcastChannel, CollectionCounters, CollectionStage, HarvestEvent, NotificationChannel,
    NullChannel,
};
pub use filter::{is_plausible, normalize};
pub use source::RepositorySource;
pub use store::{
    ContactRecord, DeliveryRecord, MemoryStore, RecordStore, RepositoryRollup,
    RepositorySendRecord, StoreError, StoreErrorKind, StoreResult, UpsertOutcome,
};
pub use types::*;
