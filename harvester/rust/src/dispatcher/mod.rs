//! Batched bulk dispatch over a verified mail transport.

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use repomail_github::{Sleeper, TokioSleeper};
use repomail_smtp::{MessageTemplate, SendResult, SmtpClient, SmtpResult, TemplateVars};
use std::sync::Arc;

use crate::config::DispatchConfig;
use crate::errors::{smtp_class, HarvestError, HarvestResult};
use crate::events::{HarvestEvent, NotificationChannel};
use crate::store::{
    DeliveryRecord, RecordStore, RepositorySendRecord, StoreErrorKind, StoreResult,
};
use crate::types::{DeliveryOutcome, DispatchSummary, Recipient, SenderIdentity};

/// The two mail operations a dispatch needs.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Checks that the server accepts a session with the configured settings.
    async fn verify(&self) -> SmtpResult<()>;

    /// Sends one message to `to`.
    async fn send_one(
        &self,
        to: &str,
        subject: &str,
        html: &str,
        text: Option<&str>,
    ) -> SmtpResult<SendResult>;
}

#[async_trait]
impl MailTransport for SmtpClient {
    async fn verify(&self) -> SmtpResult<()> {
        SmtpClient::verify(self).await
    }

    async fn send_one(
        &self,
        to: &str,
        subject: &str,
        html: &str,
        text: Option<&str>,
    ) -> SmtpResult<SendResult> {
        SmtpClient::send_one(self, to, subject, html, text).await
    }
}

/// Sends one template to many recipients in throttled batches.
pub struct Dispatcher {
    transport: Arc<dyn MailTransport>,
    channel: Arc<dyn NotificationChannel>,
    sleeper: Arc<dyn Sleeper>,
    config: DispatchConfig,
}

impl Dispatcher {
    /// Creates a dispatcher.
    pub fn new(
        transport: Arc<dyn MailTransport>,
        channel: Arc<dyn NotificationChannel>,
        config: DispatchConfig,
    ) -> HarvestResult<Self> {
        config.validate()?;
        Ok(Self {
            transport,
            channel,
            sleeper: Arc::new(TokioSleeper),
            config,
        })
    }

    /// Replaces the sleeper used between batches.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Verifies the transport once, then sends `template` to every recipient.
    ///
    /// A failed verification aborts before any address is attempted. After
    /// that, a failed send only affects its own address.
    pub async fn send_bulk(
        &self,
        recipients: &[Recipient],
        template: &MessageTemplate,
    ) -> HarvestResult<DispatchSummary> {
        if let Err(e) = self.transport.verify().await {
            let err = HarvestError::verification(e);
            tracing::error!(error = %err, "Dispatch aborted, mail server not verified");
            self.channel.publish(HarvestEvent::DispatchFailed {
                error: err.to_string(),
                hint: err.hint().map(str::to_string),
            });
            return Err(err);
        }

        let mut summary = DispatchSummary {
            total: recipients.len(),
            ..Default::default()
        };
        let batches: Vec<&[Recipient]> = recipients.chunks(self.config.batch_size).collect();
        let batch_count = batches.len();
        tracing::info!(recipients = summary.total, batches = batch_count, "Dispatch started");

        for (index, batch) in batches.into_iter().enumerate() {
            let outcomes = join_all(batch.iter().map(|r| self.deliver(r, template))).await;
            for outcome in outcomes {
                if outcome.succeeded {
                    summary.sent.push(outcome);
                } else {
                    summary.failed.push(outcome);
                }
            }

            let percentage = summary.percentage();
            tracing::debug!(
                batch = index + 1,
                sent = summary.sent.len(),
                failed = summary.failed.len(),
                percentage,
                "Batch finished"
            );
            self.channel.publish(HarvestEvent::DispatchProgress {
                message: format!(
                    "Batch {}/{}: {} sent, {} failed",
                    index + 1,
                    batch_count,
                    summary.sent.len(),
                    summary.failed.len()
                ),
                sent: summary.sent.len(),
                failed: summary.failed.len(),
                total: summary.total,
                percentage,
            });

            if index + 1 < batch_count {
                self.sleeper.sleep(self.config.inter_batch_delay).await;
            }
        }

        tracing::info!(
            sent = summary.sent.len(),
            failed = summary.failed.len(),
            total = summary.total,
            "Dispatch finished"
        );
        self.channel.publish(HarvestEvent::DispatchCompleted {
            summary: summary.clone(),
        });
        Ok(summary)
    }

    async fn deliver(&self, recipient: &Recipient, template: &MessageTemplate) -> DeliveryOutcome {
        let message = template.render(&template_vars(recipient));
        let result = self
            .transport
            .send_one(
                &recipient.address,
                &message.subject,
                &message.html,
                message.text.as_deref(),
            )
            .await;

        match result {
            Ok(receipt) => DeliveryOutcome::sent(&recipient.address, receipt.message_id),
            Err(e) => {
                tracing::warn!(address = %recipient.address, error = %e, "Send failed");
                DeliveryOutcome::failed(&recipient.address, smtp_class(&e), e.to_string())
            }
        }
    }
}

fn template_vars(recipient: &Recipient) -> TemplateVars {
    let mut vars = TemplateVars::for_email(&recipient.address);
    if let Some(name) = &recipient.name {
        vars = vars.name(name);
    }
    if let Some(username) = &recipient.username {
        vars = vars.username(username);
    }
    if let Some(repository) = &recipient.repository {
        vars = vars.repository(repository);
    }
    vars
}

/// Writes the delivery bookkeeping for a finished dispatch.
///
/// Every accepted address gets a history entry. Addresses with no stored
/// contact are skipped. When `repository` is given and something was sent,
/// the repository's send history gets one entry.
pub async fn record_deliveries(
    store: &dyn RecordStore,
    summary: &DispatchSummary,
    repository: Option<&str>,
    sender: &SenderIdentity,
) -> StoreResult<()> {
    let at = Utc::now();
    for outcome in &summary.sent {
        let entry = DeliveryRecord {
            sender: sender.name.clone(),
            sender_address: sender.address.clone(),
            at,
        };
        match store.append_delivery_history(&outcome.address, entry).await {
            Ok(()) => {}
            Err(e) if e.kind() == StoreErrorKind::NotFound => {
                tracing::debug!(address = %outcome.address, "No stored contact, history skipped");
            }
            Err(e) => return Err(e),
        }
    }

    if let Some(name) = repository {
        if !summary.sent.is_empty() {
            store
                .append_repository_send_history(
                    name,
                    RepositorySendRecord {
                        sender: sender.name.clone(),
                        sender_address: sender.address.clone(),
                        count: summary.sent.len(),
                        at,
                    },
                )
                .await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::HarvestErrorKind;
    use crate::events::{drain, BroadcastChannel};
    use crate::store::MemoryStore;
    use crate::types::{CandidateAddress, Pass};
    use pretty_assertions::assert_eq;
    use repomail_github::mocks::RecordingSleeper;
    use repomail_github::ErrorClass;
    use repomail_smtp::{SmtpError, SmtpErrorKind};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    #[derive(Default)]
    struct FakeTransport {
        reject_verify: bool,
        rejected: Vec<String>,
        attempts: Mutex<Vec<(String, String, String)>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl FakeTransport {
        fn attempts(&self) -> Vec<(String, String, String)> {
            self.attempts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MailTransport for FakeTransport {
        async fn verify(&self) -> SmtpResult<()> {
            if self.reject_verify {
                return Err(SmtpError::new(SmtpErrorKind::CredentialsInvalid, "535 bad credentials")
                    .with_smtp_code(535));
            }
            Ok(())
        }

        async fn send_one(
            &self,
            to: &str,
            subject: &str,
            html: &str,
            _text: Option<&str>,
        ) -> SmtpResult<SendResult> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            self.attempts
                .lock()
                .unwrap()
                .push((to.to_string(), subject.to_string(), html.to_string()));
            if self.rejected.iter().any(|r| r == to) {
                return Err(SmtpError::new(SmtpErrorKind::InvalidRecipientAddress, "550 no such user")
                    .with_smtp_code(550));
            }
            Ok(SendResult {
                message_id: format!("<{}@mail.test>", to),
                accepted: vec![to.to_string()],
                response: "250 OK".into(),
                duration: Duration::ZERO,
            })
        }
    }

    fn recipients(n: usize) -> Vec<Recipient> {
        (0..n).map(|i| Recipient::new(format!("dev{}@corp.dev", i))).collect()
    }

    fn template() -> MessageTemplate {
        MessageTemplate::new("Hi {{name}}", "<p>{{email}} from {{repository}}</p>")
    }

    #[tokio::test]
    async fn test_batches_and_delays() {
        let transport = Arc::new(FakeTransport::default());
        let sleeper = Arc::new(RecordingSleeper::new());
        let dispatcher = Dispatcher::new(
            transport.clone(),
            Arc::new(BroadcastChannel::default()),
            DispatchConfig::default(),
        )
        .unwrap()
        .with_sleeper(sleeper.clone());

        let summary = dispatcher.send_bulk(&recipients(12), &template()).await.unwrap();

        assert_eq!(summary.sent.len(), 12);
        assert_eq!(summary.total, 12);
        assert_eq!(transport.attempts().len(), 12);
        assert_eq!(transport.max_in_flight.load(Ordering::SeqCst), 5);
        assert_eq!(sleeper.recorded(), vec![Duration::from_millis(1000); 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_delay_after_last_batch() {
        let dispatcher = Dispatcher::new(
            Arc::new(FakeTransport::default()),
            Arc::new(BroadcastChannel::default()),
            DispatchConfig::default(),
        )
        .unwrap();

        let start = tokio::time::Instant::now();
        dispatcher.send_bulk(&recipients(12), &template()).await.unwrap();

        assert_eq!(start.elapsed(), Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn test_verify_failure_attempts_nothing() {
        let transport = Arc::new(FakeTransport {
            reject_verify: true,
            ..Default::default()
        });
        let channel = Arc::new(BroadcastChannel::default());
        let mut rx = channel.subscribe();
        let dispatcher = Dispatcher::new(transport.clone(), channel, DispatchConfig::default()).unwrap();

        let err = assert_err!(dispatcher.send_bulk(&recipients(7), &template()).await);

        assert_eq!(err.kind(), HarvestErrorKind::Verification);
        assert_eq!(err.class(), ErrorClass::Authentication);
        assert!(transport.attempts().is_empty());
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], HarvestEvent::DispatchFailed { hint: Some(_), .. }));
    }

    #[tokio::test]
    async fn test_failed_address_is_isolated() {
        let transport = Arc::new(FakeTransport {
            rejected: vec!["dev1@corp.dev".into(), "dev6@corp.dev".into()],
            ..Default::default()
        });
        let dispatcher = Dispatcher::new(
            transport.clone(),
            Arc::new(BroadcastChannel::default()),
            DispatchConfig::default(),
        )
        .unwrap()
        .with_sleeper(Arc::new(RecordingSleeper::new()));

        let summary = dispatcher.send_bulk(&recipients(8), &template()).await.unwrap();

        assert_eq!(summary.sent.len(), 6);
        assert_eq!(summary.failed.len(), 2);
        assert_eq!(transport.attempts().len(), 8);
        let failed = &summary.failed[0];
        assert_eq!(failed.address, "dev1@corp.dev");
        assert_eq!(failed.error_class, Some(ErrorClass::Terminal));
    }

    #[tokio::test]
    async fn test_progress_after_each_batch() {
        let channel = Arc::new(BroadcastChannel::default());
        let mut rx = channel.subscribe();
        let dispatcher = Dispatcher::new(
            Arc::new(FakeTransport::default()),
            channel,
            DispatchConfig::default(),
        )
        .unwrap()
        .with_sleeper(Arc::new(RecordingSleeper::new()));

        dispatcher.send_bulk(&recipients(12), &template()).await.unwrap();

        let percentages: Vec<u8> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                HarvestEvent::DispatchProgress { percentage, .. } => Some(percentage),
                _ => None,
            })
            .collect();
        assert_eq!(percentages, vec![41, 83, 100]);
    }

    #[tokio::test]
    async fn test_empty_list_still_verifies() {
        let transport = Arc::new(FakeTransport {
            reject_verify: true,
            ..Default::default()
        });
        let dispatcher = Dispatcher::new(
            transport,
            Arc::new(BroadcastChannel::default()),
            DispatchConfig::default(),
        )
        .unwrap();

        assert_err!(dispatcher.send_bulk(&[], &template()).await);
    }

    #[tokio::test]
    async fn test_template_is_rendered_per_recipient() {
        let transport = Arc::new(FakeTransport::default());
        let dispatcher = Dispatcher::new(
            transport.clone(),
            Arc::new(BroadcastChannel::default()),
            DispatchConfig::default(),
        )
        .unwrap();
        let recipient = Recipient::from(&CandidateAddress {
            address: "jane@corp.dev".into(),
            display_name: Some("Jane".into()),
            handle: Some("jdoe".into()),
            origin_repository: "acme/widgets".into(),
            pass: Pass::Contributors,
        });

        dispatcher.send_bulk(&[recipient], &template()).await.unwrap();

        assert_eq!(
            transport.attempts(),
            vec![(
                "jane@corp.dev".to_string(),
                "Hi Jane".to_string(),
                "<p>jane@corp.dev from acme/widgets</p>".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_record_deliveries() {
        let store = MemoryStore::new();
        for address in ["dev0@corp.dev", "dev1@corp.dev"] {
            store
                .upsert(&CandidateAddress {
                    address: address.into(),
                    display_name: None,
                    handle: None,
                    origin_repository: "acme/widgets".into(),
                    pass: Pass::Commits,
                })
                .await
                .unwrap();
        }
        let summary = DispatchSummary {
            sent: vec![
                DeliveryOutcome::sent("dev0@corp.dev", "<a@mail.test>"),
                DeliveryOutcome::sent("walk-in@corp.dev", "<b@mail.test>"),
            ],
            failed: vec![DeliveryOutcome::failed("dev1@corp.dev", ErrorClass::Terminal, "550")],
            total: 3,
        };
        let sender = SenderIdentity::new("Acme News", "news@acme.dev");

        assert_ok!(record_deliveries(&store, &summary, Some("acme/widgets"), &sender).await);

        let sent = store.find_by_address("dev0@corp.dev").await.unwrap().unwrap();
        assert_eq!(sent.deliveries.len(), 1);
        assert_eq!(sent.deliveries[0].sender_address, "news@acme.dev");
        let failed = store.find_by_address("dev1@corp.dev").await.unwrap().unwrap();
        assert!(failed.deliveries.is_empty());
        let history = store.send_history("acme/widgets").await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].count, 2);
    }
}
