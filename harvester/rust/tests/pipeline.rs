//! End-to-end collection against a mock API server and dispatch through a
//! scripted SMTP server.

use pretty_assertions::assert_eq;
use repomail_github::mocks::{
    anonymous_contributor_json, commit_json, commits_page, contributors_page, error_json,
    rate_limit_headers, user_json, RecordingSleeper,
};
use repomail_github::GitHubClient;
use repomail_harvester::{
    record_deliveries, BroadcastChannel, Collector, CollectorConfig, DispatchConfig, Dispatcher,
    HarvestEvent, MemoryStore, Pass, Recipient, RecordStore, SenderIdentity, StopReason,
};
use repomail_smtp::mocks::{MockConnector, MockServer as SmtpServer};
use repomail_smtp::{MessageTemplate, RetryConfig, SmtpClient, SmtpConfig};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CONTRIBUTORS: u64 = 60;

/// Profile email for `dev{n}`: every third profile is private and one
/// uses the synthetic noreply domain.
fn profile_email(n: u64) -> Option<String> {
    match n {
        2 => Some("2+dev2@users.noreply.github.com".to_string()),
        n if n % 3 == 0 => None,
        n => Some(format!("Dev{}@Corp.dev", n)),
    }
}

async fn mount_api(server: &MockServer) {
    let mut first_page = match contributors_page("dev", 1, CONTRIBUTORS as usize) {
        Value::Array(items) => items,
        _ => unreachable!(),
    };
    first_page.push(anonymous_contributor_json("walk.in@corp.dev", "Walk In", 1));
    first_page.push(anonymous_contributor_json("noreply@corp.dev", "Bot", 1));

    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/contributors"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(Value::Array(first_page)))
        .with_priority(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/contributors"))
        .respond_with(ResponseTemplate::new(200).set_body_json(Value::Array(vec![])))
        .with_priority(10)
        .expect(3)
        .mount(server)
        .await;

    for n in 1..=CONTRIBUTORS {
        let login = format!("dev{}", n);
        let name = format!("Dev {}", n);
        let email = profile_email(n);
        Mock::given(method("GET"))
            .and(path(format!("/users/{}", login)))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(user_json(&login, Some(&name), email.as_deref())),
            )
            .expect(1)
            .mount(server)
            .await;
    }

    let mut commits = match commits_page(0, 39, "corp.dev") {
        Value::Array(items) => items,
        _ => unreachable!(),
    };
    commits.push(commit_json(&format!("{:040x}", 99), "Someone Else", "dev1@corp.dev", Some("dev1")));

    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/commits"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(Value::Array(commits)))
        .expect(1)
        .mount(server)
        .await;
}

fn github_client(server: &MockServer) -> GitHubClient {
    GitHubClient::builder()
        .base_url(server.uri())
        .pat("ghp_test_token")
        .sleeper(Arc::new(RecordingSleeper::new()))
        .build()
        .expect("client should build")
}

fn smtp_client(server: SmtpServer) -> SmtpClient {
    let config = SmtpConfig::builder()
        .host("smtp.test")
        .port(587)
        .credentials("mailer", "s3cret")
        .from_name("Acme News", "news@acme.dev")
        .retry(RetryConfig {
            jitter: false,
            ..Default::default()
        })
        .build()
        .expect("config should build");
    SmtpClient::with_connector(config, Arc::new(MockConnector::new(server))).expect("client should build")
}

fn expected_addresses() -> Vec<String> {
    let mut expected: Vec<String> = (1..=CONTRIBUTORS)
        .filter_map(profile_email)
        .filter(|e| !e.contains("noreply"))
        .map(|e| e.to_lowercase())
        .collect();
    expected.push("walk.in@corp.dev".to_string());
    expected.extend((0..39).map(|i| format!("author{}@corp.dev", i)));
    expected.sort();
    expected
}

#[tokio::test]
async fn test_collect_persists_filtered_union() {
    let server = MockServer::start().await;
    mount_api(&server).await;

    let store = Arc::new(MemoryStore::new());
    let channel = Arc::new(BroadcastChannel::default());
    let mut events = channel.subscribe();
    let collector = Collector::new(
        Arc::new(github_client(&server)),
        store.clone(),
        channel,
        CollectorConfig::default(),
    )
    .unwrap()
    .with_sleeper(Arc::new(RecordingSleeper::new()));

    let summary = collector.collect_by_name("https://github.com/acme/widgets").await.unwrap();

    let expected = expected_addresses();
    assert_eq!(store.addresses().await, expected);
    assert_eq!(summary.unique_addresses, expected.len() as u64);
    assert_eq!(summary.persistence.inserted, expected.len() as u64);

    let contributors = summary.pass(Pass::Contributors).unwrap();
    assert_eq!(contributors.pages, 4);
    assert_eq!(contributors.stop_reason, StopReason::EmptyStreak);
    let commits = summary.pass(Pass::Commits).unwrap();
    assert_eq!(commits.pages, 1);
    assert_eq!(commits.stop_reason, StopReason::ShortPage);

    let dev1 = store.find_by_address("dev1@corp.dev").await.unwrap().unwrap();
    assert_eq!(dev1.display_name.as_deref(), Some("Dev 1"));
    assert_eq!(
        store.rollup("acme/widgets").await.map(|r| r.total_count),
        Some(expected.len() as u64)
    );

    let mut completed = false;
    while let Ok(event) = events.try_recv() {
        completed |= matches!(event, HarvestEvent::CollectionCompleted { .. });
    }
    assert!(completed);
}

#[tokio::test]
async fn test_dispatch_to_collected_addresses() {
    let api = MockServer::start().await;
    mount_api(&api).await;
    let store = Arc::new(MemoryStore::new());
    let channel = Arc::new(BroadcastChannel::default());
    Collector::new(Arc::new(github_client(&api)), store.clone(), channel.clone(), CollectorConfig::default())
        .unwrap()
        .collect_by_name("acme/widgets")
        .await
        .unwrap();

    let mut recipients = Vec::new();
    for address in store.addresses().await.into_iter().take(12) {
        let contact = store.find_by_address(&address).await.unwrap().unwrap();
        let mut recipient = Recipient::new(contact.address);
        recipient.name = contact.display_name;
        recipient.repository = Some(contact.origin_repository);
        recipients.push(recipient);
    }
    let rejected = recipients[3].address.clone();

    let smtp = SmtpServer::new().rejecting(&rejected);
    let sleeper = Arc::new(RecordingSleeper::new());
    let dispatcher = Dispatcher::new(Arc::new(smtp_client(smtp.clone())), channel, DispatchConfig::default())
        .unwrap()
        .with_sleeper(sleeper.clone());
    let template = MessageTemplate::new("Thanks, {{name}}", "<p>Hello {{email}}, from {{repository}}</p>");

    let summary = dispatcher.send_bulk(&recipients, &template).await.unwrap();

    assert_eq!(summary.total, 12);
    assert_eq!(summary.sent.len(), 11);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].address, rejected);
    assert_eq!(smtp.delivered().len(), 11);
    assert_eq!(sleeper.recorded().len(), 2);

    let sender = SenderIdentity::new("Acme News", "news@acme.dev");
    record_deliveries(store.as_ref(), &summary, Some("acme/widgets"), &sender)
        .await
        .unwrap();

    let history = store.send_history("acme/widgets").await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].count, 11);
    let first = store.find_by_address(&summary.sent[0].address).await.unwrap().unwrap();
    assert_eq!(first.deliveries.len(), 1);
    let failed = store.find_by_address(&rejected).await.unwrap().unwrap();
    assert!(failed.deliveries.is_empty());
}

#[tokio::test]
async fn test_throttled_page_with_quota_left_counts_as_page_error() {
    let server = MockServer::start().await;

    let mut throttled = ResponseTemplate::new(429).set_body_json(error_json("Too many requests"));
    for (name, value) in rate_limit_headers(5000, 4000, Duration::from_secs(2 * 3600)) {
        throttled = throttled.insert_header(name.as_str(), value.as_str());
    }
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/contributors"))
        .respond_with(throttled)
        .up_to_n_times(1)
        .expect(1)
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/contributors"))
        .respond_with(ResponseTemplate::new(200).set_body_json(Value::Array(vec![])))
        .with_priority(10)
        .expect(3)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/commits"))
        .respond_with(ResponseTemplate::new(200).set_body_json(Value::Array(vec![])))
        .expect(1)
        .mount(&server)
        .await;

    let sleeper = Arc::new(RecordingSleeper::new());
    let collector = Collector::new(
        Arc::new(github_client(&server)),
        Arc::new(MemoryStore::new()),
        Arc::new(BroadcastChannel::default()),
        CollectorConfig::default(),
    )
    .unwrap()
    .with_sleeper(sleeper.clone());

    let summary = collector.collect_by_name("acme/widgets").await.unwrap();

    let contributors = summary.pass(Pass::Contributors).unwrap();
    assert_eq!(contributors.page_errors, 1);
    assert_eq!(contributors.stop_reason, StopReason::EmptyStreak);
    assert_eq!(sleeper.recorded().len(), 1);
    assert_eq!(summary.unique_addresses, 0);
}
