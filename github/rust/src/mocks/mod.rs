//! Test doubles and JSON fixtures for exercising the client.

use crate::resilience::Sleeper;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Mutex;
use std::time::Duration;

/// Sleeper that returns immediately and records every requested wait.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    waits: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits requested so far, in order.
    pub fn recorded(&self) -> Vec<Duration> {
        self.waits.lock().map(|w| w.clone()).unwrap_or_default()
    }

    /// Sum of all requested waits.
    pub fn total(&self) -> Duration {
        self.recorded().into_iter().sum()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut waits) = self.waits.lock() {
            waits.push(duration);
        }
        tokio::task::yield_now().await;
    }
}

/// Rate-limit headers with a reset `reset_in` from now.
pub fn rate_limit_headers(limit: u32, remaining: u32, reset_in: Duration) -> Vec<(String, String)> {
    let reset = Utc::now().timestamp() + reset_in.as_secs() as i64;
    vec![
        ("x-ratelimit-limit".to_string(), limit.to_string()),
        ("x-ratelimit-remaining".to_string(), remaining.to_string()),
        ("x-ratelimit-reset".to_string(), reset.to_string()),
        ("x-ratelimit-resource".to_string(), "core".to_string()),
    ]
}

/// `Link` header value advertising `next_url` as the next page.
pub fn next_link(next_url: &str) -> String {
    format!("<{}>; rel=\"next\"", next_url)
}

/// A contributor entry with a linked account.
pub fn contributor_json(login: &str, id: u64, contributions: u64) -> Value {
    json!({
        "login": login,
        "id": id,
        "type": "User",
        "contributions": contributions
    })
}

/// An anonymous contributor entry with an inline address.
pub fn anonymous_contributor_json(email: &str, name: &str, contributions: u64) -> Value {
    json!({
        "type": "Anonymous",
        "email": email,
        "name": name,
        "contributions": contributions
    })
}

/// A page of `count` contributors named `{prefix}{n}`, ids from `first_id`.
pub fn contributors_page(prefix: &str, first_id: u64, count: usize) -> Value {
    Value::Array(
        (0..count as u64)
            .map(|i| contributor_json(&format!("{}{}", prefix, first_id + i), first_id + i, 1))
            .collect(),
    )
}

/// A public user profile.
pub fn user_json(login: &str, name: Option<&str>, email: Option<&str>) -> Value {
    json!({
        "login": login,
        "id": 1,
        "type": "User",
        "name": name,
        "email": email
    })
}

/// A commit authored by `email`, optionally linked to `login`.
pub fn commit_json(sha: &str, name: &str, email: &str, login: Option<&str>) -> Value {
    json!({
        "sha": sha,
        "commit": {
            "author": {"name": name, "email": email, "date": "2024-03-01T12:00:00Z"},
            "committer": {"name": name, "email": email, "date": "2024-03-01T12:00:00Z"},
            "message": "update"
        },
        "author": login.map(|l| json!({"login": l, "id": 7, "type": "User"}))
    })
}

/// A page of `count` commits by distinct authors at `domain`.
pub fn commits_page(first: usize, count: usize, domain: &str) -> Value {
    Value::Array(
        (first..first + count)
            .map(|i| {
                commit_json(
                    &format!("{:040x}", i),
                    &format!("Author {}", i),
                    &format!("author{}@{}", i, domain),
                    None,
                )
            })
            .collect(),
    )
}

/// GitHub error body.
pub fn error_json(message: &str) -> Value {
    json!({
        "message": message,
        "documentation_url": "https://docs.github.com/rest"
    })
}
