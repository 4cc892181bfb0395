//! Two-pass address collection for one repository.
//!
//! The contributors pass walks contributor pages and looks up each
//! account's public profile. The hosting API does not emit a `next` link
//! reliably on large result sets, so a short page never ends the pass; only
//! an empty-page streak, an error streak or the page ceiling does. The
//! commits pass reads commit author signatures until a short page or the
//! commit cap.
//!
//! Both passes feed one merge keyed by normalized address in which the
//! first sighting wins, then the merged set is written to the store.

use chrono::Utc;
use futures::future::join_all;
use repomail_github::{
    CommitSummary, Contributor, ErrorClass, GitHubError, RateLimitState, RepositoryRef, Sleeper,
    TokioSleeper,
};
use std::collections::HashSet;
use std::sync::Arc;

use crate::config::CollectorConfig;
use crate::errors::HarvestResult;
use crate::events::{CollectionCounters, CollectionStage, HarvestEvent, NotificationChannel};
use crate::filter::{is_plausible, normalize};
use crate::source::RepositorySource;
use crate::store::{RecordStore, RepositoryRollup, UpsertOutcome};
use crate::types::{
    CandidateAddress, CollectionSummary, Pass, PassReport, PersistenceReport, StopReason,
};

/// Addresses found so far in a run, in first-seen order.
#[derive(Debug, Default)]
struct Harvest {
    seen: HashSet<String>,
    candidates: Vec<CandidateAddress>,
}

impl Harvest {
    /// Adds `candidate` unless its address was already seen.
    fn offer(&mut self, candidate: CandidateAddress) -> bool {
        if self.seen.insert(candidate.address.clone()) {
            self.candidates.push(candidate);
            true
        } else {
            false
        }
    }

    fn len(&self) -> u64 {
        self.candidates.len() as u64
    }
}

/// State owned by one collection run.
struct Run<'a> {
    repo: &'a RepositoryRef,
    name: String,
    rate_limit: RateLimitState,
    harvest: Harvest,
}

/// Counters for the pass in progress.
struct PassState {
    page: u32,
    pages: u32,
    items_seen: u64,
    candidates: u64,
    empty_streak: u32,
    error_streak: u32,
    page_errors: u32,
    lookup_errors: u32,
}

impl PassState {
    fn new() -> Self {
        Self {
            page: 1,
            pages: 0,
            items_seen: 0,
            candidates: 0,
            empty_streak: 0,
            error_streak: 0,
            page_errors: 0,
            lookup_errors: 0,
        }
    }

    fn finish(self, pass: Pass, stop_reason: StopReason) -> PassReport {
        PassReport {
            pass,
            pages: self.pages,
            items_seen: self.items_seen,
            candidates: self.candidates,
            page_errors: self.page_errors,
            lookup_errors: self.lookup_errors,
            stop_reason,
        }
    }
}

/// What to do after a failed page fetch.
enum PageFailure {
    Retry,
    Stop,
}

/// Drives collection runs.
pub struct Collector {
    source: Arc<dyn RepositorySource>,
    store: Arc<dyn RecordStore>,
    channel: Arc<dyn NotificationChannel>,
    sleeper: Arc<dyn Sleeper>,
    config: CollectorConfig,
}

impl Collector {
    /// Creates a collector.
    pub fn new(
        source: Arc<dyn RepositorySource>,
        store: Arc<dyn RecordStore>,
        channel: Arc<dyn NotificationChannel>,
        config: CollectorConfig,
    ) -> HarvestResult<Self> {
        config.validate()?;
        Ok(Self {
            source,
            store,
            channel,
            sleeper: Arc::new(TokioSleeper),
            config,
        })
    }

    /// Replaces the sleeper used between page retries.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Parses `input` as `owner/name` or a repository URL, then collects.
    ///
    /// A malformed identifier fails before any request is made.
    pub async fn collect_by_name(&self, input: &str) -> HarvestResult<CollectionSummary> {
        let repo = RepositoryRef::parse(input)?;
        self.collect(&repo).await
    }

    /// Runs both passes and persists the merged addresses.
    ///
    /// The outcome is also published as a completion or failure event.
    pub async fn collect(&self, repo: &RepositoryRef) -> HarvestResult<CollectionSummary> {
        let name = repo.to_string();
        tracing::info!(repository = %name, "Collection started");

        match self.run(repo, name.clone()).await {
            Ok(summary) => {
                tracing::info!(
                    repository = %name,
                    unique = summary.unique_addresses,
                    inserted = summary.persistence.inserted,
                    duplicates = summary.persistence.duplicates,
                    "Collection finished"
                );
                self.channel.publish(HarvestEvent::CollectionCompleted {
                    summary: summary.clone(),
                });
                Ok(summary)
            }
            Err(e) => {
                tracing::error!(repository = %name, error = %e, "Collection aborted");
                self.channel.publish(HarvestEvent::CollectionFailed {
                    repository: name,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn run(&self, repo: &RepositoryRef, name: String) -> HarvestResult<CollectionSummary> {
        let mut run = Run {
            repo,
            name,
            rate_limit: RateLimitState::default(),
            harvest: Harvest::default(),
        };

        let mut passes = vec![self.contributors_pass(&mut run).await?];
        if self.config.include_commits {
            passes.push(self.commits_pass(&mut run).await?);
        }

        let persistence = self.persist(&run).await;
        let collected_at = Utc::now();
        self.store
            .upsert_repository_rollup(
                &run.name,
                RepositoryRollup {
                    total_count: run.harvest.len(),
                    collected_at,
                },
            )
            .await?;

        Ok(CollectionSummary {
            repository: run.name,
            passes,
            unique_addresses: run.harvest.len(),
            persistence,
            collected_at,
        })
    }

    async fn contributors_pass(&self, run: &mut Run<'_>) -> HarvestResult<PassReport> {
        let pass = Pass::Contributors;
        let per_page = self.config.per_page;
        let mut state = PassState::new();
        self.progress(
            run,
            pass,
            &state,
            CollectionStage::PassStarted,
            "Fetching contributors".into(),
        );

        let stop_reason = loop {
            let page = match self
                .source
                .contributors(run.repo, state.page, per_page, run.rate_limit)
                .await
            {
                Ok(page) => page,
                Err(e) => match self.page_failed(run, pass, &mut state, e).await? {
                    PageFailure::Retry => continue,
                    PageFailure::Stop => break StopReason::ErrorStreak,
                },
            };

            state.error_streak = 0;
            state.pages += 1;
            run.rate_limit = page.rate_limit;
            let count = page.len();
            let has_next = page.has_next();
            state.items_seen += count as u64;

            if count == 0 {
                state.empty_streak += 1;
            } else {
                state.empty_streak = 0;
                if !has_next && count < per_page as usize {
                    tracing::debug!(
                        repository = %run.name,
                        page = state.page,
                        count,
                        "Short page without next link, continuing"
                    );
                }
            }

            self.process_contributors(run, &mut state, page.into_items()).await?;
            self.progress(
                run,
                pass,
                &state,
                CollectionStage::Page,
                format!("Contributors page {} returned {} entries", state.page, count),
            );

            if state.empty_streak >= self.config.empty_page_streak {
                break StopReason::EmptyStreak;
            }
            if state.page >= self.config.max_pages {
                break StopReason::MaxPages;
            }
            state.page += 1;
        };

        Ok(self.finish_pass(run, pass, state, stop_reason))
    }

    /// Extracts addresses from one page, looking profiles up in sub-batches.
    async fn process_contributors(
        &self,
        run: &mut Run<'_>,
        state: &mut PassState,
        contributors: Vec<Contributor>,
    ) -> HarvestResult<()> {
        let mut logins = Vec::new();
        for contributor in contributors {
            if contributor.is_anonymous() {
                if let Some(email) = contributor.email.as_deref() {
                    let name = contributor.name.clone();
                    self.offer(run, state, Pass::Contributors, email, name, None);
                }
            } else if let Some(login) = contributor.login {
                logins.push(login);
            }
        }

        for batch in logins.chunks(self.config.profile_batch_size) {
            let start = run.rate_limit;
            let lookups = batch.iter().map(|login| self.source.user(login, start));
            let results = join_all(lookups).await;

            let mut merged = start;
            for (login, result) in batch.iter().zip(results) {
                match result {
                    Ok((profile, observed)) => {
                        merged = RateLimitState::freshest(merged, observed);
                        if let Some(email) = profile.email.as_deref() {
                            let handle = Some(login.clone());
                            self.offer(run, state, Pass::Contributors, email, profile.name, handle);
                        }
                    }
                    Err(e) if is_fatal(&e) => return Err(e.into()),
                    Err(e) => {
                        state.lookup_errors += 1;
                        tracing::warn!(
                            login = %login,
                            error = %e,
                            "Profile lookup failed, skipping"
                        );
                    }
                }
            }
            run.rate_limit = merged;
        }
        Ok(())
    }

    async fn commits_pass(&self, run: &mut Run<'_>) -> HarvestResult<PassReport> {
        let pass = Pass::Commits;
        let per_page = self.config.per_page;
        let cap = u64::from(self.config.commit_cap);
        let mut state = PassState::new();
        self.progress(
            run,
            pass,
            &state,
            CollectionStage::PassStarted,
            "Fetching commits".into(),
        );

        let stop_reason = loop {
            if state.items_seen >= cap {
                break StopReason::CommitCap;
            }

            let page = match self
                .source
                .commits(run.repo, state.page, per_page, run.rate_limit)
                .await
            {
                Ok(page) => page,
                Err(e) => match self.page_failed(run, pass, &mut state, e).await? {
                    PageFailure::Retry => continue,
                    PageFailure::Stop => break StopReason::ErrorStreak,
                },
            };

            state.error_streak = 0;
            state.pages += 1;
            run.rate_limit = page.rate_limit;
            let count = page.len();

            let room = (cap - state.items_seen) as usize;
            let commits: Vec<CommitSummary> = page.into_items().into_iter().take(room).collect();
            state.items_seen += commits.len() as u64;
            for commit in commits {
                self.offer_commit(run, &mut state, commit);
            }

            self.progress(
                run,
                pass,
                &state,
                CollectionStage::Page,
                format!("Commits page {} returned {} entries", state.page, count),
            );

            if state.items_seen >= cap {
                break StopReason::CommitCap;
            }
            if count < per_page as usize {
                break StopReason::ShortPage;
            }
            state.page += 1;
        };

        Ok(self.finish_pass(run, pass, state, stop_reason))
    }

    fn offer_commit(&self, run: &mut Run<'_>, state: &mut PassState, commit: CommitSummary) {
        let handle = commit.author_login().map(str::to_string);
        if let Some(author) = commit.commit.author {
            if let Some(email) = author.email.as_deref() {
                self.offer(run, state, Pass::Commits, email, author.name, handle);
            }
        }
    }

    /// Filters and merges one address. Later sightings of a known address
    /// are dropped.
    fn offer(
        &self,
        run: &mut Run<'_>,
        state: &mut PassState,
        pass: Pass,
        email: &str,
        display_name: Option<String>,
        handle: Option<String>,
    ) {
        if !is_plausible(email) {
            return;
        }
        state.candidates += 1;
        run.harvest.offer(CandidateAddress {
            address: normalize(email),
            display_name: display_name.filter(|n| !n.trim().is_empty()),
            handle,
            origin_repository: run.name.clone(),
            pass,
        });
    }

    /// Counts a failed page. Rate-limit and credential failures abort the run.
    async fn page_failed(
        &self,
        run: &Run<'_>,
        pass: Pass,
        state: &mut PassState,
        error: GitHubError,
    ) -> HarvestResult<PageFailure> {
        if is_fatal(&error) {
            return Err(error.into());
        }

        state.page_errors += 1;
        state.error_streak += 1;
        tracing::warn!(
            repository = %run.name,
            pass = %pass,
            page = state.page,
            streak = state.error_streak,
            error = %error,
            "Page fetch failed"
        );

        if state.error_streak >= self.config.error_streak {
            return Ok(PageFailure::Stop);
        }
        self.sleeper.sleep(self.config.error_retry_delay).await;
        Ok(PageFailure::Retry)
    }

    fn finish_pass(
        &self,
        run: &Run<'_>,
        pass: Pass,
        state: PassState,
        stop_reason: StopReason,
    ) -> PassReport {
        tracing::info!(
            repository = %run.name,
            pass = %pass,
            pages = state.pages,
            candidates = state.candidates,
            stop_reason = ?stop_reason,
            "Pass finished"
        );
        self.progress(
            run,
            pass,
            &state,
            CollectionStage::PassFinished,
            format!("{} pass finished after {} pages", pass, state.pages),
        );
        state.finish(pass, stop_reason)
    }

    async fn persist(&self, run: &Run<'_>) -> PersistenceReport {
        self.channel.publish(HarvestEvent::CollectionProgress {
            repository: run.name.clone(),
            stage: CollectionStage::Persisting,
            message: format!("Saving {} addresses", run.harvest.len()),
            counters: CollectionCounters {
                unique_addresses: run.harvest.len(),
                ..Default::default()
            },
        });

        let mut report = PersistenceReport::default();
        for candidate in &run.harvest.candidates {
            match self.store.upsert(candidate).await {
                Ok(UpsertOutcome::Inserted) => report.inserted += 1,
                Ok(UpsertOutcome::Duplicate) => report.duplicates += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        address = %candidate.address,
                        error = %e,
                        "Failed to store address"
                    );
                }
            }
        }
        report
    }

    fn progress(
        &self,
        run: &Run<'_>,
        pass: Pass,
        state: &PassState,
        stage: CollectionStage,
        message: String,
    ) {
        self.channel.publish(HarvestEvent::CollectionProgress {
            repository: run.name.clone(),
            stage,
            message,
            counters: CollectionCounters {
                pass: Some(pass),
                page: state.page,
                items_seen: state.items_seen,
                unique_addresses: run.harvest.len(),
                empty_streak: state.empty_streak,
                error_streak: state.error_streak,
            },
        });
    }
}

fn is_fatal(error: &GitHubError) -> bool {
    matches!(error.class(), ErrorClass::RateLimit | ErrorClass::Authentication)
}
