// src/poller.rs
//! Per-user poll task: fetch → delta → notify → persist, repeated until cancelled.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use metrics::{counter, histogram};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::BotConfig;
use crate::delta::{compute_delta, filter_priced};
use crate::listing::{Listing, UserId};
use crate::notify::{render, Notifier, NotifyError};
use crate::sources::ListingSource;
use crate::store::SubscriptionStore;

/// A query URL bound to the source that serves it (resolved once, at subscribe time).
#[derive(Clone)]
pub struct QueryTarget {
    pub url: String,
    pub source: Arc<dyn ListingSource>,
}

impl std::fmt::Debug for QueryTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryTarget")
            .field("url", &self.url)
            .field("source", &self.source.tag())
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub poll_interval: Duration,
    pub notify_delay: Duration,
    pub require_price: bool,
}

impl From<&BotConfig> for PollSettings {
    fn from(cfg: &BotConfig) -> Self {
        Self {
            poll_interval: cfg.poll_interval(),
            notify_delay: cfg.notify_delay(),
            require_price: cfg.require_price,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Cycling,
    Cancelled,
    /// Setup failed (seen-set could not be loaded). Terminal.
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Distinct listings found across all sources (after the price filter).
    pub total: usize,
    pub new: usize,
    pub notified: usize,
    pub failed_sends: usize,
    pub source_errors: usize,
    pub persist_errors: usize,
    /// The cycle stopped early because the task was cancelled.
    pub interrupted: bool,
}

pub struct PollTask {
    user: UserId,
    targets: Vec<QueryTarget>,
    store: Arc<dyn SubscriptionStore>,
    notifier: Notifier,
    settings: PollSettings,
    cancel: CancellationToken,
    seen: HashSet<String>,
    state: TaskState,
}

impl PollTask {
    pub fn new(
        user: UserId,
        targets: Vec<QueryTarget>,
        store: Arc<dyn SubscriptionStore>,
        notifier: Notifier,
        settings: PollSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            user,
            targets,
            store,
            notifier,
            settings,
            cancel,
            seen: HashSet::new(),
            state: TaskState::Idle,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Size of the in-memory seen cache (only ids whose durable write succeeded).
    pub fn seen_len(&self) -> usize {
        self.seen.len()
    }

    /// Idle → Cycling: load the durable seen-set.
    pub async fn start(&mut self) -> Result<()> {
        self.seen = self.store.load_seen(self.user).await?;
        self.state = TaskState::Cycling;
        debug!(user = %self.user, seen = self.seen.len(), targets = self.targets.len(), "poll task started");
        Ok(())
    }

    /// Runs until cancelled. Per-cycle failures never end the task.
    pub async fn run(mut self) -> TaskState {
        if let Err(e) = self.start().await {
            error!(user = %self.user, error = %e, "poll task setup failed");
            self.state = TaskState::Failed;
            let msg = format!(
                "Could not start tracking: {}. Send the links again to retry.",
                html_escape::encode_text(&format!("{e:#}"))
            );
            if let Err(e) = self.notifier.send_text(self.user, &msg, &self.cancel).await {
                warn!(user = %self.user, error = %e, "could not report setup failure");
            }
            return self.state;
        }

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let report = self.run_cycle().await;
            info!(
                user = %self.user,
                total = report.total,
                new = report.new,
                notified = report.notified,
                failed = report.failed_sends,
                source_errors = report.source_errors,
                "poll cycle done"
            );

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }

        self.state = TaskState::Cancelled;
        debug!(user = %self.user, "poll task cancelled");
        self.state
    }

    /// One fetch → delta → notify → persist pass.
    pub async fn run_cycle(&mut self) -> CycleReport {
        counter!("poll_cycles_total").increment(1);
        let mut report = CycleReport::default();

        let Some(found) = self.fetch_all(&mut report).await else {
            report.interrupted = true;
            return report;
        };
        let found = filter_priced(found, self.settings.require_price);
        report.total = found.iter().map(|l| l.id.as_str()).collect::<HashSet<_>>().len();

        let fresh = compute_delta(found, &self.seen);
        report.new = fresh.len();
        counter!("listings_found_total").increment(report.total as u64);
        counter!("listings_new_total").increment(report.new as u64);

        self.say(&render::cycle_summary(report.total, report.new)).await;

        let last = fresh.len().saturating_sub(1);
        for (i, listing) in fresh.iter().enumerate() {
            if self.cancel.is_cancelled() {
                report.interrupted = true;
                break;
            }
            match self.notifier.notify(self.user, listing, &self.cancel).await {
                Ok(_) => report.notified += 1,
                Err(NotifyError::Cancelled) => {
                    report.interrupted = true;
                    break;
                }
                Err(e) => {
                    report.failed_sends += 1;
                    warn!(user = %self.user, listing = %listing.id, error = %e, "notification failed");
                }
            }
            // Sent or given up on: either way this listing is done for this user.
            if !self.persist_seen(listing).await {
                report.persist_errors += 1;
            }

            if i < last {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        report.interrupted = true;
                        break;
                    }
                    _ = tokio::time::sleep(self.settings.notify_delay) => {}
                }
            }
        }

        report
    }

    /// Concatenated listings of every target. `None` when cancelled mid-fetch.
    async fn fetch_all(&self, report: &mut CycleReport) -> Option<Vec<Listing>> {
        let mut found = Vec::new();
        for target in &self.targets {
            let tag = target.source.tag();
            let t0 = Instant::now();
            let res = tokio::select! {
                _ = self.cancel.cancelled() => return None,
                r = target.source.fetch(&target.url) => r,
            };
            histogram!("source_fetch_ms", "source" => tag.name())
                .record(t0.elapsed().as_secs_f64() * 1_000.0);

            match res {
                Ok(mut v) => {
                    debug!(user = %self.user, source = tag.name(), url = %target.url, found = v.len(), "source fetched");
                    found.append(&mut v);
                }
                Err(e) => {
                    report.source_errors += 1;
                    counter!("source_errors_total", "source" => tag.name()).increment(1);
                    warn!(user = %self.user, source = tag.name(), url = %target.url, error = ?e, "source error");
                    self.say(&render::source_error(tag.name(), &e)).await;
                }
            }
        }
        Some(found)
    }

    /// Durable write first; the in-memory cache only learns ids that made it to disk.
    async fn persist_seen(&mut self, listing: &Listing) -> bool {
        let ids = [listing.id.clone()];
        match self.store.mark_seen(self.user, &ids).await {
            Ok(()) => {
                self.seen.insert(listing.id.clone());
                true
            }
            Err(e) => {
                counter!("store_errors_total").increment(1);
                error!(user = %self.user, listing = %listing.id, error = ?e, "failed to persist seen listing; it may be announced again");
                false
            }
        }
    }

    /// Best-effort status message.
    async fn say(&self, text: &str) {
        if let Err(e) = self.notifier.send_text(self.user, text, &self.cancel).await {
            warn!(user = %self.user, error = %e, "status message not delivered");
        }
    }
}
