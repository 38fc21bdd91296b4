// src/registry.rs
//! Process-wide owner of the per-user poll tasks.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::gauge;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::listing::{SourceTag, UserId};
use crate::notify::Notifier;
use crate::poller::{PollSettings, PollTask, QueryTarget, TaskState};
use crate::sources::SourceRegistry;
use crate::store::SubscriptionStore;

#[derive(Debug, thiserror::Error)]
pub enum SubscribeError {
    #[error("none of the links belong to a supported site")]
    NoSupportedUrls { ignored: Vec<String> },
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeOutcome {
    pub accepted: Vec<(String, SourceTag)>,
    /// Links no source recognised; not persisted and not polled.
    pub ignored: Vec<String>,
    /// A previous subscription for this user was cancelled.
    pub replaced: bool,
}

struct RunningTask {
    urls: Vec<String>,
    cancel: CancellationToken,
    handle: JoinHandle<TaskState>,
}

struct Inner {
    sources: SourceRegistry,
    store: Arc<dyn SubscriptionStore>,
    notifier: Notifier,
    settings: PollSettings,
    root: CancellationToken,
    tasks: Mutex<HashMap<UserId, RunningTask>>,
}

/// Maps each user to at most one running [`PollTask`].
///
/// Every mutation happens under one async lock that is held until the old
/// task has fully stopped, so a user never has two tasks at once.
#[derive(Clone)]
pub struct TaskRegistry {
    inner: Arc<Inner>,
}

impl TaskRegistry {
    pub fn new(
        sources: SourceRegistry,
        store: Arc<dyn SubscriptionStore>,
        notifier: Notifier,
        settings: PollSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                sources,
                store,
                notifier,
                settings,
                root: CancellationToken::new(),
                tasks: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Replace the user's subscription with `urls` and restart polling.
    pub async fn subscribe(
        &self,
        user: UserId,
        urls: Vec<String>,
    ) -> Result<SubscribeOutcome, SubscribeError> {
        let (targets, ignored) = self.resolve(&urls);
        if targets.is_empty() {
            return Err(SubscribeError::NoSupportedUrls { ignored });
        }
        let accepted: Vec<(String, SourceTag)> = targets
            .iter()
            .map(|t| (t.url.clone(), t.source.tag()))
            .collect();
        let query_urls: Vec<String> = targets.iter().map(|t| t.url.clone()).collect();

        let mut tasks = self.inner.tasks.lock().await;
        // Persist first: on failure the old subscription keeps running untouched.
        self.inner
            .store
            .put_subscription(user, query_urls.clone())
            .await?;

        let replaced = match tasks.remove(&user) {
            Some(old) => {
                stop_task(user, old).await;
                true
            }
            None => false,
        };
        let task = self.spawn_task(user, query_urls, targets);
        tasks.insert(user, task);
        gauge!("poll_tasks_running").set(tasks.len() as f64);

        info!(user = %user, urls = accepted.len(), ignored = ignored.len(), replaced, "subscribed");
        Ok(SubscribeOutcome {
            accepted,
            ignored,
            replaced,
        })
    }

    /// Stop polling and forget the user's record. `Ok(false)` if there was nothing.
    pub async fn unsubscribe(&self, user: UserId) -> anyhow::Result<bool> {
        let mut tasks = self.inner.tasks.lock().await;
        let had_task = match tasks.remove(&user) {
            Some(old) => {
                stop_task(user, old).await;
                true
            }
            None => false,
        };
        gauge!("poll_tasks_running").set(tasks.len() as f64);
        let had_record = self.inner.store.remove(user).await?;
        info!(user = %user, had_task, had_record, "unsubscribed");
        Ok(had_task || had_record)
    }

    /// Start one task per stored subscription. Returns how many were started.
    pub async fn on_startup(&self) -> anyhow::Result<usize> {
        let records = self.inner.store.list_all().await?;
        let mut tasks = self.inner.tasks.lock().await;
        let mut started = 0;

        for rec in records {
            if tasks.contains_key(&rec.user_id) {
                continue;
            }
            let (targets, ignored) = self.resolve(&rec.query_urls);
            if !ignored.is_empty() {
                warn!(user = %rec.user_id, ignored = ?ignored, "stored links no longer match a source");
            }
            if targets.is_empty() {
                continue;
            }
            let urls = targets.iter().map(|t| t.url.clone()).collect();
            let task = self.spawn_task(rec.user_id, urls, targets);
            tasks.insert(rec.user_id, task);
            started += 1;
        }

        gauge!("poll_tasks_running").set(tasks.len() as f64);
        info!(started, "restored subscriptions");
        Ok(started)
    }

    /// URLs the user is currently tracked with, if any.
    pub async fn subscription(&self, user: UserId) -> Option<Vec<String>> {
        let tasks = self.inner.tasks.lock().await;
        tasks
            .get(&user)
            .filter(|t| !t.handle.is_finished())
            .map(|t| t.urls.clone())
    }

    pub async fn is_running(&self, user: UserId) -> bool {
        self.subscription(user).await.is_some()
    }

    pub async fn running(&self) -> usize {
        let tasks = self.inner.tasks.lock().await;
        tasks.values().filter(|t| !t.handle.is_finished()).count()
    }

    pub fn sources(&self) -> &SourceRegistry {
        &self.inner.sources
    }

    /// Cancel every task and wait for all of them.
    pub async fn shutdown(&self) {
        self.inner.root.cancel();
        let mut tasks = self.inner.tasks.lock().await;
        for (user, task) in tasks.drain() {
            stop_task(user, task).await;
        }
        gauge!("poll_tasks_running").set(0.0);
    }

    fn resolve(&self, urls: &[String]) -> (Vec<QueryTarget>, Vec<String>) {
        let mut targets: Vec<QueryTarget> = Vec::new();
        let mut ignored = Vec::new();
        for url in urls {
            let url = url.trim();
            if url.is_empty() || targets.iter().any(|t| t.url == url) {
                continue;
            }
            match self.inner.sources.resolve(url) {
                Some(source) => targets.push(QueryTarget {
                    url: url.to_string(),
                    source,
                }),
                None => ignored.push(url.to_string()),
            }
        }
        (targets, ignored)
    }

    fn spawn_task(&self, user: UserId, urls: Vec<String>, targets: Vec<QueryTarget>) -> RunningTask {
        let cancel = self.inner.root.child_token();
        let task = PollTask::new(
            user,
            targets,
            self.inner.store.clone(),
            self.inner.notifier.clone(),
            self.inner.settings,
            cancel.clone(),
        );

        let notifier = self.inner.notifier.clone();
        let report_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            // Inner spawn so a panic inside the task is observed here.
            match tokio::spawn(task.run()).await {
                Ok(state) => state,
                Err(e) => {
                    error!(user = %user, error = %e, "poll task crashed");
                    let msg = "Tracking stopped because of an internal error. Send the links again to restart.";
                    if let Err(e) = notifier.send_text(user, msg, &report_cancel).await {
                        warn!(user = %user, error = %e, "could not report crashed task");
                    }
                    TaskState::Failed
                }
            }
        });

        RunningTask {
            urls,
            cancel,
            handle,
        }
    }
}

async fn stop_task(user: UserId, task: RunningTask) {
    task.cancel.cancel();
    match task.handle.await {
        Ok(state) => debug!(user = %user, ?state, "poll task stopped"),
        Err(e) => warn!(user = %user, error = %e, "poll task join failed"),
    }
}
