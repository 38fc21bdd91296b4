// src/store/json_file.rs
use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{SubscriptionRecord, SubscriptionStore};
use crate::listing::UserId;

/// One JSON file per user under `dir` (`<dir>/<user_id>.json`).
///
/// Every write goes to a sibling temp file that is fsynced and renamed over the
/// record, so a crash leaves either the old or the new record, never half of one.
pub struct JsonFileStore {
    dir: PathBuf,
    locks: Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl JsonFileStore {
    /// Opens (and creates if needed) the state directory.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating state dir {}", dir.display()))?;
        Ok(Self {
            dir,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, user: UserId) -> PathBuf {
        self.dir.join(format!("{user}.json"))
    }

    async fn user_lock(&self, user: UserId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(user).or_default().clone()
    }

    /// Drops the user's lock entry unless another caller still holds a handle.
    /// Handles are only handed out under the map lock, so the count is stable here.
    async fn forget_lock(&self, user: UserId, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&user);
        }
    }

    async fn read_record(&self, user: UserId) -> Result<Option<SubscriptionRecord>> {
        let path = self.record_path(user);
        match fs::read_to_string(&path).await {
            Ok(s) => {
                let rec = serde_json::from_str(&s)
                    .with_context(|| format!("parsing {}", path.display()))?;
                Ok(Some(rec))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    async fn write_record(&self, rec: &SubscriptionRecord) -> Result<()> {
        let path = self.record_path(rec.user_id);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(rec).context("serialize subscription")?;

        let mut f = fs::File::create(&tmp)
            .await
            .with_context(|| format!("creating {}", tmp.display()))?;
        f.write_all(&body)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        f.sync_all()
            .await
            .with_context(|| format!("syncing {}", tmp.display()))?;
        drop(f);

        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("renaming {} -> {}", tmp.display(), path.display()))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl SubscriptionStore for JsonFileStore {
    async fn load_seen(&self, user: UserId) -> Result<HashSet<String>> {
        let lock = self.user_lock(user).await;
        let _guard = lock.lock().await;
        Ok(self
            .read_record(user)
            .await?
            .map(|r| r.seen_ids.into_iter().collect())
            .unwrap_or_default())
    }

    async fn mark_seen(&self, user: UserId, ids: &[String]) -> Result<()> {
        let lock = self.user_lock(user).await;
        let _guard = lock.lock().await;

        let mut rec = self
            .read_record(user)
            .await?
            .unwrap_or_else(|| SubscriptionRecord::new(user, Vec::new()));
        if rec.add_seen(ids) == 0 {
            return Ok(());
        }
        self.write_record(&rec).await
    }

    async fn put_subscription(
        &self,
        user: UserId,
        query_urls: Vec<String>,
    ) -> Result<SubscriptionRecord> {
        let lock = self.user_lock(user).await;
        let _guard = lock.lock().await;

        let rec = match self.read_record(user).await? {
            Some(mut rec) => {
                rec.query_urls = query_urls;
                rec.updated_at = chrono::Utc::now();
                rec
            }
            None => SubscriptionRecord::new(user, query_urls),
        };
        self.write_record(&rec).await?;
        Ok(rec)
    }

    async fn remove(&self, user: UserId) -> Result<bool> {
        let lock = self.user_lock(user).await;
        let _guard = lock.lock().await;

        let path = self.record_path(user);
        let removed = match fs::remove_file(&path).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(e).with_context(|| format!("removing {}", path.display())),
        };
        drop(_guard);
        self.forget_lock(user, lock).await;
        Ok(removed)
    }

    async fn list_all(&self) -> Result<Vec<SubscriptionRecord>> {
        let mut out = Vec::new();
        let mut entries = fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("listing {}", self.dir.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let parsed = match fs::read_to_string(&path).await {
                Ok(s) => serde_json::from_str::<SubscriptionRecord>(&s).map_err(anyhow::Error::from),
                Err(e) => Err(e.into()),
            };
            match parsed {
                Ok(rec) => out.push(rec),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable subscription record");
                }
            }
        }
        out.sort_by_key(|r| r.user_id);
        Ok(out)
    }
}
