use anyhow::Result;
use std::collections::{BTreeMap, HashSet};
use tokio::sync::Mutex;

use super::{SubscriptionRecord, SubscriptionStore};
use crate::listing::UserId;

/// Non-durable store. Same semantics as the file store; used in tests and
/// when `STATE_DIR=:memory:`.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<UserId, SubscriptionRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a record as if it had been persisted by an earlier process.
    pub async fn insert(&self, rec: SubscriptionRecord) {
        self.records.lock().await.insert(rec.user_id, rec);
    }

    pub async fn get(&self, user: UserId) -> Option<SubscriptionRecord> {
        self.records.lock().await.get(&user).cloned()
    }
}

#[async_trait::async_trait]
impl SubscriptionStore for MemoryStore {
    async fn load_seen(&self, user: UserId) -> Result<HashSet<String>> {
        Ok(self
            .records
            .lock()
            .await
            .get(&user)
            .map(|r| r.seen_ids.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn mark_seen(&self, user: UserId, ids: &[String]) -> Result<()> {
        let mut records = self.records.lock().await;
        records
            .entry(user)
            .or_insert_with(|| SubscriptionRecord::new(user, Vec::new()))
            .add_seen(ids);
        Ok(())
    }

    async fn put_subscription(
        &self,
        user: UserId,
        query_urls: Vec<String>,
    ) -> Result<SubscriptionRecord> {
        let mut records = self.records.lock().await;
        let rec = records
            .entry(user)
            .or_insert_with(|| SubscriptionRecord::new(user, Vec::new()));
        rec.query_urls = query_urls;
        rec.updated_at = chrono::Utc::now();
        Ok(rec.clone())
    }

    async fn remove(&self, user: UserId) -> Result<bool> {
        Ok(self.records.lock().await.remove(&user).is_some())
    }

    async fn list_all(&self) -> Result<Vec<SubscriptionRecord>> {
        Ok(self.records.lock().await.values().cloned().collect())
    }
}
