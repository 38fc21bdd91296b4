// src/store/mod.rs
pub mod json_file;
pub mod memory;

use std::collections::{BTreeSet, HashSet};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::listing::UserId;

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;

/// Persisted per-user state: what to poll and what was already announced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub user_id: UserId,
    pub query_urls: Vec<String>,
    #[serde(default)]
    pub seen_ids: BTreeSet<String>,
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionRecord {
    pub fn new(user_id: UserId, query_urls: Vec<String>) -> Self {
        Self {
            user_id,
            query_urls,
            seen_ids: BTreeSet::new(),
            updated_at: Utc::now(),
        }
    }

    /// Union `ids` into the seen-set. Returns how many were actually new.
    pub fn add_seen<I, S>(&mut self, ids: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut added = 0;
        for id in ids {
            if self.seen_ids.insert(id.as_ref().to_string()) {
                added += 1;
            }
        }
        if added > 0 {
            self.updated_at = Utc::now();
        }
        added
    }
}

/// Durable per-user subscription + seen-set storage.
///
/// Writes for one user never interleave; different users are independent.
/// `mark_seen` returns `Ok` only after the write is durable.
#[async_trait::async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Seen ids for `user`; empty when there is no record.
    async fn load_seen(&self, user: UserId) -> Result<HashSet<String>>;

    /// Idempotently adds `ids` to the user's seen-set.
    async fn mark_seen(&self, user: UserId, ids: &[String]) -> Result<()>;

    /// Creates the record or replaces its query URLs, keeping seen ids.
    async fn put_subscription(
        &self,
        user: UserId,
        query_urls: Vec<String>,
    ) -> Result<SubscriptionRecord>;

    /// Deletes the record. `Ok(false)` when there was none.
    async fn remove(&self, user: UserId) -> Result<bool>;

    async fn list_all(&self) -> Result<Vec<SubscriptionRecord>>;
}
