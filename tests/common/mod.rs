// tests/common/mod.rs
// Test doubles shared by the integration tests.
#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use url::Url;

use listing_watch_bot::notify::{ChannelError, OutboundChannel};
use listing_watch_bot::poller::{PollSettings, QueryTarget};
use listing_watch_bot::sources::{host_matches, ListingSource};
use listing_watch_bot::store::{MemoryStore, SubscriptionRecord, SubscriptionStore};
use listing_watch_bot::{Listing, SourceTag, UserId};

pub fn listing(id: &str) -> Listing {
    Listing::new(SourceTag::DomRia, id, format!("Flat {id}")).with_price("500 EUR")
}

pub fn settings() -> PollSettings {
    PollSettings {
        poll_interval: Duration::from_secs(60),
        notify_delay: Duration::from_secs(1),
        require_price: true,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Text { user: UserId, text: String },
    Image { user: UserId, url: String, caption: String },
}

impl Sent {
    pub fn body(&self) -> &str {
        match self {
            Sent::Text { text, .. } => text,
            Sent::Image { caption, .. } => caption,
        }
    }
}

/// Records every send attempt; replies come from a script, then `Ok`.
#[derive(Default)]
pub struct RecordingChannel {
    script: Mutex<VecDeque<Result<(), ChannelError>>>,
    attempts: Mutex<Vec<Sent>>,
    delivered: Mutex<Vec<Sent>>,
}

impl RecordingChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn scripted(replies: Vec<Result<(), ChannelError>>) -> Arc<Self> {
        let ch = Self::default();
        *ch.script.lock() = replies.into();
        Arc::new(ch)
    }

    pub fn attempts(&self) -> Vec<Sent> {
        self.attempts.lock().clone()
    }

    pub fn delivered(&self) -> Vec<Sent> {
        self.delivered.lock().clone()
    }

    /// Delivered messages that announce a listing (they carry its link).
    pub fn announced(&self) -> Vec<String> {
        self.delivered
            .lock()
            .iter()
            .filter_map(|s| {
                let body = s.body();
                let start = body.find("<a href=\"")? + "<a href=\"".len();
                let end = body[start..].find('"')? + start;
                Some(body[start..end].to_string())
            })
            .collect()
    }

    pub fn texts(&self) -> Vec<String> {
        self.delivered
            .lock()
            .iter()
            .filter_map(|s| match s {
                Sent::Text { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    fn reply(&self, msg: Sent) -> Result<(), ChannelError> {
        self.attempts.lock().push(msg.clone());
        let r = self.script.lock().pop_front().unwrap_or(Ok(()));
        if r.is_ok() {
            self.delivered.lock().push(msg);
        }
        r
    }
}

#[async_trait::async_trait]
impl OutboundChannel for RecordingChannel {
    async fn send_text(&self, user: UserId, text: &str) -> Result<(), ChannelError> {
        self.reply(Sent::Text {
            user,
            text: text.to_string(),
        })
    }

    async fn send_image(
        &self,
        user: UserId,
        image_url: &str,
        caption: &str,
    ) -> Result<(), ChannelError> {
        self.reply(Sent::Image {
            user,
            url: image_url.to_string(),
            caption: caption.to_string(),
        })
    }
}

/// Source for one fake host. Replies come from a script; the last one repeats.
pub struct ScriptedSource {
    host: String,
    replies: Mutex<VecDeque<Result<Vec<Listing>, String>>>,
    calls: AtomicUsize,
    panics: bool,
}

impl ScriptedSource {
    pub fn new(host: &str, replies: Vec<Result<Vec<Listing>, String>>) -> Arc<Self> {
        Arc::new(Self {
            host: host.to_string(),
            replies: Mutex::new(replies.into()),
            calls: AtomicUsize::new(0),
            panics: false,
        })
    }

    /// Every fetch panics (a scraper bug).
    pub fn panicking(host: &str) -> Arc<Self> {
        Arc::new(Self {
            host: host.to_string(),
            replies: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            panics: true,
        })
    }

    pub fn returning(host: &str, ids: &[&str]) -> Arc<Self> {
        Self::new(host, vec![Ok(ids.iter().map(|id| listing(id)).collect())])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn url(&self) -> String {
        format!("https://{}/search", self.host)
    }

    pub fn target(self: &Arc<Self>) -> QueryTarget {
        QueryTarget {
            url: self.url(),
            source: self.clone(),
        }
    }
}

#[async_trait::async_trait]
impl ListingSource for ScriptedSource {
    fn tag(&self) -> SourceTag {
        SourceTag::DomRia
    }

    fn handles(&self, url: &Url) -> bool {
        host_matches(url, &self.host)
    }

    async fn fetch(&self, _query_url: &str) -> Result<Vec<Listing>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.panics {
            panic!("selector blew up on {}", self.host);
        }
        let mut replies = self.replies.lock();
        let reply = if replies.len() > 1 {
            replies.pop_front()
        } else {
            replies.front().cloned()
        };
        match reply {
            Some(Ok(v)) => Ok(v),
            Some(Err(e)) => Err(anyhow!(e)),
            None => Ok(Vec::new()),
        }
    }
}

/// Memory store whose `mark_seen` fails for chosen ids and whose
/// `load_seen` fails while `fail_load` is set.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub fail_ids: Mutex<HashSet<String>>,
    pub fail_load: AtomicBool,
}

#[async_trait::async_trait]
impl SubscriptionStore for FlakyStore {
    async fn load_seen(&self, user: UserId) -> Result<HashSet<String>> {
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(anyhow!("disk gone"));
        }
        self.inner.load_seen(user).await
    }

    async fn mark_seen(&self, user: UserId, ids: &[String]) -> Result<()> {
        if ids.iter().any(|id| self.fail_ids.lock().contains(id)) {
            return Err(anyhow!("disk full"));
        }
        self.inner.mark_seen(user, ids).await
    }

    async fn put_subscription(
        &self,
        user: UserId,
        query_urls: Vec<String>,
    ) -> Result<SubscriptionRecord> {
        self.inner.put_subscription(user, query_urls).await
    }

    async fn remove(&self, user: UserId) -> Result<bool> {
        self.inner.remove(user).await
    }

    async fn list_all(&self) -> Result<Vec<SubscriptionRecord>> {
        self.inner.list_all().await
    }
}
