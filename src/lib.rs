// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod api;
pub mod config;
pub mod metrics;

// Change detection core
pub mod delta;
pub mod listing;
pub mod poller;
pub mod registry;
pub mod store;

// Outbound notifications & chat plumbing
pub mod bot;
pub mod commands;
pub mod notify;
pub mod telegram;

// Site scrapers
pub mod sources;

// ---- Re-exports for stable public API ----
pub use crate::config::BotConfig;
pub use crate::listing::{Listing, SourceTag, UserId};
pub use crate::notify::{ChannelError, Notifier, OutboundChannel};
pub use crate::poller::{PollSettings, PollTask, TaskState};
pub use crate::registry::TaskRegistry;
pub use crate::store::{JsonFileStore, MemoryStore, SubscriptionStore};
