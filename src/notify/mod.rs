// src/notify/mod.rs
pub mod render;

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio_util::sync::CancellationToken;

use crate::listing::{Listing, UserId};

/// Failure reported by an outbound chat channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// The platform asked us to wait before sending again.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },
    /// The platform refused the request (bad image URL, blocked bot, ...).
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("transport error: {0}")]
    Transport(String),
}

/// Outbound side of the chat platform.
#[async_trait::async_trait]
pub trait OutboundChannel: Send + Sync {
    async fn send_text(&self, user: UserId, text: &str) -> Result<(), ChannelError>;
    async fn send_image(
        &self,
        user: UserId,
        image_url: &str,
        caption: &str,
    ) -> Result<(), ChannelError>;
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("cancelled while waiting out a rate limit")]
    Cancelled,
}

/// How a listing notification ended up being delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Photo,
    Text,
    /// Photo send failed; the caption went out as a text message.
    TextFallback,
}

#[derive(Clone, Copy)]
enum Outbound<'a> {
    Text(&'a str),
    Image { url: &'a str, caption: &'a str },
}

/// Delivers messages with one rate-limit-aware retry.
///
/// On `RateLimited { retry_after }` the notifier sleeps exactly `retry_after`
/// once and retries once; whatever the retry returns is final.
#[derive(Clone)]
pub struct Notifier {
    channel: Arc<dyn OutboundChannel>,
}

impl Notifier {
    pub fn new(channel: Arc<dyn OutboundChannel>) -> Self {
        Self { channel }
    }

    /// Sends one listing: photo + caption when it has an image, text otherwise.
    /// A failed photo (other than rate limiting) falls back to text.
    pub async fn notify(
        &self,
        user: UserId,
        listing: &Listing,
        cancel: &CancellationToken,
    ) -> Result<Delivery, NotifyError> {
        let caption = render::listing_caption(listing);

        if let Some(url) = listing.image_url.as_deref() {
            let photo = Outbound::Image {
                url,
                caption: &caption,
            };
            match self.send_with_retry(user, photo, cancel).await {
                Ok(()) => {
                    counter!("notifications_sent_total", "kind" => "photo").increment(1);
                    return Ok(Delivery::Photo);
                }
                // Rate limited twice or cancelled: give up on this listing.
                Err(e @ NotifyError::Channel(ChannelError::RateLimited { .. }))
                | Err(e @ NotifyError::Cancelled) => {
                    counter!("notifications_failed_total").increment(1);
                    return Err(e);
                }
                Err(e) => {
                    tracing::debug!(user = %user, image = url, error = %e, "photo send failed, falling back to text");
                    self.send_with_retry(user, Outbound::Text(&caption), cancel)
                        .await
                        .inspect_err(|_| {
                            counter!("notifications_failed_total").increment(1);
                        })?;
                    counter!("notifications_sent_total", "kind" => "text_fallback").increment(1);
                    return Ok(Delivery::TextFallback);
                }
            }
        }

        self.send_with_retry(user, Outbound::Text(&caption), cancel)
            .await
            .inspect_err(|_| {
                counter!("notifications_failed_total").increment(1);
            })?;
        counter!("notifications_sent_total", "kind" => "text").increment(1);
        Ok(Delivery::Text)
    }

    /// Plain text (status lines, error reports) with the same retry policy.
    pub async fn send_text(
        &self,
        user: UserId,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<(), NotifyError> {
        self.send_with_retry(user, Outbound::Text(text), cancel).await
    }

    async fn send_once(&self, user: UserId, msg: Outbound<'_>) -> Result<(), ChannelError> {
        match msg {
            Outbound::Text(text) => self.channel.send_text(user, text).await,
            Outbound::Image { url, caption } => self.channel.send_image(user, url, caption).await,
        }
    }

    async fn send_with_retry(
        &self,
        user: UserId,
        msg: Outbound<'_>,
        cancel: &CancellationToken,
    ) -> Result<(), NotifyError> {
        match self.send_once(user, msg).await {
            Err(ChannelError::RateLimited { retry_after }) => {
                counter!("notifications_rate_limited_total").increment(1);
                tracing::info!(user = %user, wait_secs = retry_after.as_secs_f64(), "rate limited, waiting before retry");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(NotifyError::Cancelled),
                    _ = tokio::time::sleep(retry_after) => {}
                }
                self.send_once(user, msg).await.map_err(NotifyError::from)
            }
            other => other.map_err(NotifyError::from),
        }
    }
}
