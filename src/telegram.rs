// src/telegram.rs
//! Minimal Telegram Bot API client: the calls the bot needs and nothing else.

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::listing::UserId;
use crate::notify::{ChannelError, OutboundChannel};

const API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<u16>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotUser {
    pub id: i64,
    pub username: Option<String>,
}

#[derive(Clone)]
pub struct TelegramClient {
    http: Client,
    base: String,
    timeout: Duration,
}

impl TelegramClient {
    pub fn new(token: &str, timeout: Duration) -> Result<Self> {
        Self::with_base_url(API_BASE, token, timeout)
    }

    /// Points the client at another Bot API server (local bot API, tests).
    pub fn with_base_url(base_url: &str, token: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .build()
            .context("building Telegram HTTP client")?;
        Ok(Self {
            http,
            base: format!("{}/bot{}", base_url.trim_end_matches('/'), token),
            timeout,
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
        timeout: Duration,
    ) -> Result<T, ChannelError> {
        let rsp = self
            .http
            .post(format!("{}/{}", self.base, method))
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::Transport(format!("{method}: {}", e.without_url())))?;
        let status = rsp.status();
        let text = rsp
            .text()
            .await
            .map_err(|e| ChannelError::Transport(format!("{method}: reading body: {}", e.without_url())))?;
        interpret(method, status, &text)
    }

    /// Sanity check for the token; returns the bot account.
    pub async fn get_me(&self) -> Result<BotUser> {
        self.call("getMe", json!({}), self.timeout)
            .await
            .context("getMe")
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(&self, offset: i64, wait_secs: u64) -> Result<Vec<Update>> {
        let body = json!({
            "offset": offset,
            "timeout": wait_secs,
            "allowed_updates": ["message"],
        });
        // The HTTP timeout must outlast the server-side long poll.
        let timeout = Duration::from_secs(wait_secs) + self.timeout;
        self.call("getUpdates", body, timeout)
            .await
            .context("getUpdates")
    }
}

/// Maps a Bot API reply onto the channel error taxonomy.
fn interpret<T: DeserializeOwned>(
    method: &str,
    status: StatusCode,
    body: &str,
) -> Result<T, ChannelError> {
    let parsed = serde_json::from_str::<ApiResponse<T>>(body);

    // Proxies answer 429 with their own (non-JSON) page; still a rate limit.
    let limited = parsed.as_ref().is_ok_and(|p| p.error_code == Some(429));
    if status == StatusCode::TOO_MANY_REQUESTS || limited {
        let retry_after = parsed
            .as_ref()
            .ok()
            .and_then(|p| p.parameters.as_ref())
            .and_then(|p| p.retry_after)
            .unwrap_or(1);
        return Err(ChannelError::RateLimited {
            retry_after: Duration::from_secs(retry_after),
        });
    }

    let parsed = match parsed {
        Ok(p) => p,
        Err(e) => {
            return Err(ChannelError::Transport(format!(
                "{method}: HTTP {status}, unparseable body: {e}"
            )))
        }
    };

    if !parsed.ok {
        let desc = parsed.description.unwrap_or_else(|| format!("HTTP {status}"));
        return Err(if status.is_server_error() {
            ChannelError::Transport(format!("{method}: {desc}"))
        } else {
            ChannelError::Rejected(format!("{method}: {desc}"))
        });
    }

    parsed
        .result
        .ok_or_else(|| ChannelError::Transport(format!("{method}: ok response without result")))
}

#[async_trait::async_trait]
impl OutboundChannel for TelegramClient {
    async fn send_text(&self, user: UserId, text: &str) -> Result<(), ChannelError> {
        let body = json!({
            "chat_id": user.0,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });
        self.call::<serde_json::Value>("sendMessage", body, self.timeout)
            .await
            .map(|_| ())
    }

    async fn send_image(
        &self,
        user: UserId,
        image_url: &str,
        caption: &str,
    ) -> Result<(), ChannelError> {
        let body = json!({
            "chat_id": user.0,
            "photo": image_url,
            "caption": caption,
            "parse_mode": "HTML",
        });
        self.call::<serde_json::Value>("sendPhoto", body, self.timeout)
            .await
            .map(|_| ())
    }
}
