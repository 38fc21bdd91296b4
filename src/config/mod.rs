// src/config/mod.rs
//! Bot configuration: defaults, then an optional TOML/JSON file, then env vars.

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

const ENV_PATH: &str = "BOT_CONFIG_PATH";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BotConfig {
    /// Telegram Bot API token. Usually comes from the environment.
    pub telegram_token: String,
    /// Directory with one JSON record per subscriber; `:memory:` disables persistence.
    pub state_dir: String,
    pub poll_interval_secs: u64,
    /// Pause between two listing notifications.
    pub notify_delay_ms: u64,
    /// Ignore listings that show no price.
    pub require_price: bool,
    /// Upper bound on result pages fetched per query URL.
    pub max_pages: usize,
    pub http_timeout_secs: u64,
    /// e.g. "0.0.0.0:9090"; no HTTP endpoint when unset.
    pub metrics_addr: Option<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            telegram_token: String::new(),
            state_dir: "state/subscriptions".to_string(),
            poll_interval_secs: 300,
            notify_delay_ms: 1_000,
            require_price: true,
            max_pages: 10,
            http_timeout_secs: 30,
            metrics_addr: None,
        }
    }
}

impl BotConfig {
    /// Load using env var + fallbacks:
    /// 1) $BOT_CONFIG_PATH
    /// 2) config/bot.toml
    /// 3) config/bot.json
    /// 4) built-in defaults
    ///
    /// Environment overrides are applied on top, then the result is validated.
    pub fn load() -> Result<Self> {
        let mut cfg = match Self::default_path()? {
            Some(p) => Self::load_from(&p)?,
            None => Self::default(),
        };
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn default_path() -> Result<Option<PathBuf>> {
        if let Ok(p) = std::env::var(ENV_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                bail!("{ENV_PATH} points to non-existent path {}", pb.display());
            }
            return Ok(Some(pb));
        }
        for candidate in ["config/bot.toml", "config/bot.json"] {
            let pb = PathBuf::from(candidate);
            if pb.exists() {
                return Ok(Some(pb));
            }
        }
        Ok(None)
    }

    /// Parse a config file. Format is picked by extension (`.json`, else TOML).
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let is_json = path
            .extension()
            .and_then(|s| s.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_json {
            serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
        } else {
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
        }
    }

    pub fn apply_env(&mut self) -> Result<()> {
        // API_TOKEN is what older deployments used.
        if let Some(token) = env_string("TELEGRAM_BOT_TOKEN").or_else(|| env_string("API_TOKEN")) {
            self.telegram_token = token;
        }
        if let Some(dir) = env_string("STATE_DIR") {
            self.state_dir = dir;
        }
        if let Some(addr) = env_string("METRICS_ADDR") {
            self.metrics_addr = Some(addr);
        }
        if let Some(v) = env_parse("POLL_INTERVAL_SECS")? {
            self.poll_interval_secs = v;
        }
        if let Some(v) = env_parse("NOTIFY_DELAY_MS")? {
            self.notify_delay_ms = v;
        }
        if let Some(v) = env_parse("REQUIRE_PRICE")? {
            self.require_price = v;
        }
        if let Some(v) = env_parse("MAX_PAGES")? {
            self.max_pages = v;
        }
        if let Some(v) = env_parse("HTTP_TIMEOUT_SECS")? {
            self.http_timeout_secs = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.telegram_token.trim().is_empty() {
            bail!("missing Telegram token (set TELEGRAM_BOT_TOKEN)");
        }
        if self.poll_interval_secs == 0 {
            bail!("poll_interval_secs must be > 0");
        }
        if self.max_pages == 0 {
            bail!("max_pages must be > 0");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn notify_delay(&self) -> Duration {
        Duration::from_millis(self.notify_delay_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn in_memory_state(&self) -> bool {
        self.state_dir == ":memory:"
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_string(key) {
        None => Ok(None),
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|e| anyhow!("invalid {key}={v}: {e}")),
    }
}
