//! Listing watch bot: binary entrypoint.
//! Loads config, restores stored subscriptions, then serves chat commands until Ctrl-C.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use listing_watch_bot::{
    api, bot, metrics::Metrics, sources::SourceRegistry, telegram::TelegramClient, BotConfig,
    JsonFileStore, MemoryStore, Notifier, PollSettings, SubscriptionStore, TaskRegistry,
};

/// Compact logs by default; `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("listing_watch_bot=info,warn"));

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = BotConfig::load().context("loading configuration")?;

    let metrics = match cfg.metrics_addr {
        Some(_) => Some(Metrics::init()?),
        None => None,
    };

    let store: Arc<dyn SubscriptionStore> = if cfg.in_memory_state() {
        tracing::warn!("STATE_DIR=:memory:, subscriptions will not survive a restart");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(JsonFileStore::open(&cfg.state_dir).await?)
    };

    let sources = SourceRegistry::with_defaults(cfg.http_timeout(), cfg.max_pages)?;
    let telegram = Arc::new(TelegramClient::new(&cfg.telegram_token, cfg.http_timeout())?);
    let me = telegram.get_me().await.context("checking Telegram token")?;
    info!(bot = me.username.as_deref().unwrap_or("?"), id = me.id, "connected to Telegram");

    let registry = TaskRegistry::new(
        sources,
        store,
        Notifier::new(telegram.clone()),
        PollSettings::from(&cfg),
    );
    registry.on_startup().await.context("restoring subscriptions")?;

    if let Some(addr) = cfg.metrics_addr.clone() {
        let app = api::router(api::ApiState {
            registry: registry.clone(),
            metrics: metrics.as_ref().map(|m| m.handle.clone()),
        });
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("binding {addr}"))?;
        info!(%addr, "serving /health and /metrics");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!(error = %e, "metrics server stopped");
            }
        });
    }

    let cancel = CancellationToken::new();
    let commands = tokio::spawn(bot::run_update_loop(
        telegram.clone(),
        registry.clone(),
        cancel.clone(),
    ));

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("shutting down");
    cancel.cancel();
    let _ = commands.await;
    registry.shutdown().await;
    Ok(())
}
