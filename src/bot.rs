// src/bot.rs
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::commands::{handle_command, Command};
use crate::listing::UserId;
use crate::notify::OutboundChannel;
use crate::registry::TaskRegistry;
use crate::telegram::TelegramClient;

const LONG_POLL_SECS: u64 = 30;

/// Pulls chat updates and answers commands until `cancel` fires.
///
/// Commands are handled one at a time, in arrival order.
pub async fn run_update_loop(
    client: Arc<TelegramClient>,
    registry: TaskRegistry,
    cancel: CancellationToken,
) {
    let mut offset: i64 = 0;
    info!("listening for chat commands");

    loop {
        let res = tokio::select! {
            _ = cancel.cancelled() => break,
            r = client.get_updates(offset, LONG_POLL_SECS) => r,
        };

        let updates = match res {
            Ok(u) => u,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "getUpdates failed");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                }
                continue;
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);
            let Some(msg) = update.message else { continue };
            let Some(text) = msg.text else { continue };

            let user = UserId(msg.chat.id);
            let cmd = Command::parse(&text);
            debug!(user = %user, ?cmd, "command");

            let reply = handle_command(&registry, user, cmd).await;
            if let Err(e) = client.send_text(user, &reply).await {
                warn!(user = %user, error = %e, "reply not delivered");
            }
        }
    }

    info!("command loop stopped");
}
