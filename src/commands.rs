// src/commands.rs
//! Chat commands and the replies they produce.

use html_escape::encode_text;

use crate::listing::{SourceTag, UserId};
use crate::registry::{SubscribeError, TaskRegistry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/start` or `/help`.
    Help,
    /// `/stop`: forget the subscription.
    Stop,
    /// `/status`: show tracked links.
    Status,
    /// A message made only of http(s) links.
    Subscribe(Vec<String>),
    Unknown,
}

impl Command {
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if let Some(rest) = text.strip_prefix('/') {
            // "/start@SomeBot arg" -> "start"
            let word = rest
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .split('@')
                .next()
                .unwrap_or_default()
                .to_ascii_lowercase();
            return match word.as_str() {
                "start" | "help" => Command::Help,
                "stop" => Command::Stop,
                "status" => Command::Status,
                _ => Command::Unknown,
            };
        }

        let urls: Vec<String> = text.split_whitespace().map(str::to_string).collect();
        let all_links = !urls.is_empty()
            && urls
                .iter()
                .all(|u| u.starts_with("http://") || u.starts_with("https://"));
        if all_links {
            Command::Subscribe(urls)
        } else {
            Command::Unknown
        }
    }
}

fn supported_sites() -> String {
    SourceTag::ALL
        .iter()
        .map(|t| t.name())
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn help_text() -> String {
    format!(
        "Hi! Send me one or more search links (separated by spaces or new lines) and I will \
         message you about every new apartment listed there.\n\n\
         Supported sites: {}\n\n\
         /status - show what I am tracking\n\
         /stop - stop tracking",
        supported_sites()
    )
}

/// Runs `cmd` for `user` and returns the reply (HTML parse mode).
pub async fn handle_command(registry: &TaskRegistry, user: UserId, cmd: Command) -> String {
    match cmd {
        Command::Help => help_text(),

        Command::Subscribe(urls) => match registry.subscribe(user, urls).await {
            Ok(outcome) => {
                let mut reply = format!(
                    "Got it, tracking {} link(s). Collecting the current listings now; \
                     I will let you know about new ones.",
                    outcome.accepted.len()
                );
                if !outcome.ignored.is_empty() {
                    reply.push_str("\n\nIgnored (unsupported site):");
                    for u in &outcome.ignored {
                        reply.push_str(&format!("\n{}", encode_text(u)));
                    }
                }
                reply
            }
            Err(SubscribeError::NoSupportedUrls { .. }) => format!(
                "None of these links is from a supported site ({}). Your current tracking was not changed.",
                supported_sites()
            ),
            Err(SubscribeError::Store(e)) => {
                tracing::error!(user = %user, error = ?e, "subscribe failed");
                "Could not save your links, please try again later.".to_string()
            }
        },

        Command::Stop => match registry.unsubscribe(user).await {
            Ok(true) => "Stopped. I will not send you any more listings.".to_string(),
            Ok(false) => "You are not tracking anything.".to_string(),
            Err(e) => {
                tracing::error!(user = %user, error = ?e, "unsubscribe failed");
                "Could not stop tracking, please try again later.".to_string()
            }
        },

        Command::Status => match registry.subscription(user).await {
            Some(urls) => {
                let mut reply = String::from("Tracking:");
                for u in urls {
                    reply.push_str(&format!("\n{}", encode_text(&u)));
                }
                reply
            }
            None => "You are not tracking anything. Send me a search link to start.".to_string(),
        },

        Command::Unknown => format!(
            "I did not understand that. Send me search links from {} or /help.",
            supported_sites()
        ),
    }
}
