pub mod telegram;

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::builder::{InboundEvent, MessageBuilder};
use crate::bus::{PublishReport, Publisher};
use crate::stats::RelayStats;

/// Source chats the relay listens to.
/// Entries are numeric chat ids or `@usernames`; no entries accepts everything.
#[derive(Debug, Clone, Default)]
pub struct AllowedChats {
    ids: HashSet<i64>,
    usernames: HashSet<String>,
}

impl AllowedChats {
    pub fn from_entries<S: AsRef<str>>(entries: &[S]) -> Self {
        let mut allowed = Self::default();
        for entry in entries {
            let entry = entry.as_ref().trim();
            if entry.is_empty() {
                continue;
            }
            match entry.parse::<i64>() {
                Ok(id) => {
                    allowed.ids.insert(id);
                }
                Err(_) => {
                    allowed
                        .usernames
                        .insert(entry.trim_start_matches('@').to_lowercase());
                }
            }
        }
        allowed
    }

    pub fn is_open(&self) -> bool {
        self.ids.is_empty() && self.usernames.is_empty()
    }

    pub fn allows(&self, chat_id: i64, username: Option<&str>) -> bool {
        if self.is_open() || self.ids.contains(&chat_id) {
            return true;
        }
        username.is_some_and(|name| self.usernames.contains(&name.to_lowercase()))
    }
}

/// Ingestion glue: inbound event -> normalized message -> bus
pub struct Relay {
    builder: MessageBuilder,
    publisher: Arc<Publisher>,
    channel: String,
    allowed: AllowedChats,
    stats: Arc<RelayStats>,
}

impl Relay {
    pub fn new(
        builder: MessageBuilder,
        publisher: Arc<Publisher>,
        channel: &str,
        allowed: AllowedChats,
        stats: Arc<RelayStats>,
    ) -> Self {
        Self {
            builder,
            publisher,
            channel: channel.to_string(),
            allowed,
            stats,
        }
    }

    pub fn allowed(&self) -> &AllowedChats {
        &self.allowed
    }

    pub async fn relay(&self, event: InboundEvent) -> PublishReport {
        info!("New message received from chat {}", event.chat_id);
        self.stats.record_event();

        let message = self.builder.build(&event).await;

        info!("Publishing message to '{}'", self.channel);
        let report = self.publisher.publish(&self.channel, message).await;
        self.stats.record_published();
        if !report.is_clean() {
            warn!(
                "{} subscriber(s) failed: {:?}",
                report.failed.len(),
                report.failed
            );
            self.stats
                .record_subscriber_failures(report.failed.len() as u64);
        }
        report
    }
}
