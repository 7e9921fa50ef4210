use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::message::NormalizedMessage;

/// Channel every sink subscribes to unless configured otherwise
pub const DEFAULT_CHANNEL: &str = "__default__";

/// A consumer of published messages (typically a delivery sink)
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Name used in logs and failure reports
    fn name(&self) -> &str;

    async fn handle(&self, message: Arc<NormalizedMessage>) -> Result<()>;
}

/// Named group of subscribers. Membership is by identity.
#[derive(Default)]
struct Channel {
    subscribers: Vec<Arc<dyn Subscriber>>,
}

impl Channel {
    fn position(&self, subscriber: &Arc<dyn Subscriber>) -> Option<usize> {
        self.subscribers
            .iter()
            .position(|existing| same_subscriber(existing, subscriber))
    }
}

fn same_subscriber(a: &Arc<dyn Subscriber>, b: &Arc<dyn Subscriber>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Outcome of one publish call
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    /// Names of subscribers that returned an error or panicked
    pub failed: Vec<String>,
}

impl PublishReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Named-channel publish/subscribe registry
#[derive(Default)]
pub struct Publisher {
    channels: RwLock<HashMap<String, Channel>>,
}

impl Publisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber; registering the same one twice is a no-op.
    pub async fn subscribe(&self, channel_name: &str, subscriber: Arc<dyn Subscriber>) {
        let mut channels = self.channels.write().await;
        let channel = channels.entry(channel_name.to_string()).or_default();
        if channel.position(&subscriber).is_none() {
            info!(
                "Subscribed '{}' to channel '{}'",
                subscriber.name(),
                channel_name
            );
            channel.subscribers.push(subscriber);
        }
    }

    /// Remove a subscriber; removing a non-member is a no-op.
    pub async fn unsubscribe(&self, channel_name: &str, subscriber: &Arc<dyn Subscriber>) {
        let mut channels = self.channels.write().await;
        if let Some(channel) = channels.get_mut(channel_name) {
            if let Some(index) = channel.position(subscriber) {
                channel.subscribers.remove(index);
                info!(
                    "Unsubscribed '{}' from channel '{}'",
                    subscriber.name(),
                    channel_name
                );
            }
        }
    }

    pub async fn subscriber_count(&self, channel_name: &str) -> usize {
        self.channels
            .read()
            .await
            .get(channel_name)
            .map_or(0, |channel| channel.subscribers.len())
    }

    /// Deliver `message` to every current subscriber of the channel.
    ///
    /// Each subscriber runs in its own task; an error or panic in one is
    /// logged and reported without affecting the others. Publishing to an
    /// unknown channel creates it empty.
    pub async fn publish(&self, channel_name: &str, message: NormalizedMessage) -> PublishReport {
        let subscribers = {
            let mut channels = self.channels.write().await;
            channels
                .entry(channel_name.to_string())
                .or_default()
                .subscribers
                .clone()
        };

        if subscribers.is_empty() {
            debug!("No subscribers on channel '{}'", channel_name);
            return PublishReport::default();
        }

        let message = Arc::new(message);
        let tasks: Vec<_> = subscribers
            .into_iter()
            .map(|subscriber| {
                let name = subscriber.name().to_string();
                let message = Arc::clone(&message);
                let handle = tokio::spawn(async move { subscriber.handle(message).await });
                (name, handle)
            })
            .collect();

        let (names, handles): (Vec<String>, Vec<_>) = tasks.into_iter().unzip();
        let results = futures::future::join_all(handles).await;

        let mut report = PublishReport::default();
        for (name, result) in names.into_iter().zip(results) {
            match result {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    error!("Subscriber '{}' failed: {:#}", name, e);
                    report.failed.push(name);
                }
                Err(e) => {
                    error!("Subscriber '{}' task aborted: {}", name, e);
                    report.failed.push(name);
                }
            }
        }
        report
    }
}
