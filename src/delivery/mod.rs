pub mod bale;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::bus::Subscriber;
use crate::codec;
use crate::config::{DeliveryConfig, RetryConfig, RetryStrategy};
use crate::message::{MediaFile, NormalizedMessage};
use crate::packager::Packager;
use crate::stats::RelayStats;

/// Outbound side of the destination platform
#[async_trait]
pub trait Destination: Send + Sync {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()>;

    async fn send_document(&self, chat_id: i64, file_name: &str, content: Vec<u8>) -> Result<()>;
}

/// How failed sends are retried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Log and move on
    #[default]
    None,
    /// Up to `attempts` tries in total, `delay` apart
    Fixed { attempts: u32, delay: Duration },
}

impl RetryPolicy {
    fn attempts(&self) -> u32 {
        match self {
            RetryPolicy::None => 1,
            RetryPolicy::Fixed { attempts, .. } => (*attempts).max(1),
        }
    }

    fn delay(&self) -> Duration {
        match self {
            RetryPolicy::None => Duration::ZERO,
            RetryPolicy::Fixed { delay, .. } => *delay,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        match config.strategy {
            RetryStrategy::None => RetryPolicy::None,
            RetryStrategy::Fixed => RetryPolicy::Fixed {
                attempts: config.attempts,
                delay: Duration::from_millis(config.delay_ms),
            },
        }
    }
}

/// Result of sending one message's chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeliveryOutcome {
    pub sent: usize,
    pub failed: usize,
}

/// Bus subscriber that packages messages and forwards them to one chat
pub struct DeliverySink {
    name: String,
    destination: Arc<dyn Destination>,
    packager: Packager,
    chat_id: i64,
    max_file_size: u64,
    send_timeout: Duration,
    retry: RetryPolicy,
    obfuscate_username: bool,
    stats: Arc<RelayStats>,
}

impl DeliverySink {
    pub fn new(
        name: &str,
        destination: Arc<dyn Destination>,
        packager: Packager,
        chat_id: i64,
        config: &DeliveryConfig,
        stats: Arc<RelayStats>,
    ) -> Self {
        Self {
            name: name.to_string(),
            destination,
            packager,
            chat_id,
            max_file_size: config.max_file_size,
            send_timeout: Duration::from_secs(config.send_timeout_secs),
            retry: RetryPolicy::from(&config.retry),
            obfuscate_username: config.obfuscate_username,
            stats,
        }
    }

    /// Send chunks in order. A failed chunk is logged and skipped.
    pub async fn deliver_text(&self, chunks: &[String]) -> DeliveryOutcome {
        let mut outcome = DeliveryOutcome::default();
        let total = chunks.len();

        for (i, chunk) in chunks.iter().enumerate() {
            info!("Sending part {} of {}", i + 1, total);
            let result = self
                .with_retry(|| self.destination.send_text(self.chat_id, chunk))
                .await;
            match result {
                Ok(()) => outcome.sent += 1,
                Err(e) => {
                    warn!("Could not send part {} of {}: {:#}", i + 1, total, e);
                    outcome.failed += 1;
                }
            }
        }

        self.stats
            .record_chunks(outcome.sent as u64, outcome.failed as u64);
        outcome
    }

    /// Upload a file. Files above the size limit are skipped.
    pub async fn deliver_file(&self, file: &MediaFile) -> Result<()> {
        if file.size_in_bytes > self.max_file_size {
            let ratio = file.size_in_bytes as f64 / self.max_file_size as f64;
            warn!(
                "File '{}' is {:.1}x the {} byte limit, not sending it",
                file.name, ratio, self.max_file_size
            );
            self.stats.record_file_dropped();
            return Ok(());
        }

        info!("Sending file '{}' ({} bytes)...", file.name, file.size_in_bytes);
        let result = self
            .with_retry(|| {
                self.destination
                    .send_document(self.chat_id, &file.name, file.content.clone())
            })
            .await
            .with_context(|| format!("Failed to send file '{}'", file.name));

        match &result {
            Ok(()) => {
                info!("File '{}' sent successfully", file.name);
                self.stats.record_file_sent();
            }
            Err(_) => self.stats.record_file_dropped(),
        }
        result
    }

    async fn with_retry<F, Fut>(&self, mut send: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let attempts = self.retry.attempts();
        let mut last_error = None;

        for attempt in 1..=attempts {
            match tokio::time::timeout(self.send_timeout, send()).await {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e)) => last_error = Some(e),
                Err(_) => {
                    last_error = Some(anyhow::anyhow!(
                        "timed out after {:?}",
                        self.send_timeout
                    ))
                }
            }
            if attempt < attempts {
                warn!("Send attempt {} of {} failed, retrying", attempt, attempts);
                tokio::time::sleep(self.retry.delay()).await;
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("send was never attempted")))
    }
}

#[async_trait]
impl Subscriber for DeliverySink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, message: Arc<NormalizedMessage>) -> Result<()> {
        info!("Serializing and encrypting message from {}", message.source_channel_id);
        let packaged = if self.obfuscate_username {
            let mut wire = message.to_wire();
            wire.username = wire.username.as_deref().map(codec::encode);
            self.packager.package_wire(&wire)
        } else {
            self.packager.package(&message)
        };
        let chunks = packaged.context("Failed to package message")?;

        let outcome = self.deliver_text(&chunks).await;
        if outcome.failed > 0 {
            warn!(
                "{} of {} parts could not be delivered",
                outcome.failed,
                chunks.len()
            );
        }

        for (kind, attachment) in [("document", &message.file), ("photo", &message.photo)] {
            if let Some(file) = attachment {
                info!("Message has {}", kind);
                if let Err(e) = self.deliver_file(file).await {
                    error!("{:#}", e);
                }
            }
        }

        if outcome.sent == 0 && !chunks.is_empty() {
            anyhow::bail!(
                "none of the {} parts from {} reached the destination",
                chunks.len(),
                message.source_channel_id
            );
        }

        info!("Done with message from {}", message.source_channel_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MAX_FILE_SIZE;
    use crate::packager::{Fernet, CHUNK_SIZE};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct FakeDestination {
        texts: Mutex<Vec<String>>,
        documents: Mutex<Vec<(String, usize)>>,
        /// Fail the send whose 0-based call index is listed
        fail_calls: Vec<usize>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Destination for FakeDestination {
        async fn send_text(&self, _chat_id: i64, text: &str) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_calls.contains(&call) {
                anyhow::bail!("status 502");
            }
            self.texts.lock().await.push(text.to_string());
            Ok(())
        }

        async fn send_document(&self, _chat_id: i64, file_name: &str, content: Vec<u8>) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_calls.contains(&call) {
                anyhow::bail!("upload refused");
            }
            self.documents
                .lock()
                .await
                .push((file_name.to_string(), content.len()));
            Ok(())
        }
    }

    fn config(chunk_size: usize) -> DeliveryConfig {
        DeliveryConfig {
            chunk_size,
            ..Default::default()
        }
    }

    fn sink(destination: Arc<FakeDestination>, fernet: &Fernet, config: &DeliveryConfig) -> DeliverySink {
        DeliverySink::new(
            "test-sink",
            destination,
            Packager::new(fernet.clone(), config.chunk_size),
            -42,
            config,
            Arc::new(RelayStats::new()),
        )
    }

    fn media(name: &str, size: u64) -> MediaFile {
        MediaFile {
            id: 1,
            name: name.to_string(),
            mime_type: "application/octet-stream".to_string(),
            size_in_bytes: size,
            content: vec![7u8; 8],
        }
    }

    fn chunks(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("chunk-{}", i)).collect()
    }

    #[tokio::test]
    async fn test_deliver_text_in_order() {
        let destination = Arc::new(FakeDestination::default());
        let fernet = Fernet::new(&Fernet::generate_key()).unwrap();
        let sink = sink(destination.clone(), &fernet, &config(CHUNK_SIZE));

        let outcome = sink.deliver_text(&chunks(3)).await;

        assert_eq!(outcome, DeliveryOutcome { sent: 3, failed: 0 });
        assert_eq!(*destination.texts.lock().await, chunks(3));
    }

    #[tokio::test]
    async fn test_failed_chunk_does_not_stop_the_rest() {
        let destination = Arc::new(FakeDestination {
            fail_calls: vec![1],
            ..Default::default()
        });
        let fernet = Fernet::new(&Fernet::generate_key()).unwrap();
        let sink = sink(destination.clone(), &fernet, &config(CHUNK_SIZE));

        let outcome = sink.deliver_text(&chunks(3)).await;

        assert_eq!(outcome, DeliveryOutcome { sent: 2, failed: 1 });
        assert_eq!(
            *destination.texts.lock().await,
            vec!["chunk-1".to_string(), "chunk-3".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_retry_recovers() {
        let destination = Arc::new(FakeDestination {
            fail_calls: vec![0],
            ..Default::default()
        });
        let fernet = Fernet::new(&Fernet::generate_key()).unwrap();
        let mut cfg = config(CHUNK_SIZE);
        cfg.retry = RetryConfig {
            strategy: RetryStrategy::Fixed,
            attempts: 2,
            delay_ms: 500,
        };
        let sink = sink(destination.clone(), &fernet, &cfg);

        let outcome = sink.deliver_text(&chunks(1)).await;

        assert_eq!(outcome, DeliveryOutcome { sent: 1, failed: 0 });
        assert_eq!(destination.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_oversized_file_is_not_sent() {
        let destination = Arc::new(FakeDestination::default());
        let fernet = Fernet::new(&Fernet::generate_key()).unwrap();
        let sink = sink(destination.clone(), &fernet, &config(CHUNK_SIZE));

        sink.deliver_file(&media("huge.bin", MAX_FILE_SIZE + 1))
            .await
            .unwrap();

        assert!(destination.documents.lock().await.is_empty());
        assert_eq!(destination.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_file_at_limit_is_sent() {
        let destination = Arc::new(FakeDestination::default());
        let fernet = Fernet::new(&Fernet::generate_key()).unwrap();
        let sink = sink(destination.clone(), &fernet, &config(CHUNK_SIZE));

        sink.deliver_file(&media("ok.bin", MAX_FILE_SIZE)).await.unwrap();

        assert_eq!(
            *destination.documents.lock().await,
            vec![("ok.bin".to_string(), 8)]
        );
    }

    #[tokio::test]
    async fn test_handle_sends_chunks_then_files() {
        let destination = Arc::new(FakeDestination::default());
        let fernet = Fernet::new(&Fernet::generate_key()).unwrap();
        let cfg = config(64);
        let sink = sink(destination.clone(), &fernet, &cfg);
        let message = NormalizedMessage {
            source_channel_id: "-1001".to_string(),
            source_channel_username: Some("source".to_string()),
            body: "body text".to_string(),
            file: Some(media("doc.pdf", 8)),
            photo: Some(media("photo.jpg", 8)),
            ..Default::default()
        };

        sink.handle(Arc::new(message.clone())).await.unwrap();

        let texts = destination.texts.lock().await.clone();
        assert!(texts.len() > 1);
        let wire = Packager::new(fernet, 64).unpack(&texts, None).unwrap();
        assert_eq!(wire, message.to_wire());
        assert_eq!(
            *destination.documents.lock().await,
            vec![("doc.pdf".to_string(), 8), ("photo.jpg".to_string(), 8)]
        );
    }

    #[tokio::test]
    async fn test_handle_obfuscates_username() {
        let destination = Arc::new(FakeDestination::default());
        let fernet = Fernet::new(&Fernet::generate_key()).unwrap();
        let mut cfg = config(CHUNK_SIZE);
        cfg.obfuscate_username = true;
        let sink = sink(destination.clone(), &fernet, &cfg);
        let message = NormalizedMessage {
            source_channel_id: "5".to_string(),
            source_channel_username: Some("news".to_string()),
            ..Default::default()
        };

        sink.handle(Arc::new(message)).await.unwrap();

        let texts = destination.texts.lock().await.clone();
        let wire = Packager::new(fernet, CHUNK_SIZE).unpack(&texts, None).unwrap();
        assert_eq!(wire.username.as_deref(), Some("ռėẃś"));
    }

    #[tokio::test]
    async fn test_handle_fails_when_no_part_is_delivered() {
        let destination = Arc::new(FakeDestination {
            fail_calls: (0..64).collect(),
            ..Default::default()
        });
        let fernet = Fernet::new(&Fernet::generate_key()).unwrap();
        let sink = Arc::new(sink(destination.clone(), &fernet, &config(64)));
        let publisher = crate::bus::Publisher::new();
        publisher
            .subscribe(crate::bus::DEFAULT_CHANNEL, sink.clone())
            .await;
        let message = NormalizedMessage {
            source_channel_id: "9".to_string(),
            body: "lost".to_string(),
            ..Default::default()
        };

        let err = sink.handle(Arc::new(message.clone())).await.unwrap_err();
        assert!(err.to_string().contains("none of the"));

        let report = publisher
            .publish(crate::bus::DEFAULT_CHANNEL, message)
            .await;
        assert_eq!(report.delivered, 0);
        assert_eq!(report.failed, vec!["test-sink".to_string()]);
    }

    #[tokio::test]
    async fn test_handle_ok_when_some_parts_fail() {
        let destination = Arc::new(FakeDestination {
            fail_calls: vec![0],
            ..Default::default()
        });
        let fernet = Fernet::new(&Fernet::generate_key()).unwrap();
        let sink = sink(destination.clone(), &fernet, &config(64));
        let message = NormalizedMessage {
            source_channel_id: "9".to_string(),
            body: "partly".to_string(),
            ..Default::default()
        };

        sink.handle(Arc::new(message)).await.unwrap();

        assert!(!destination.texts.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_handle_survives_failed_upload() {
        let destination = Arc::new(FakeDestination {
            fail_calls: vec![1],
            ..Default::default()
        });
        let fernet = Fernet::new(&Fernet::generate_key()).unwrap();
        let sink = sink(destination.clone(), &fernet, &config(CHUNK_SIZE));
        let message = NormalizedMessage {
            source_channel_id: "5".to_string(),
            file: Some(media("a.txt", 8)),
            photo: Some(media("photo.jpg", 8)),
            ..Default::default()
        };

        sink.handle(Arc::new(message)).await.unwrap();

        assert_eq!(
            *destination.documents.lock().await,
            vec![("photo.jpg".to_string(), 8)]
        );
    }
}
