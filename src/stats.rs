use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide relay counters, shared behind an `Arc`
#[derive(Debug, Default)]
pub struct RelayStats {
    events_received: AtomicU64,
    messages_published: AtomicU64,
    subscriber_failures: AtomicU64,
    chunks_sent: AtomicU64,
    chunks_failed: AtomicU64,
    files_sent: AtomicU64,
    files_dropped: AtomicU64,
}

/// Point-in-time copy of `RelayStats`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub events_received: u64,
    pub messages_published: u64,
    pub subscriber_failures: u64,
    pub chunks_sent: u64,
    pub chunks_failed: u64,
    pub files_sent: u64,
    pub files_dropped: u64,
}

impl RelayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_event(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_subscriber_failures(&self, count: u64) {
        self.subscriber_failures.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_chunks(&self, sent: u64, failed: u64) {
        self.chunks_sent.fetch_add(sent, Ordering::Relaxed);
        self.chunks_failed.fetch_add(failed, Ordering::Relaxed);
    }

    pub fn record_file_sent(&self) {
        self.files_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// A file that was skipped for size or failed to upload
    pub fn record_file_dropped(&self) {
        self.files_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            events_received: self.events_received.load(Ordering::Relaxed),
            messages_published: self.messages_published.load(Ordering::Relaxed),
            subscriber_failures: self.subscriber_failures.load(Ordering::Relaxed),
            chunks_sent: self.chunks_sent.load(Ordering::Relaxed),
            chunks_failed: self.chunks_failed.load(Ordering::Relaxed),
            files_sent: self.files_sent.load(Ordering::Relaxed),
            files_dropped: self.files_dropped.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "events={} published={} subscriber_failures={} chunks_sent={} chunks_failed={} files_sent={} files_dropped={}",
            self.events_received,
            self.messages_published,
            self.subscriber_failures,
            self.chunks_sent,
            self.chunks_failed,
            self.files_sent,
            self.files_dropped
        )
    }
}
