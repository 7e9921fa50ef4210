use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::message::{Button, MediaFile, NormalizedMessage};

const DEFAULT_FILE_NAME: &str = "unknown_file";
const DEFAULT_MIME_TYPE: &str = "application/octet-stream";
const PHOTO_FILE_NAME: &str = "photo.jpg";
const PHOTO_MIME_TYPE: &str = "image/jpeg";

/// Descriptor of a remote attachment, as announced by the source platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    /// Platform handle used to fetch the bytes
    pub file_id: String,
    /// Size declared by the platform before download
    pub size: u64,
    pub name: Option<String>,
    pub mime_type: Option<String>,
}

/// A platform-agnostic inbound event.
/// Every optional part may be missing; the builder degrades instead of failing.
#[derive(Debug, Clone, Default)]
pub struct InboundEvent {
    pub chat_id: i64,
    pub chat_username: Option<String>,
    /// Platform message id, reused as the id of downloaded attachments
    pub message_id: i64,
    pub text: String,
    pub document: Option<AttachmentRef>,
    /// Every rendition the platform offers for the photo
    pub photo_sizes: Vec<AttachmentRef>,
    pub text_links: Vec<String>,
    /// Button grid in display order (rows, then columns)
    pub button_rows: Vec<Vec<Button>>,
}

/// Capability to download attachment bytes from the source platform
#[async_trait]
pub trait AttachmentFetcher: Send + Sync {
    async fn fetch(&self, attachment: &AttachmentRef) -> Result<Vec<u8>>;
}

/// Whether an attachment with the given declared size may be downloaded.
pub fn should_fetch(declared_size: u64, max_size: u64) -> bool {
    declared_size <= max_size
}

/// Converts inbound events into `NormalizedMessage`s
pub struct MessageBuilder {
    fetcher: Arc<dyn AttachmentFetcher>,
    max_file_size: u64,
    download_timeout: Duration,
}

impl MessageBuilder {
    pub fn new(
        fetcher: Arc<dyn AttachmentFetcher>,
        max_file_size: u64,
        download_timeout: Duration,
    ) -> Self {
        Self {
            fetcher,
            max_file_size,
            download_timeout,
        }
    }

    /// Build the normalized message. Never fails: attachment problems
    /// leave the corresponding field empty.
    pub async fn build(&self, event: &InboundEvent) -> NormalizedMessage {
        info!("Building message from chat {}", event.chat_id);

        let file = match &event.document {
            Some(document) => self.fetch_document(event.message_id, document).await,
            None => None,
        };

        let photo = match largest_rendition(&event.photo_sizes) {
            Some(rendition) => self.fetch_photo(event.message_id, rendition).await,
            None => None,
        };

        NormalizedMessage {
            source_channel_id: event.chat_id.to_string(),
            source_channel_username: event.chat_username.clone(),
            body: event.text.clone(),
            links: collect_links(&event.text_links),
            buttons: flatten_buttons(&event.button_rows),
            file,
            photo,
        }
    }

    async fn fetch_document(&self, message_id: i64, document: &AttachmentRef) -> Option<MediaFile> {
        let name = document
            .name
            .clone()
            .unwrap_or_else(|| DEFAULT_FILE_NAME.to_string());
        let content = self.download(document, "file").await?;
        info!("File '{}' downloaded successfully", name);
        Some(MediaFile {
            id: message_id,
            name,
            mime_type: document
                .mime_type
                .clone()
                .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string()),
            size_in_bytes: content.len() as u64,
            content,
        })
    }

    async fn fetch_photo(&self, message_id: i64, rendition: &AttachmentRef) -> Option<MediaFile> {
        let content = self.download(rendition, "photo").await?;
        info!("Photo downloaded successfully");
        Some(MediaFile {
            id: message_id,
            name: PHOTO_FILE_NAME.to_string(),
            mime_type: PHOTO_MIME_TYPE.to_string(),
            size_in_bytes: content.len() as u64,
            content,
        })
    }

    /// Size guard followed by a bounded download. Any failure yields `None`.
    async fn download(&self, attachment: &AttachmentRef, kind: &str) -> Option<Vec<u8>> {
        if !should_fetch(attachment.size, self.max_file_size) {
            warn!(
                "Skipping {}: size {} bytes exceeds the {} byte limit",
                kind, attachment.size, self.max_file_size
            );
            return None;
        }

        debug!("Downloading {} ({} bytes)...", kind, attachment.size);
        match tokio::time::timeout(self.download_timeout, self.fetcher.fetch(attachment)).await {
            Ok(Ok(content)) => Some(content),
            Ok(Err(e)) => {
                error!("Failed to download {}: {:#}", kind, e);
                None
            }
            Err(_) => {
                error!(
                    "Failed to download {}: timed out after {:?}",
                    kind, self.download_timeout
                );
                None
            }
        }
    }
}

fn largest_rendition(sizes: &[AttachmentRef]) -> Option<&AttachmentRef> {
    sizes.iter().max_by_key(|rendition| rendition.size)
}

/// Flatten the button grid, keeping the first button seen for each link.
fn flatten_buttons(rows: &[Vec<Button>]) -> Vec<Button> {
    let mut seen = HashSet::new();
    rows.iter()
        .flatten()
        .filter(|button| seen.insert(button.link.clone()))
        .cloned()
        .collect()
}

fn collect_links(links: &[String]) -> BTreeSet<String> {
    links.iter().cloned().collect()
}
