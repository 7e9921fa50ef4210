use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Largest attachment the relay will download or upload (50 MiB).
pub const MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// An inline call-to-action button
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub label: String,
    pub link: String,
}

/// A downloaded attachment (document or photo)
#[derive(Clone, PartialEq, Eq)]
pub struct MediaFile {
    pub id: i64,
    pub name: String,
    pub mime_type: String,
    pub size_in_bytes: u64,
    pub content: Vec<u8>,
}

impl std::fmt::Debug for MediaFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaFile")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("size_in_bytes", &self.size_in_bytes)
            .finish_non_exhaustive()
    }
}

/// Canonical representation of one inbound event.
/// Built once by the `MessageBuilder`, immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NormalizedMessage {
    pub source_channel_id: String,
    pub source_channel_username: Option<String>,
    pub body: String,
    pub links: BTreeSet<String>,
    pub buttons: Vec<Button>,
    pub file: Option<MediaFile>,
    pub photo: Option<MediaFile>,
}

impl NormalizedMessage {
    /// The transmissible part of the message, in wire field order.
    pub fn to_wire(&self) -> WirePayload {
        WirePayload {
            payload: self.body.clone(),
            username: self.source_channel_username.clone(),
            id: self.source_channel_id.clone(),
            buttons: self.buttons.clone(),
            entities: self.links.iter().cloned().collect(),
        }
    }
}

/// JSON document carried inside the encrypted token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WirePayload {
    pub payload: String,
    pub username: Option<String>,
    pub id: String,
    pub buttons: Vec<Button>,
    pub entities: Vec<String>,
}
