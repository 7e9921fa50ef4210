use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{
    FileId, InlineKeyboardButtonKind, MessageEntity, MessageEntityKind, PhotoSize,
};
use tracing::{debug, info, warn};

use crate::builder::{AttachmentFetcher, AttachmentRef, InboundEvent};
use crate::message::Button;
use crate::platform::Relay;

/// Downloads attachments through the source bot's `getFile`
pub struct TelegramFetcher {
    bot: Bot,
}

impl TelegramFetcher {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl AttachmentFetcher for TelegramFetcher {
    async fn fetch(&self, attachment: &AttachmentRef) -> Result<Vec<u8>> {
        let file = self
            .bot
            .get_file(FileId(attachment.file_id.clone()))
            .await
            .context("Failed to get file info from Telegram")?;

        let mut content = Vec::with_capacity(attachment.size as usize);
        self.bot
            .download_file(&file.path, &mut content)
            .await
            .context("Failed to download file from Telegram")?;

        debug!("Downloaded {} bytes", content.len());
        Ok(content)
    }
}

/// Listen for channel posts (and plain messages) and hand them to the relay
pub async fn run(bot: Bot, relay: Arc<Relay>) -> Result<()> {
    info!("Starting Telegram listener...");

    let allowed = relay.allowed().clone();
    if allowed.is_open() {
        warn!("No source channels configured, relaying every chat the bot can see");
    }
    let accept = move |msg: Message| {
        if allowed.allows(msg.chat.id.0, msg.chat.username()) {
            Some(msg)
        } else {
            None
        }
    };

    let handler = dptree::entry()
        .branch(
            Update::filter_channel_post()
                .filter_map(accept.clone())
                .endpoint(handle_post),
        )
        .branch(
            Update::filter_message()
                .filter_map(accept)
                .endpoint(handle_post),
        );

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![relay])
        .default_handler(|upd| async move {
            debug!("Ignoring update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("telegram listener"))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_post(msg: Message, relay: Arc<Relay>) -> ResponseResult<()> {
    let event = event_from_message(&msg);
    relay.relay(event).await;
    Ok(())
}

/// Convert a Telegram message into a platform-agnostic event.
pub fn event_from_message(msg: &Message) -> InboundEvent {
    let text = msg.text().or_else(|| msg.caption()).unwrap_or_default();
    let entities = msg.entities().or_else(|| msg.caption_entities());

    InboundEvent {
        chat_id: msg.chat.id.0,
        chat_username: msg.chat.username().map(str::to_string),
        message_id: i64::from(msg.id.0),
        text: text.to_string(),
        document: msg.document().map(|doc| AttachmentRef {
            file_id: doc.file.id.to_string(),
            size: u64::from(doc.file.size),
            name: doc.file_name.clone(),
            mime_type: doc.mime_type.as_ref().map(|mime| mime.to_string()),
        }),
        photo_sizes: msg.photo().map(photo_refs).unwrap_or_default(),
        text_links: entities.map(text_links).unwrap_or_default(),
        button_rows: button_rows(msg),
    }
}

fn photo_refs(sizes: &[PhotoSize]) -> Vec<AttachmentRef> {
    sizes
        .iter()
        .map(|size| AttachmentRef {
            file_id: size.file.id.to_string(),
            size: u64::from(size.file.size),
            name: None,
            mime_type: None,
        })
        .collect()
}

fn text_links(entities: &[MessageEntity]) -> Vec<String> {
    entities
        .iter()
        .filter_map(|entity| match &entity.kind {
            MessageEntityKind::TextLink { url } => Some(url.to_string()),
            _ => None,
        })
        .collect()
}

/// Url buttons of the inline keyboard, row by row
fn button_rows(msg: &Message) -> Vec<Vec<Button>> {
    let Some(markup) = msg.reply_markup() else {
        return Vec::new();
    };
    markup
        .inline_keyboard
        .iter()
        .map(|row| {
            row.iter()
                .filter_map(|button| match &button.kind {
                    InlineKeyboardButtonKind::Url(url) => Some(Button {
                        label: button.text.clone(),
                        link: url.to_string(),
                    }),
                    _ => None,
                })
                .collect()
        })
        .collect()
}
