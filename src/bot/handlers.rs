//! Command and message handlers.
//!
//! Each handler is a failure-isolation unit: the dispatcher endpoints in
//! `main` catch its error, log it, and report it to the user, so one
//! chat's failure never reaches another chat's session or batch.

use crate::bot::dispatch::dispatch_response;
use crate::bot::media::{self, InboundMedia};
use crate::bot::media_groups::{BatchAction, MediaGroups, MediaItem};
use crate::bot::sessions::ChatStore;
use crate::config::{
    Settings, MAX_DOCUMENT_SIZE, MEDIA_GROUP_QUIET_PERIOD, TEMPERATURE_MAX, TEMPERATURE_MIN,
};
use crate::llm::RequestPart;
use anyhow::Result;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, ChatId, FileId, StickerFormatFlags};
use teloxide::utils::command::BotCommands;
use tracing::{error, info};

/// Bot commands
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
pub enum Command {
    /// `/start`
    #[command(description = "start the conversation.")]
    Start,
    /// `/clear`
    #[command(description = "reset the conversation history.")]
    Clear,
    /// `/settemp <0.0-2.0>`
    #[command(description = "set the sampling temperature (0.0-2.0).")]
    Settemp(String),
}

/// `/start`: greet and lazily ensure a session exists. An existing
/// conversation is left untouched.
pub async fn start(
    bot: &Bot,
    msg: &Message,
    settings: &Settings,
    store: &ChatStore,
) -> Result<()> {
    let chat_id = msg.chat.id;
    bot.send_message(
        chat_id,
        format!(
            "Hello! I'm Omni. You can send me text, images, stickers, audio messages, or audio files, \
             and I'll respond accordingly. Use /clear to reset our conversation. Use /settemp <0.0-2.0> \
             to set the temperature for responses. Default temperature is {}.",
            settings.default_temperature
        ),
    )
    .await?;

    store.get_or_create(chat_id.0).await?;
    Ok(())
}

/// `/clear`: always replace the session and revert the temperature.
pub async fn clear(bot: &Bot, msg: &Message, store: &ChatStore) -> Result<()> {
    let chat_id = msg.chat.id;
    store.reset(chat_id.0).await?;
    bot.send_message(
        chat_id,
        "Conversation history cleared and chat reset. Temperature reset to default.",
    )
    .await?;
    Ok(())
}

/// `/settemp <value>`: validate and store a temperature override for the
/// chat. Invalid input leaves the previous override untouched.
pub async fn settemp(bot: &Bot, msg: &Message, store: &ChatStore, args: &str) -> Result<()> {
    let chat_id = msg.chat.id;
    match parse_temperature(args) {
        Ok(value) => {
            store.set_temperature(chat_id.0, value).await;
            bot.send_message(
                chat_id,
                format!(
                    "Temperature set to {value} for this chat. \
                     It will be applied to the next message you send."
                ),
            )
            .await?;
        }
        Err(e) => {
            bot.send_message(chat_id, e.user_message()).await?;
        }
    }
    Ok(())
}

/// Why a `/settemp` argument was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemperatureError {
    /// Not exactly one argument
    Usage,
    /// Parsed, but outside the accepted range
    OutOfRange,
    /// Not a number
    Invalid,
}

impl TemperatureError {
    /// The message shown to the user
    #[must_use]
    pub const fn user_message(self) -> &'static str {
        match self {
            Self::Usage => "Usage: /settemp <0.0-2.0>",
            Self::OutOfRange => "Temperature value must be between 0.0 and 2.0.",
            Self::Invalid => "Invalid temperature value. Please use a number between 0.0 and 2.0.",
        }
    }
}

/// Parse and validate a `/settemp` argument string: exactly one numeric
/// token within the inclusive accepted range.
pub fn parse_temperature(args: &str) -> Result<f32, TemperatureError> {
    let mut tokens = args.split_whitespace();
    let (Some(token), None) = (tokens.next(), tokens.next()) else {
        return Err(TemperatureError::Usage);
    };
    let value: f32 = token.parse().map_err(|_| TemperatureError::Invalid)?;
    if (TEMPERATURE_MIN..=TEMPERATURE_MAX).contains(&value) {
        Ok(value)
    } else {
        Err(TemperatureError::OutOfRange)
    }
}

/// Plain text message
pub async fn text(bot: &Bot, msg: &Message, store: &ChatStore) -> Result<()> {
    let chat_id = msg.chat.id;
    let Some(text) = msg.text() else {
        return Ok(());
    };
    info!("Handling text message from chat {chat_id}");
    process_request(
        bot,
        chat_id,
        store,
        vec![RequestPart::Text(text.to_string())],
    )
    .await
}

/// Photo message. Photos carrying a `media_group_id` are buffered and
/// flushed as one combined request after the quiet period; lone photos go
/// straight out.
pub async fn photo(
    bot: &Bot,
    msg: &Message,
    store: &Arc<ChatStore>,
    groups: &Arc<MediaGroups>,
) -> Result<()> {
    let chat_id = msg.chat.id;
    let Some(photos) = msg.photo() else {
        return Ok(());
    };
    info!("Handling photo message from chat {chat_id}");

    if let Some(group_id) = msg.media_group_id() {
        let group_id = group_id.0.clone();
        // Buffer every size variant; deduplication at flush time keeps the
        // largest one per photo.
        let mut action = BatchAction::Buffered;
        for photo in photos {
            let item = MediaItem {
                file_id: photo.file.id.0.clone(),
                file_size: photo.file.size,
            };
            if groups.add(chat_id.0, &group_id, item, msg.caption()).await
                == BatchAction::ScheduleFlush
            {
                action = BatchAction::ScheduleFlush;
            }
        }

        if action == BatchAction::ScheduleFlush {
            spawn_flush_task(bot, chat_id, store, groups, group_id);
        }
        return Ok(());
    }

    let Some(photo) = photos.last() else {
        return Ok(());
    };
    let bytes = media::download_file(bot, photo.file.id.clone()).await?;
    let caption = msg.caption().unwrap_or_default();
    let parts = media::build_parts(caption, vec![InboundMedia::Photo { bytes }])?;
    process_request(bot, chat_id, store, parts).await
}

/// Arm the single flush task for a freshly opened batch.
fn spawn_flush_task(
    bot: &Bot,
    chat_id: ChatId,
    store: &Arc<ChatStore>,
    groups: &Arc<MediaGroups>,
    group_id: String,
) {
    let bot = bot.clone();
    let store = store.clone();
    let groups = groups.clone();
    tokio::spawn(async move {
        tokio::time::sleep(MEDIA_GROUP_QUIET_PERIOD).await;
        if let Err(e) = flush_media_group(&bot, chat_id, &store, &groups, &group_id).await {
            error!("Media group {group_id} flush failed for chat {chat_id}: {e:#}");
            report_error(&bot, chat_id, &e).await;
        }
    });
}

/// Pop the batch, download the deduplicated survivors, and submit one
/// combined request. A batch that is already gone is a silent no-op.
async fn flush_media_group(
    bot: &Bot,
    chat_id: ChatId,
    store: &ChatStore,
    groups: &MediaGroups,
    group_id: &str,
) -> Result<()> {
    let Some(batch) = groups.take(chat_id.0, group_id).await else {
        return Ok(());
    };

    // Caption goes out as-is; a captionless batch gets an empty text part.
    let caption = batch.caption().to_string();
    let items = batch.into_deduped_items();
    info!(
        "Flushing media group {group_id} for chat {chat_id} ({} unique images)",
        items.len()
    );

    let mut media_items = Vec::with_capacity(items.len());
    for item in items {
        let bytes = media::download_file(bot, FileId(item.file_id)).await?;
        media_items.push(InboundMedia::Photo { bytes });
    }

    let parts = media::build_parts(&caption, media_items)?;
    process_request(bot, chat_id, store, parts).await
}

/// Sticker message. Animated and video stickers are refused; static ones
/// are re-encoded to PNG.
pub async fn sticker(bot: &Bot, msg: &Message, store: &ChatStore) -> Result<()> {
    let chat_id = msg.chat.id;
    let Some(sticker) = msg.sticker() else {
        return Ok(());
    };
    info!("Handling sticker message from chat {chat_id}");

    if is_unsupported_sticker(&sticker.flags) {
        bot.send_message(chat_id, "Videos aren't supported yet.")
            .await?;
        return Ok(());
    }

    let bytes = media::download_file(bot, sticker.file.id.clone()).await?;
    let caption = msg.caption().unwrap_or_default();
    let parts = media::build_parts(caption, vec![InboundMedia::Sticker { bytes }])?;
    process_request(bot, chat_id, store, parts).await
}

/// Audio file (music)
pub async fn audio(bot: &Bot, msg: &Message, store: &ChatStore) -> Result<()> {
    let chat_id = msg.chat.id;
    let Some(audio) = msg.audio() else {
        return Ok(());
    };
    info!("Handling audio file from chat {chat_id}");

    let bytes = media::download_file(bot, audio.file.id.clone()).await?;
    let mime_type = audio.mime_type.as_ref().map(ToString::to_string);
    let caption = msg.caption().unwrap_or_default();
    let parts = media::build_parts(caption, vec![InboundMedia::Audio { bytes, mime_type }])?;
    process_request(bot, chat_id, store, parts).await
}

/// Voice note
pub async fn voice(bot: &Bot, msg: &Message, store: &ChatStore) -> Result<()> {
    let chat_id = msg.chat.id;
    let Some(voice) = msg.voice() else {
        return Ok(());
    };
    info!("Handling voice message from chat {chat_id}");

    let bytes = media::download_file(bot, voice.file.id.clone()).await?;
    let mime_type = voice.mime_type.as_ref().map(ToString::to_string);
    let caption = msg.caption().unwrap_or_default();
    let parts = media::build_parts(caption, vec![InboundMedia::Voice { bytes, mime_type }])?;
    process_request(bot, chat_id, store, parts).await
}

/// Video message: not supported, tell the user so
pub async fn video(bot: &Bot, msg: &Message) -> Result<()> {
    let chat_id = msg.chat.id;
    info!("Video received from chat {chat_id}; videos are not supported");
    bot.send_message(chat_id, "Videos aren't supported yet.")
        .await?;
    Ok(())
}

/// Document upload
pub async fn document(bot: &Bot, msg: &Message, store: &ChatStore) -> Result<()> {
    let chat_id = msg.chat.id;
    let Some(doc) = msg.document() else {
        return Ok(());
    };
    info!(
        "Handling file {:?} from chat {chat_id}",
        doc.file_name.as_deref().unwrap_or("unnamed")
    );

    if doc.file.size > MAX_DOCUMENT_SIZE {
        bot.send_message(
            chat_id,
            format!(
                "File too large: {:.1} MB (max 20 MB).",
                f64::from(doc.file.size) / 1024.0 / 1024.0
            ),
        )
        .await?;
        return Ok(());
    }

    let bytes = media::download_file(bot, doc.file.id.clone()).await?;
    let mime_type = doc.mime_type.as_ref().map(ToString::to_string);
    let caption = msg.caption().unwrap_or_default();
    let parts = media::build_parts(caption, vec![InboundMedia::Document { bytes, mime_type }])?;
    process_request(bot, chat_id, store, parts).await
}

/// Submit one assembled request to the chat's conversation and relay the
/// reply.
async fn process_request(
    bot: &Bot,
    chat_id: ChatId,
    store: &ChatStore,
    parts: Vec<RequestPart>,
) -> Result<()> {
    bot.send_chat_action(chat_id, ChatAction::Typing).await?;
    let reply = store.send(chat_id.0, parts).await?;
    dispatch_response(bot, chat_id, reply).await
}

/// Report a handler failure to the user; a failed report is only logged.
pub async fn report_error(bot: &Bot, chat_id: ChatId, err: &anyhow::Error) {
    let text = format!("Sorry, an error occurred: {err:#}");
    if let Err(send_err) = bot.send_message(chat_id, text).await {
        error!("Failed to report error to chat {chat_id}: {send_err}");
    }
}

/// Animated and video stickers cannot be inlined as images.
fn is_unsupported_sticker(flags: &StickerFormatFlags) -> bool {
    flags.is_animated || flags.is_video
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temperature_accepts_inclusive_bounds() {
        assert_eq!(parse_temperature("0.0"), Ok(0.0));
        assert_eq!(parse_temperature("2.0"), Ok(2.0));
        assert_eq!(parse_temperature("1.5"), Ok(1.5));
        assert_eq!(parse_temperature(" 0.7 "), Ok(0.7));
    }

    #[test]
    fn temperature_rejects_out_of_range() {
        assert_eq!(parse_temperature("3.0"), Err(TemperatureError::OutOfRange));
        assert_eq!(parse_temperature("-0.1"), Err(TemperatureError::OutOfRange));
        assert_eq!(parse_temperature("NaN"), Err(TemperatureError::OutOfRange));
    }

    #[test]
    fn temperature_rejects_non_numbers() {
        assert_eq!(parse_temperature("abc"), Err(TemperatureError::Invalid));
        assert_eq!(parse_temperature("1.5c"), Err(TemperatureError::Invalid));
    }

    #[test]
    fn temperature_requires_exactly_one_argument() {
        assert_eq!(parse_temperature(""), Err(TemperatureError::Usage));
        assert_eq!(parse_temperature("   "), Err(TemperatureError::Usage));
        assert_eq!(parse_temperature("1.0 2.0"), Err(TemperatureError::Usage));
    }

    #[test]
    fn only_static_stickers_are_supported() {
        let static_sticker = StickerFormatFlags {
            is_animated: false,
            is_video: false,
        };
        let animated = StickerFormatFlags {
            is_animated: true,
            is_video: false,
        };
        let video = StickerFormatFlags {
            is_animated: false,
            is_video: true,
        };
        assert!(!is_unsupported_sticker(&static_sticker));
        assert!(is_unsupported_sticker(&animated));
        assert!(is_unsupported_sticker(&video));
    }
}
