//! Inbound media normalization and request building.
//!
//! Converts downloaded Telegram payloads into the ordered part sequence a
//! Gemini request expects. Every request leads with a text part — an empty
//! one when there is no caption — followed by one inline-data part per
//! media item, in input order.

use crate::llm::RequestPart;
use anyhow::{Context, Result};
use image::ImageFormat;
use std::io::Cursor;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::FileId;

/// One normalized inbound media payload
#[derive(Debug, Clone)]
pub enum InboundMedia {
    /// A photo; re-encoded to JPEG before upload
    Photo {
        /// Raw downloaded bytes
        bytes: Vec<u8>,
    },
    /// A static sticker; re-encoded to PNG before upload
    Sticker {
        /// Raw downloaded bytes
        bytes: Vec<u8>,
    },
    /// An audio file (music)
    Audio {
        /// Raw downloaded bytes
        bytes: Vec<u8>,
        /// Mime type declared by Telegram, if any
        mime_type: Option<String>,
    },
    /// A voice note
    Voice {
        /// Raw downloaded bytes
        bytes: Vec<u8>,
        /// Mime type declared by Telegram, if any
        mime_type: Option<String>,
    },
    /// An arbitrary document upload
    Document {
        /// Raw downloaded bytes
        bytes: Vec<u8>,
        /// Mime type declared by Telegram, if any
        mime_type: Option<String>,
    },
}

impl InboundMedia {
    fn into_request_part(self) -> Result<RequestPart> {
        let (mime_type, data) = match self {
            Self::Photo { bytes } => (
                "image/jpeg".to_string(),
                reencode_image(&bytes, ImageFormat::Jpeg)?,
            ),
            Self::Sticker { bytes } => (
                "image/png".to_string(),
                reencode_image(&bytes, ImageFormat::Png)?,
            ),
            Self::Audio { bytes, mime_type } => {
                (mime_type.unwrap_or_else(|| "audio/mpeg".to_string()), bytes)
            }
            Self::Voice { bytes, mime_type } => {
                (mime_type.unwrap_or_else(|| "audio/ogg".to_string()), bytes)
            }
            Self::Document { bytes, mime_type } => (
                mime_type.unwrap_or_else(|| "application/octet-stream".to_string()),
                bytes,
            ),
        };
        Ok(RequestPart::InlineData { mime_type, data })
    }
}

/// Assemble the outbound part sequence for one logical user message.
///
/// # Errors
///
/// Fails if an image payload cannot be decoded for re-encoding.
pub fn build_parts(caption: &str, media: Vec<InboundMedia>) -> Result<Vec<RequestPart>> {
    let mut parts = Vec::with_capacity(media.len() + 1);
    parts.push(RequestPart::Text(caption.to_string()));
    for item in media {
        parts.push(item.into_request_part()?);
    }
    Ok(parts)
}

/// Re-encode an image to a Gemini-accepted format. Telegram serves photos
/// as JPEG and static stickers as WEBP; normalizing here keeps the upload
/// path uniform.
fn reencode_image(bytes: &[u8], format: ImageFormat) -> Result<Vec<u8>> {
    let img = image::load_from_memory(bytes).context("Failed to decode image")?;
    let mut buf = Cursor::new(Vec::new());
    match format {
        // JPEG has no alpha channel
        ImageFormat::Jpeg => img
            .to_rgb8()
            .write_to(&mut buf, format)
            .context("Failed to encode JPEG")?,
        _ => img
            .write_to(&mut buf, format)
            .context("Failed to encode image")?,
    }
    Ok(buf.into_inner())
}

/// Download a Telegram file into memory, with retry on transient failures.
///
/// # Errors
///
/// Returns an error once all retry attempts are exhausted.
pub async fn download_file(bot: &Bot, file_id: FileId) -> Result<Vec<u8>> {
    crate::utils::retry_telegram_operation(|| async {
        let file = bot.get_file(file_id.clone()).await?;
        let mut buf = Vec::new();
        bot.download_file(&file.path, &mut buf).await?;
        Ok(buf)
    })
    .await
}
