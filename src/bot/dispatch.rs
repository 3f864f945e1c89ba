//! Response dispatching.
//!
//! Relays a Gemini reply back to the chat, one part at a time, in the
//! order the model emitted them. A failed image delivery or an
//! unrecognized part is reported to the user without aborting the rest of
//! the reply.

use crate::bot::messaging::send_long_message;
use crate::llm::ResponsePart;
use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{ChatId, InputFile};
use tracing::{error, warn};

/// Outbound delivery seam, one method per send style the dispatcher uses.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
trait Outbound: Sync {
    /// Deliver a text part, formatted and split at the message limit
    async fn send_text(&self, text: &str) -> Result<()>;

    /// Deliver an image from an in-memory payload
    async fn send_photo(&self, data: Vec<u8>) -> Result<()>;

    /// Deliver a short plain notice
    async fn send_notice(&self, text: &str) -> Result<()>;
}

struct TelegramOutbound<'a> {
    bot: &'a Bot,
    chat_id: ChatId,
}

#[async_trait::async_trait]
impl Outbound for TelegramOutbound<'_> {
    async fn send_text(&self, text: &str) -> Result<()> {
        send_long_message(self.bot, self.chat_id, text).await
    }

    async fn send_photo(&self, data: Vec<u8>) -> Result<()> {
        self.bot
            .send_photo(self.chat_id, InputFile::memory(data))
            .await?;
        Ok(())
    }

    async fn send_notice(&self, text: &str) -> Result<()> {
        self.bot.send_message(self.chat_id, text).await?;
        Ok(())
    }
}

/// Relay each response part to the chat.
///
/// # Errors
///
/// Returns an error only if a text message itself cannot be sent; image
/// delivery failures are handled locally.
pub async fn dispatch_response(bot: &Bot, chat_id: ChatId, parts: Vec<ResponsePart>) -> Result<()> {
    relay_parts(&TelegramOutbound { bot, chat_id }, parts).await
}

async fn relay_parts(outbound: &dyn Outbound, parts: Vec<ResponsePart>) -> Result<()> {
    for part in parts {
        match part {
            ResponsePart::Text(text) => {
                outbound.send_text(&text).await?;
            }
            ResponsePart::InlineData { data, .. } => {
                if let Err(e) = outbound.send_photo(data).await {
                    error!("Error sending image: {e:#}");
                    outbound.send_notice("Error sending the image.").await?;
                }
            }
            ResponsePart::Unrecognized => {
                warn!("Unexpected response part from Gemini");
                outbound
                    .send_notice("Unexpected response from Gemini.")
                    .await?;
            }
        }
    }
    Ok(())
}
