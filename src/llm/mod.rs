//! Gemini backend client
//!
//! Defines the multimodal request/response part types, the per-chat
//! conversation handle, and the [`ChatBackend`] trait implemented by the
//! Gemini REST client.

pub mod gemini;
mod http_utils;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::warn;

pub use gemini::GeminiClient;

/// Errors that can occur while talking to the Gemini API
#[derive(Debug, Error)]
pub enum LlmError {
    /// Error returned by the provider's API
    #[error("API error: {0}")]
    ApiError(String),
    /// Error during network communication
    #[error("Network error: {0}")]
    NetworkError(String),
    /// Error during JSON serialization or deserialization
    #[error("JSON error: {0}")]
    JsonError(String),
}

/// One part of an outbound user message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestPart {
    /// Plain text (captions; may be empty)
    Text(String),
    /// Binary payload with its mime type (images, audio)
    InlineData {
        /// Mime type declared for the payload
        mime_type: String,
        /// Raw payload bytes
        data: Vec<u8>,
    },
}

/// One part of a Gemini reply, consumed once by the response dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponsePart {
    /// Text content
    Text(String),
    /// Inline binary content, in practice a generated image
    InlineData {
        /// Mime type reported by the API
        mime_type: String,
        /// Decoded payload bytes
        data: Vec<u8>,
    },
    /// A part shape this client does not understand
    Unrecognized,
}

/// Conversation handle for one chat: the ordered turn history in Gemini
/// wire shape (`contents` array entries), including the priming turn.
#[derive(Debug, Default, Clone)]
pub struct ChatSession {
    contents: Vec<Value>,
}

impl ChatSession {
    /// Turns accumulated so far (user and model turns both count)
    #[must_use]
    pub fn turn_count(&self) -> usize {
        self.contents.len()
    }

    /// The raw turn history, in the order it was produced
    #[must_use]
    pub fn contents(&self) -> &[Value] {
        &self.contents
    }

    /// Append a turn in wire shape. Backends call this after a successful
    /// exchange; a failed request must leave the history untouched.
    pub fn push_turn(&mut self, content: Value) {
        self.contents.push(content);
    }
}

/// Interface to the generative backend.
///
/// `start_chat` creates a conversation and sends the system prompt as its
/// priming turn before any user content; `send_message` appends one user
/// turn plus the model reply to the session's history.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ChatBackend: Send + Sync {
    /// Create a conversation primed with `system_prompt`
    async fn start_chat(&self, system_prompt: &str) -> Result<ChatSession, LlmError>;

    /// Send an ordered sequence of parts into the conversation and return
    /// the model's reply parts in emission order
    async fn send_message(
        &self,
        chat: &mut ChatSession,
        parts: Vec<RequestPart>,
        temperature: f32,
    ) -> Result<Vec<ResponsePart>, LlmError>;
}

/// Serialize a request part into Gemini wire shape
pub(crate) fn request_part_to_value(part: &RequestPart) -> Value {
    match part {
        RequestPart::Text(text) => json!({ "text": text }),
        RequestPart::InlineData { mime_type, data } => json!({
            "inline_data": {
                "mime_type": mime_type,
                "data": BASE64.encode(data),
            }
        }),
    }
}

/// Parse one candidate part from a Gemini response.
///
/// The REST API answers in camelCase (`inlineData`) while requests use
/// snake_case; both spellings are accepted. Anything else maps to
/// [`ResponsePart::Unrecognized`].
pub(crate) fn parse_response_part(part: &Value) -> ResponsePart {
    if let Some(text) = part.get("text").and_then(Value::as_str) {
        return ResponsePart::Text(text.to_string());
    }

    let inline = part.get("inlineData").or_else(|| part.get("inline_data"));
    if let Some(inline) = inline {
        let mime_type = inline
            .get("mimeType")
            .or_else(|| inline.get("mime_type"))
            .and_then(Value::as_str)
            .unwrap_or("image/png")
            .to_string();
        if let Some(encoded) = inline.get("data").and_then(Value::as_str) {
            match BASE64.decode(encoded) {
                Ok(data) => return ResponsePart::InlineData { mime_type, data },
                Err(e) => {
                    warn!("Failed to decode inline data from Gemini: {e}");
                    return ResponsePart::Unrecognized;
                }
            }
        }
    }

    ResponsePart::Unrecognized
}
