#![deny(missing_docs)]
//! Omni - a multimodal Telegram relay bot
//!
//! Receives text, images, stickers, audio and voice messages from Telegram,
//! forwards them to a Gemini conversation with per-chat history, and relays
//! the multimodal reply (text and generated images) back to the chat.

/// Telegram bot implementation
pub mod bot;
/// Configuration management
pub mod config;
/// Gemini backend client
pub mod llm;
pub mod utils;
