/// Relaying backend replies to Telegram
pub mod dispatch;
/// Command and message handlers
pub mod handlers;
/// Downloading and normalizing inbound media
pub mod media;
/// Burst-upload aggregation
pub mod media_groups;
/// Message splitting and HTML-safe delivery
pub mod messaging;
/// Per-chat conversation store
pub mod sessions;
