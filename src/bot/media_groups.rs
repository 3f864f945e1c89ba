//! Media-group aggregation.
//!
//! Telegram delivers a multi-photo upload as independent messages sharing a
//! `media_group_id`, with unspecified inter-arrival timing. [`MediaGroups`]
//! buffers them per `(chat, group)` key so that one quiet period after the
//! first item, the whole batch goes to Gemini as a single combined request
//! instead of N separate calls.
//!
//! The flush task itself is spawned by the photo handler: [`MediaGroups::add`]
//! reports `ScheduleFlush` exactly once per batch, which keeps the
//! one-flush-task-per-batch invariant without a separate flag. `take` is an
//! atomic pop, so a straggler arriving after the flush started opens a brand
//! new batch rather than joining the flushed one. Batches are lost on
//! process shutdown; nothing is persisted.

use crate::config::FILE_ID_VARIANT_SUFFIX_LEN;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;

/// A photo reference buffered for a pending batch. Bytes are downloaded
/// only for the deduplicated survivors, at flush time.
#[derive(Debug, Clone)]
pub struct MediaItem {
    /// Telegram file id of one size variant
    pub file_id: String,
    /// Declared size in bytes
    pub file_size: u32,
}

impl MediaItem {
    /// Deduplication key: the file id minus Telegram's size-variant suffix.
    /// Two ids sharing a key are variants of the same photo.
    ///
    /// Ids are ASCII in practice; should the cut ever land inside a
    /// multibyte character, the whole id is used instead of panicking.
    #[must_use]
    pub fn dedup_key(&self) -> &str {
        let cut = self.file_id.len().saturating_sub(FILE_ID_VARIANT_SUFFIX_LEN);
        self.file_id.get(..cut).unwrap_or(&self.file_id)
    }
}

/// One in-flight media group: ordered items plus the resolved caption.
#[derive(Debug, Default)]
pub struct PendingBatch {
    items: Vec<MediaItem>,
    caption: String,
}

impl PendingBatch {
    /// The resolved caption; empty if no message in the batch carried one
    #[must_use]
    pub fn caption(&self) -> &str {
        &self.caption
    }

    /// Consume the batch, deduplicating size variants.
    ///
    /// Items sharing a dedup key collapse to the one with the larger
    /// declared size (assumed to be the higher resolution); first-seen
    /// order is preserved.
    #[must_use]
    pub fn into_deduped_items(self) -> Vec<MediaItem> {
        let mut survivors: Vec<MediaItem> = Vec::with_capacity(self.items.len());
        let mut index_by_key: HashMap<String, usize> = HashMap::new();

        for item in self.items {
            match index_by_key.get(item.dedup_key()) {
                Some(&idx) => {
                    if item.file_size > survivors[idx].file_size {
                        survivors[idx] = item;
                    }
                }
                None => {
                    index_by_key.insert(item.dedup_key().to_string(), survivors.len());
                    survivors.push(item);
                }
            }
        }

        survivors
    }
}

/// What the caller should do after buffering an item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchAction {
    /// First item of a new batch: arm exactly one flush task
    ScheduleFlush,
    /// Batch already has a flush pending; nothing to arm
    Buffered,
}

/// Table of pending media groups, keyed by `(chat_id, media_group_id)`.
#[derive(Default)]
pub struct MediaGroups {
    pending: Mutex<HashMap<(i64, String), PendingBatch>>,
}

impl MediaGroups {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer one item for the given batch, updating the caption when the
    /// carrying message has a non-empty one (later captions win).
    pub async fn add(
        &self,
        chat_id: i64,
        group_id: &str,
        item: MediaItem,
        caption: Option<&str>,
    ) -> BatchAction {
        let mut pending = self.pending.lock().await;
        let key = (chat_id, group_id.to_string());
        let is_new = !pending.contains_key(&key);
        let batch = pending.entry(key).or_default();

        batch.items.push(item);
        if let Some(caption) = caption {
            if !caption.is_empty() {
                batch.caption = caption.to_string();
            }
        }

        if is_new {
            debug!("Opened media group {group_id} for chat {chat_id}");
            BatchAction::ScheduleFlush
        } else {
            BatchAction::Buffered
        }
    }

    /// Atomically remove and return the batch, if it is still pending.
    /// A missing batch (already flushed, or never existed) yields `None`.
    pub async fn take(&self, chat_id: i64, group_id: &str) -> Option<PendingBatch> {
        self.pending
            .lock()
            .await
            .remove(&(chat_id, group_id.to_string()))
    }
}
