//! Bounded retry queue for writes that did not reach the remote store

use std::collections::VecDeque;
use tracing::warn;

use super::{SyncPayload, SyncQueueItem};

/// Queue length that triggers eviction (exclusive)
pub const MAX_QUEUE_LEN: usize = 100;
/// Oldest items dropped when the queue overflows
pub const EVICTION_BATCH: usize = 50;
/// Attempts made on one item before it is dropped
pub const MAX_ATTEMPTS: u32 = 3;

/// FIFO of pending writes
///
/// Grows past `MAX_QUEUE_LEN` only transiently: the insert that crosses
/// the limit drops the oldest `EVICTION_BATCH` items in one go.
#[derive(Debug, Default)]
pub struct SyncQueue {
    items: VecDeque<SyncQueueItem>,
}

impl SyncQueue {
    /// Append an item; returns how many old items were evicted
    pub fn push(&mut self, item: SyncQueueItem) -> usize {
        self.items.push_back(item);
        if self.items.len() <= MAX_QUEUE_LEN {
            return 0;
        }

        let evicted = EVICTION_BATCH.min(self.items.len());
        self.items.drain(..evicted);
        warn!("Sync queue overflow, dropped {} oldest items", evicted);
        evicted
    }

    pub fn pop_front(&mut self) -> Option<SyncQueueItem> {
        self.items.pop_front()
    }

    /// Put an item back at the head without charging an attempt
    pub fn restore(&mut self, item: SyncQueueItem) {
        self.items.push_front(item);
    }

    /// Charge a failed attempt and put the item back at the head
    ///
    /// Returns false, dropping the item, once it has used all attempts.
    pub fn retry(&mut self, mut item: SyncQueueItem) -> bool {
        item.retry_count += 1;
        if item.retry_count < MAX_ATTEMPTS {
            self.items.push_front(item);
            true
        } else {
            warn!(
                "Dropping {} sync item {} after {} attempts",
                item.payload.kind(),
                item.id,
                item.retry_count
            );
            false
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drop every queued snapshot push; returns how many were dropped
    pub fn discard_preferences(&mut self) -> usize {
        let before = self.items.len();
        self.items
            .retain(|item| !matches!(item.payload, SyncPayload::Preferences(_)));
        before - self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SyncQueueItem> {
        self.items.iter()
    }
}
