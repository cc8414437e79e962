//! In-memory short-TTL staging cache.
//!
//! Entries expire lazily on read; a periodic sweep reclaims the rest.

use crate::traits::{MessageCache, StoreError};
use async_trait::async_trait;
use dashmap::DashMap;
use mingle_protocol::types::{ChatMessage, MessageState};
use std::time::{Duration, Instant};
use tracing::debug;

struct CacheEntry {
    message: ChatMessage,
    deadline: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }
}

/// DashMap-backed pending cache keyed by message guid.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
}

impl MemoryCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (possibly expired, not yet reclaimed) entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl MessageCache for MemoryCache {
    async fn put(&self, message: ChatMessage, ttl: Duration) -> Result<(), StoreError> {
        let guid = message.guid.clone();
        self.entries.insert(
            guid.clone(),
            CacheEntry {
                message,
                deadline: Instant::now() + ttl,
            },
        );
        debug!(guid = %guid, "Message staged");
        Ok(())
    }

    async fn get(&self, guid: &str) -> Result<Option<ChatMessage>, StoreError> {
        let now = Instant::now();

        if let Some(entry) = self.entries.get(guid) {
            if !entry.is_expired(now) {
                return Ok(Some(entry.message.clone()));
            }
        } else {
            return Ok(None);
        }

        // Expired: reclaim on the way out.
        self.entries.remove(guid);
        Ok(None)
    }

    async fn update_state(&self, guid: &str, state: MessageState) -> Result<bool, StoreError> {
        let now = Instant::now();

        match self.entries.get_mut(guid) {
            Some(mut entry) if !entry.is_expired(now) => {
                entry.message.state = state;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn evict(&self, guid: &str) -> Result<(), StoreError> {
        if self.entries.remove(guid).is_some() {
            debug!(guid = %guid, "Message evicted from staging");
        }
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let purged = before - self.entries.len();

        if purged > 0 {
            debug!(purged, "Purged expired staged messages");
        }
        Ok(purged)
    }
}
