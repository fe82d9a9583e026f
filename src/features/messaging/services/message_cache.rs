//! Read-through cache of the newest history page per conversation
//!
//! Entries are advisory: a miss always falls through to the store and the
//! cache is never consulted for membership or existence checks. Cached
//! messages are viewer-neutral, so `is_read` must be recomputed on every hit.

use std::num::NonZeroUsize;
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::features::messaging::dtos::FormattedMessage;
use crate::shared::constants::MAX_PAGE_SIZE;

/// Newest messages of one conversation in ascending order
#[derive(Debug, Clone, PartialEq)]
pub struct CachedPage {
    pub messages: Vec<FormattedMessage>,
    /// True when `messages` is the whole visible history
    pub exhaustive: bool,
}

impl CachedPage {
    /// Whether this page can answer a first-page request of `limit` messages
    pub fn satisfies(&self, limit: usize) -> bool {
        self.exhaustive || self.messages.len() >= limit
    }

    /// The newest `limit` messages, still ascending
    pub fn newest(mut self, limit: usize) -> Vec<FormattedMessage> {
        let skip = self.messages.len().saturating_sub(limit);
        self.messages.split_off(skip)
    }
}

#[async_trait]
pub trait MessageCache: Send + Sync {
    async fn get(&self, conversation_id: Uuid) -> Option<CachedPage>;

    /// Write stamp of a conversation; read it before querying the store
    async fn generation(&self, conversation_id: Uuid) -> u64;

    /// Replace the entry unless a write landed since `generation` was read.
    /// Returns whether the page was stored.
    async fn put(&self, conversation_id: Uuid, page: CachedPage, generation: u64) -> bool;

    /// Extend an existing entry with a freshly sent message
    async fn append(&self, conversation_id: Uuid, message: FormattedMessage);

    async fn invalidate(&self, conversation_id: Uuid);
}

struct CacheEntry {
    page: CachedPage,
    stored_at: Instant,
}

struct CacheState {
    pages: LruCache<Uuid, CacheEntry>,
    /// Stamp of the latest write per conversation
    generations: LruCache<Uuid, u64>,
    clock: u64,
    /// Highest stamp dropped from `generations`; stands in for untracked conversations
    floor: u64,
}

impl CacheState {
    fn generation(&self, conversation_id: &Uuid) -> u64 {
        self.generations
            .peek(conversation_id)
            .copied()
            .unwrap_or(self.floor)
    }

    fn bump(&mut self, conversation_id: Uuid) {
        self.clock += 1;
        if let Some((evicted, stamp)) = self.generations.push(conversation_id, self.clock) {
            if evicted != conversation_id {
                self.floor = self.floor.max(stamp);
            }
        }
    }
}

/// Process-local LRU across conversations with a freshness window
pub struct LruMessageCache {
    state: Mutex<CacheState>,
    ttl: Duration,
    page_cap: usize,
}

impl LruMessageCache {
    pub fn new(max_conversations: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_conversations).unwrap_or(NonZeroUsize::MIN);
        // Generations outlive pages so a write on an evicted conversation still counts
        let tracked = NonZeroUsize::new(capacity.get().saturating_mul(4)).unwrap_or(capacity);
        Self {
            state: Mutex::new(CacheState {
                pages: LruCache::new(capacity),
                generations: LruCache::new(tracked),
                clock: 0,
                floor: 0,
            }),
            ttl,
            page_cap: MAX_PAGE_SIZE as usize,
        }
    }

    fn cap(&self, page: &mut CachedPage) {
        if page.messages.len() > self.page_cap {
            let excess = page.messages.len() - self.page_cap;
            page.messages.drain(..excess);
            page.exhaustive = false;
        }
    }
}

#[async_trait]
impl MessageCache for LruMessageCache {
    async fn get(&self, conversation_id: Uuid) -> Option<CachedPage> {
        let mut state = self.state.lock().await;
        let fresh = state
            .pages
            .get(&conversation_id)
            .map(|entry| entry.stored_at.elapsed() < self.ttl)?;

        if !fresh {
            state.pages.pop(&conversation_id);
            debug!(%conversation_id, "Dropped expired message cache entry");
            return None;
        }

        state
            .pages
            .get(&conversation_id)
            .map(|entry| entry.page.clone())
    }

    async fn generation(&self, conversation_id: Uuid) -> u64 {
        self.state.lock().await.generation(&conversation_id)
    }

    async fn put(&self, conversation_id: Uuid, mut page: CachedPage, generation: u64) -> bool {
        self.cap(&mut page);
        let mut state = self.state.lock().await;
        if state.generation(&conversation_id) != generation {
            debug!(%conversation_id, "Discarded page read before a concurrent write");
            return false;
        }
        state.pages.put(
            conversation_id,
            CacheEntry {
                page,
                stored_at: Instant::now(),
            },
        );
        true
    }

    async fn append(&self, conversation_id: Uuid, message: FormattedMessage) {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        state.bump(conversation_id);
        let Some(entry) = state.pages.get_mut(&conversation_id) else {
            return;
        };
        let messages = &mut entry.page.messages;
        if messages.iter().any(|m| m.id == message.id) {
            return;
        }

        let position = messages.partition_point(|m| m.created_at <= message.created_at);
        if position == 0 && !entry.page.exhaustive && !messages.is_empty() {
            // Older than the cached window, so its neighbours are unknown
            state.pages.pop(&conversation_id);
            return;
        }
        messages.insert(position, message);
        self.cap(&mut entry.page);
    }

    async fn invalidate(&self, conversation_id: Uuid) {
        let mut state = self.state.lock().await;
        state.bump(conversation_id);
        state.pages.pop(&conversation_id);
    }
}

/// Cache that never holds anything
pub struct NoopMessageCache;

#[async_trait]
impl MessageCache for NoopMessageCache {
    async fn get(&self, _conversation_id: Uuid) -> Option<CachedPage> {
        None
    }

    async fn generation(&self, _conversation_id: Uuid) -> u64 {
        0
    }

    async fn put(&self, _conversation_id: Uuid, _page: CachedPage, _generation: u64) -> bool {
        false
    }

    async fn append(&self, _conversation_id: Uuid, _message: FormattedMessage) {}

    async fn invalidate(&self, _conversation_id: Uuid) {}
}
