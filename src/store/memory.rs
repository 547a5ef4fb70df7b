use super::TokenStore;
use crate::{token::CacheKey, TokenPair};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

struct Entry {
    pair: TokenPair,
    // None when the TTL overflows Instant; such entries live until replaced.
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// In-process token store.
///
/// Expired entries are hidden on read and swept on every write.
#[derive(Default)]
pub struct MemoryTokenStore {
    entries: RwLock<HashMap<CacheKey, Entry>>,
}

impl MemoryTokenStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get(&self, key: &CacheKey) -> Option<TokenPair> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|entry| entry.is_live(Instant::now()))
            .map(|entry| entry.pair.clone())
    }

    async fn set(&self, key: &CacheKey, pair: &TokenPair, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| entry.is_live(now));
        entries.insert(
            key.clone(),
            Entry {
                pair: pair.clone(),
                expires_at: now.checked_add(ttl),
            },
        );
    }

    async fn invalidate(&self, key: &CacheKey) {
        self.entries.write().await.remove(key);
    }
}
