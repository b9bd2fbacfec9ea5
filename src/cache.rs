//! Read-through response cache with per-entry TTL.
//!
//! Keys are SHA-256 over (intent tag, canonical query representation), so
//! two texts that normalize identically share an entry and anything else
//! stays distinct. Eviction is time-based only — result volume is small
//! and staleness, not memory, is the risk — and expiry is checked on read.

use std::collections::HashMap;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

/// Derive the cache key for one (intent, normalized-query) pair.
pub fn cache_key(intent_tag: &str, repr: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(intent_tag.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(repr.as_bytes());
    hex::encode(hasher.finalize())
}

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    ttl: Duration,
}

impl<V> Entry<V> {
    fn is_live(&self) -> bool {
        self.inserted_at.elapsed() < self.ttl
    }
}

/// Concurrent TTL map. Safe for concurrent read/update across request tasks.
pub struct ResponseCache<V> {
    default_ttl: Duration,
    entries: RwLock<HashMap<String, Entry<V>>>,
}

impl<V: Clone> ResponseCache<V> {
    pub fn new(default_ttl: Duration) -> Self {
        Self { default_ttl, entries: RwLock::new(HashMap::new()) }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Fetch a live entry. Expired entries are evicted here rather than by
    /// a background sweeper.
    pub async fn get(&self, key: &str) -> Option<V> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.is_live() => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        // Expired on read — re-check under the write lock, then evict.
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(key) {
            if entry.is_live() {
                return Some(entry.value.clone());
            }
            entries.remove(key);
            debug!("cache entry expired on read");
        }
        None
    }

    pub async fn put(&self, key: String, value: V, ttl: Duration) {
        let mut entries = self.entries.write().await;
        entries.insert(key, Entry { value, inserted_at: Instant::now(), ttl });
    }

    /// Number of live (unexpired) entries.
    pub async fn len(&self) -> usize {
        let entries = self.entries.read().await;
        entries.values().filter(|e| e.is_live()).count()
    }
}
