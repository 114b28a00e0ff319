//! Short-lived in-memory caches for document metadata.
//!
//! Entries are valid while `now - written < ttl`. An expired entry is evicted
//! by the read that finds it. Operations are synchronous; the lock is never
//! held across an `.await`.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::trace;

use crate::model::{AccessLogEntry, Document};

pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: DEFAULT_TTL.as_secs(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    written_at: Instant,
}

/// Counters for one cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub writes: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    writes: AtomicU64,
}

/// Fixed-TTL map
pub struct TtlCache<K, V> {
    name: &'static str,
    ttl: Duration,
    entries: Mutex<HashMap<K, CacheEntry<V>>>,
    counters: Counters,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        Self {
            name,
            ttl,
            entries: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<K, CacheEntry<V>>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries();
        let fresh = entries
            .get(key)
            .map(|entry| entry.written_at.elapsed() < self.ttl);
        match fresh {
            Some(true) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                trace!(cache = self.name, "hit");
                entries.get(key).map(|entry| entry.value.clone())
            }
            Some(false) => {
                entries.remove(key);
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                trace!(cache = self.name, "expired");
                None
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                trace!(cache = self.name, "miss");
                None
            }
        }
    }

    pub fn set(&self, key: K, value: V) {
        self.entries().insert(
            key,
            CacheEntry {
                value,
                written_at: Instant::now(),
            },
        );
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn invalidate(&self, key: &K) -> bool {
        self.entries().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries().clear();
    }

    /// Number of stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
        }
    }
}

/// Document, document-list and access-log caches
pub struct MetadataCache {
    pub documents: TtlCache<String, Document>,
    /// Keyed by [`crate::model::DocumentScope::cache_key`]
    pub lists: TtlCache<String, Vec<Document>>,
    pub access_logs: TtlCache<String, Vec<AccessLogEntry>>,
}

impl MetadataCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            documents: TtlCache::new("documents", ttl),
            lists: TtlCache::new("document_lists", ttl),
            access_logs: TtlCache::new("access_logs", ttl),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.ttl())
    }

    /// Drop every cached entry that may mention `document_id`
    pub fn forget_document(&self, document_id: &str) {
        let key = document_id.to_string();
        self.documents.invalidate(&key);
        self.access_logs.invalidate(&key);
    }

    pub fn clear(&self) {
        self.documents.clear();
        self.lists.clear();
        self.access_logs.clear();
    }
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}
