//! Bounded LRU query cache with per-entry TTL.
//!
//! Caches final retrieval results keyed by
//! `sha1(collection \n normalized_query \n filter_json)`. Entries expire
//! after the configured TTL and are removed eagerly on `get`; every write
//! to a collection invalidates that collection's entries. The cache is
//! the only process-wide mutable state in the core and sits behind a
//! single mutex.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use sha1::{Digest, Sha1};

use crate::retrieve::Retrieved;

/// Default cache capacity in entries.
pub const DEFAULT_CACHE_SIZE: usize = 200;
/// Default entry time-to-live.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(600);

/// A cache key: collection plus digest of the normalized query and
/// filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    collection: String,
    digest: [u8; 20],
}

impl CacheKey {
    /// Builds a key from its parts.
    ///
    /// The query is normalized (trimmed, lowercased, whitespace
    /// collapsed) so trivially different phrasings share an entry.
    #[must_use]
    pub fn new(collection: &str, query: &str, filter_json: &str) -> Self {
        let normalized = normalize_query(query);
        let mut hasher = Sha1::new();
        hasher.update(collection.as_bytes());
        hasher.update(b"\n");
        hasher.update(normalized.as_bytes());
        hasher.update(b"\n");
        hasher.update(filter_json.as_bytes());
        Self {
            collection: collection.to_string(),
            digest: hasher.finalize().into(),
        }
    }

    /// Collection this key belongs to.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Hex form of the digest, for logging.
    #[must_use]
    pub fn hex(&self) -> String {
        self.digest.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Collapses whitespace and case so equivalent queries share a key.
fn normalize_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// A cached value with its insertion timestamp.
struct Entry {
    value: Vec<Retrieved>,
    inserted_at: Instant,
}

/// Observable cache counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    /// Lookups that returned a live entry.
    pub hits: u64,
    /// Lookups that missed or hit an expired entry.
    pub misses: u64,
    /// Entries evicted by capacity pressure.
    pub evictions: u64,
    /// Current entry count.
    pub size: usize,
}

impl CacheStats {
    /// Hit rate in [0, 1]; 0 when no lookups have happened.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Bounded LRU cache with per-entry TTL.
pub struct QueryCache {
    inner: Mutex<CacheInner>,
    ttl: Duration,
}

struct CacheInner {
    entries: LruCache<CacheKey, Entry>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl QueryCache {
    /// Creates a cache with the given capacity and TTL.
    ///
    /// A zero capacity is clamped to one entry; `Settings::validate`
    /// rejects it earlier in normal startup.
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(CacheInner {
                entries: LruCache::new(capacity),
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            ttl,
        }
    }

    /// Creates a cache with the default capacity and TTL.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_CACHE_SIZE, DEFAULT_CACHE_TTL)
    }

    /// Looks up a key. Expired entries are removed eagerly and count as
    /// misses.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<Vec<Retrieved>> {
        let Ok(mut inner) = self.inner.lock() else {
            return None;
        };

        let expired = inner
            .entries
            .get(key)
            .is_some_and(|e| e.inserted_at.elapsed() > self.ttl);
        if expired {
            inner.entries.pop(key);
        }

        let result = inner.entries.get(key).map(|entry| entry.value.clone());
        if result.is_some() {
            inner.hits += 1;
        } else {
            inner.misses += 1;
        }
        result
    }

    /// Inserts a value, evicting the least-recently-used entry when at
    /// capacity.
    pub fn put(&self, key: CacheKey, value: Vec<Retrieved>) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        let displaced = inner.entries.push(
            key.clone(),
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
        // push returns the replaced entry for the same key or the evicted
        // LRU entry; only the latter counts as an eviction
        if let Some((old_key, _)) = displaced
            && old_key != key
        {
            inner.evictions += 1;
        }
    }

    /// Removes every entry matching the predicate.
    pub fn invalidate<F: Fn(&CacheKey) -> bool>(&self, predicate: F) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        let doomed: Vec<CacheKey> = inner
            .entries
            .iter()
            .filter(|(k, _)| predicate(k))
            .map(|(k, _)| k.clone())
            .collect();
        for key in doomed {
            inner.entries.pop(&key);
        }
    }

    /// Removes every entry belonging to `collection`. Called on each
    /// upsert or delete targeting it.
    pub fn invalidate_collection(&self, collection: &str) {
        self.invalidate(|key| key.collection() == collection);
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.inner.lock().map_or_else(
            |_| CacheStats::default(),
            |inner| CacheStats {
                hits: inner.hits,
                misses: inner.misses,
                evictions: inner.evictions,
                size: inner.entries.len(),
            },
        )
    }
}
