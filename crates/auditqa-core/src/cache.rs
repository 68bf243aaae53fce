//! Process-wide caches for repeated backend calls
//!
//! Two pure-function caches exist: query text → embedding, and
//! (doc set, keywords) → keyword frequencies. Neither depends on store-side
//! mutation within a query's lifetime, so there is no invalidation protocol;
//! operators flush by restarting after an index rebuild.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::RwLock;

/// Capacity of the query-embedding cache
pub const EMBEDDING_CACHE_CAPACITY: usize = 100;

/// Capacity of the keyword-frequency cache
pub const KEYWORD_FREQ_CACHE_CAPACITY: usize = 1000;

/// Bounded LRU cache behind an `RwLock`.
///
/// Lookups take the write lock to refresh recency; values are cloned out, so
/// misses can compute outside the lock and install afterwards.
pub struct LruCache<K, V> {
    inner: RwLock<LruInner<K, V>>,
    capacity: usize,
}

struct LruInner<K, V> {
    entries: HashMap<K, V>,
    /// Most recently used at the end
    order: Vec<K>,
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(LruInner {
                entries: HashMap::new(),
                order: Vec::new(),
            }),
            capacity,
        }
    }

    /// Get a value, marking it most recently used
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.write().ok()?;
        let value = inner.entries.get(key).cloned()?;
        if let Some(pos) = inner.order.iter().position(|k| k == key) {
            let k = inner.order.remove(pos);
            inner.order.push(k);
        }
        Some(value)
    }

    /// Insert a value, evicting the least recently used entry when full
    pub fn put(&self, key: K, value: V) {
        let Ok(mut inner) = self.inner.write() else {
            return;
        };
        if inner.entries.insert(key.clone(), value).is_some() {
            if let Some(pos) = inner.order.iter().position(|k| k == &key) {
                inner.order.remove(pos);
            }
        } else if inner.entries.len() > self.capacity {
            if !inner.order.is_empty() {
                let evicted = inner.order.remove(0);
                inner.entries.remove(&evicted);
            }
        }
        inner.order.push(key);
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.inner.read().map(|i| i.entries.len()).unwrap_or(0)
    }

    /// True when the cache holds nothing
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry
    pub fn clear(&self) {
        if let Ok(mut inner) = self.inner.write() {
            inner.entries.clear();
            inner.order.clear();
        }
    }
}

/// Cache key for a query embedding
pub fn embedding_cache_key(model: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update([0]);
    hasher.update(text.as_bytes());
    format!("embed:{:x}", hasher.finalize())
}

/// Cache key for a keyword-frequency aggregation over a document set
pub fn keyword_freq_cache_key(doc_ids: &[String], keywords: &[String]) -> String {
    let mut docs: Vec<&str> = doc_ids.iter().map(String::as_str).collect();
    docs.sort_unstable();
    let mut kws: Vec<&str> = keywords.iter().map(String::as_str).collect();
    kws.sort_unstable();
    format!("{}|{}", docs.join(","), kws.join(","))
}
