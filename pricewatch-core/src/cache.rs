use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Uniform-TTL key/value cache. Expiry is checked lazily on read; there is no
/// sweeper and no capacity bound.
pub struct TtlCache<V> {
    entries: Arc<RwLock<HashMap<String, CacheEntry<V>>>>,
    counters: Arc<Counters>,
    ttl: Duration,
}

impl<V> Clone for TtlCache<V> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            counters: Arc::clone(&self.counters),
            ttl: self.ttl,
        }
    }
}

/// Cache of rendered catalog views (`product:<id>`, `deals:<TYPE>`, ...).
pub type ViewCache = TtlCache<serde_json::Value>;

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            counters: Arc::new(Counters::default()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.inserted_at.elapsed() <= self.ttl => {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => {
                    self.counters.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        }

        // Stale: drop it unless a writer refreshed it in between.
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(key) {
            if entry.inserted_at.elapsed() <= self.ttl {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            entries.remove(key);
            debug!(key, "evicted stale cache entry");
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub async fn put(&self, key: impl Into<String>, value: V) {
        let entry = CacheEntry {
            value,
            inserted_at: Instant::now(),
        };
        self.entries.write().await.insert(key.into(), entry);
    }

    pub async fn invalidate(&self, key: &str) {
        if self.entries.write().await.remove(key).is_some() {
            debug!(key, "invalidated cache entry");
        }
    }

    /// Physical entry count, stale entries included.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn hits(&self) -> u64 {
        self.counters.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.counters.misses.load(Ordering::Relaxed)
    }

    /// Fraction of reads served from cache, 0.0 before the first read.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

pub fn product_key(id: &str) -> String {
    format!("product:{id}")
}

pub fn deals_key(label: &str) -> String {
    format!("deals:{label}")
}

pub fn search_key(query: &str) -> String {
    format!("search:name:{}", query.trim().to_lowercase())
}

pub fn category_key(group_id: u32) -> String {
    format!("search:category:{group_id}")
}

pub const CATEGORIES_KEY: &str = "categories:all";
