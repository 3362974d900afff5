use serde::Serialize;

use crate::broadcaster::Broadcaster;
use crate::cache::ViewCache;
use crate::pool::WorkerPool;
use crate::refresh::Refresher;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CacheMetrics {
    pub hit_rate_percent: f64,
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub ttl_seconds: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PoolMetrics {
    pub running: usize,
    pub pending: usize,
    pub capacity: usize,
}

impl PoolMetrics {
    async fn of(pool: &WorkerPool) -> Self {
        Self {
            running: pool.running(),
            pending: pool.pending().await,
            capacity: pool.capacity(),
        }
    }
}

/// Point-in-time numbers for an external metrics collector.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MetricsSnapshot {
    pub cache: CacheMetrics,
    pub subscribers: usize,
    pub broadcast_pool: PoolMetrics,
    pub refresh_pool: PoolMetrics,
    pub throttled_entities: usize,
}

impl MetricsSnapshot {
    pub async fn collect(cache: &ViewCache, broadcaster: &Broadcaster, refresher: &Refresher) -> Self {
        Self {
            cache: CacheMetrics {
                hit_rate_percent: (cache.hit_rate() * 10_000.0).round() / 100.0,
                hits: cache.hits(),
                misses: cache.misses(),
                size: cache.len().await,
                ttl_seconds: cache.ttl().as_secs(),
            },
            subscribers: broadcaster.subscriber_count().await,
            broadcast_pool: PoolMetrics::of(broadcaster.pool()).await,
            refresh_pool: PoolMetrics::of(refresher.pool()).await,
            throttled_entities: refresher.guard().tracked().await,
        }
    }
}
