use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::cache::{product_key, ViewCache};
use crate::error::RefreshError;
use crate::guard::{Acquire, ScrapeGuard};
use crate::model::PriceRecord;
use crate::pool::{DrainReport, WorkerPool};
use crate::scraper::PriceSource;
use crate::store::PriceStore;

pub const DEFAULT_STALENESS: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy)]
pub struct RefreshPolicy {
    /// Age past which stored data is worth refreshing at all.
    pub staleness: Duration,
    /// Minimum spacing between two attempts for the same entity.
    pub cooldown: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            staleness: DEFAULT_STALENESS,
            cooldown: crate::guard::DEFAULT_COOLDOWN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshDecision {
    Fresh,
    /// No recorded price to age against; background refresh is skipped.
    NoHistory,
    Throttled { retry_in: Duration },
    Scheduled,
    /// The refresh pool is shutting down.
    Unavailable,
}

/// Background price refresh against the external source, gated first by
/// staleness and then by the per-entity [`ScrapeGuard`].
#[derive(Clone)]
pub struct Refresher {
    source: Arc<dyn PriceSource>,
    store: Arc<dyn PriceStore>,
    cache: ViewCache,
    guard: ScrapeGuard,
    pool: WorkerPool,
    policy: RefreshPolicy,
}

impl Refresher {
    pub fn new(
        source: Arc<dyn PriceSource>,
        store: Arc<dyn PriceStore>,
        cache: ViewCache,
        guard: ScrapeGuard,
        workers: usize,
        policy: RefreshPolicy,
    ) -> Self {
        Self {
            source,
            store,
            cache,
            guard,
            pool: WorkerPool::new("refresh", workers),
            policy,
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn guard(&self) -> &ScrapeGuard {
        &self.guard
    }

    pub fn is_stale(&self, recorded_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(recorded_at);
        match age.to_std() {
            Ok(age) => age > self.policy.staleness,
            // Recorded in the future: treat as fresh.
            Err(_) => false,
        }
    }

    /// Claims the guard slot for `entity_id`.
    pub async fn try_claim(&self, entity_id: &str) -> Acquire {
        self.guard.try_acquire(entity_id, self.policy.cooldown).await
    }

    /// Queues a background refresh when the stored price is stale and no
    /// other attempt for the same entity happened within the cooldown.
    pub async fn maybe_refresh(
        &self,
        entity_id: &str,
        last_recorded: Option<DateTime<Utc>>,
    ) -> RefreshDecision {
        let Some(recorded_at) = last_recorded else {
            return RefreshDecision::NoHistory;
        };
        if !self.is_stale(recorded_at, Utc::now()) {
            return RefreshDecision::Fresh;
        }
        if let Acquire::Denied { retry_in } = self.try_claim(entity_id).await {
            return RefreshDecision::Throttled { retry_in };
        }

        let this = self.clone();
        let id = entity_id.to_string();
        let queued = self
            .pool
            .submit(async move {
                match this.refresh_now(&id).await {
                    Ok(record) => info!(
                        entity_id = %id,
                        price = record.price,
                        deal = %record.deal_type,
                        "background refresh stored new price"
                    ),
                    Err(err) => warn!(entity_id = %id, error = %err, "background refresh failed"),
                }
            })
            .await;
        if queued {
            info!(entity_id, "background refresh scheduled");
            RefreshDecision::Scheduled
        } else {
            RefreshDecision::Unavailable
        }
    }

    /// Fetches, stores and invalidates the cached product view. Does not
    /// consult the guard; callers decide whether an attempt is allowed.
    pub async fn refresh_now(&self, entity_id: &str) -> Result<PriceRecord, RefreshError> {
        let scraped = self.source.fetch(entity_id).await?;
        let record = self.store.record_price(entity_id, scraped).await?;
        self.cache.invalidate(&product_key(entity_id)).await;
        Ok(record)
    }

    pub async fn shutdown(&self, grace: Duration) -> DrainReport {
        self.pool.shutdown(grace).await
    }
}
