use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::broadcaster::Broadcaster;
use crate::cache::ViewCache;
use crate::config::AppConfig;
use crate::guard::ScrapeGuard;
use crate::message::Notification;
use crate::metrics::MetricsSnapshot;
use crate::poller::{spawn_poller, ChangeDetector, PollConfig, PollerHandle};
use crate::pool::DrainReport;
use crate::refresh::{RefreshPolicy, Refresher};
use crate::scraper::PriceSource;
use crate::store::PriceStore;
use crate::views::CatalogViews;

/// Wires the shared components together. Built once at startup; clones
/// share the same state.
#[derive(Clone)]
pub struct PriceHub {
    store: Arc<dyn PriceStore>,
    broadcaster: Broadcaster,
    views: CatalogViews,
    poll_config: PollConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    pub broadcast: DrainReport,
    pub refresh: DrainReport,
    pub closed_subscribers: usize,
}

impl PriceHub {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn PriceStore>,
        source: Arc<dyn PriceSource>,
    ) -> Self {
        let cache = ViewCache::new(config.cache.ttl());
        let broadcaster = Broadcaster::new(config.broadcast.workers, config.broadcast.send_timeout());
        let refresher = Refresher::new(
            source,
            Arc::clone(&store),
            cache.clone(),
            ScrapeGuard::new(),
            config.refresh.workers,
            RefreshPolicy {
                staleness: config.refresh.staleness(),
                cooldown: config.refresh.cooldown(),
            },
        );
        let views = CatalogViews::new(Arc::clone(&store), cache, refresher);
        let poll_config = PollConfig {
            interval: config.poller.interval(),
            initial_delay: config.poller.initial_delay(),
            batch_limit: config.poller.batch_limit,
        };
        Self {
            store,
            broadcaster,
            views,
            poll_config,
        }
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub fn views(&self) -> &CatalogViews {
        &self.views
    }

    /// Starts the change poller with its checkpoint at "now".
    pub fn start_poller(&self) -> PollerHandle {
        let detector = ChangeDetector::new(
            Arc::clone(&self.store),
            self.broadcaster.clone(),
            self.poll_config.batch_limit,
        );
        spawn_poller(detector, self.poll_config)
    }

    pub async fn metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot::collect(self.views.cache(), &self.broadcaster, self.views.refresher()).await
    }

    /// Stops the poller, tells subscribers we are going away, drains both
    /// pools within `grace` (aborting stragglers), then closes every
    /// subscriber connection.
    pub async fn shutdown(&self, poller: PollerHandle, grace: Duration) -> ShutdownReport {
        if let Err(err) = poller.stop().await {
            warn!(error = %err, "poller did not stop cleanly");
        }

        match self.broadcaster.broadcast(&Notification::shutdown()).await {
            Ok(delivery) => info!(subscribers = delivery.attempted(), "shutdown notice queued"),
            Err(err) => warn!(error = %err, "could not broadcast shutdown notice"),
        }

        let (broadcast, refresh) = tokio::join!(
            self.broadcaster.drain(grace),
            self.views.refresher().shutdown(grace)
        );
        let closed_subscribers = self.broadcaster.close_all().await;
        info!(closed_subscribers, "shutdown complete");

        ShutdownReport {
            broadcast,
            refresh,
            closed_subscribers,
        }
    }
}
