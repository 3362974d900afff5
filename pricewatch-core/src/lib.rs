pub mod broadcaster;
pub mod cache;
pub mod config;
pub mod error;
pub mod guard;
pub mod hub;
pub mod message;
pub mod metrics;
pub mod model;
pub mod poller;
pub mod pool;
pub mod refresh;
pub mod scraper;
pub mod store;
pub mod subscriber;
pub mod views;

pub use broadcaster::{Broadcaster, Delivery, DeliverySummary};
pub use cache::{TtlCache, ViewCache};
pub use config::AppConfig;
pub use error::{
    BroadcastError, ConfigError, PollError, RefreshError, ScrapeError, SendError, StoreError,
    UnknownDealType, ViewError,
};
pub use guard::{Acquire, ScrapeGuard};
pub use hub::{PriceHub, ShutdownReport};
pub use message::{Notification, PriceUpdate};
pub use metrics::MetricsSnapshot;
pub use model::{
    DealFilter, DealThresholds, DealType, PriceChange, PriceRecord, Product, ProductGroup,
    ScrapedPrice,
};
pub use poller::{spawn_poller, ChangeDetector, PollConfig, PollOutcome, PollerHandle};
pub use pool::{DrainReport, WorkerPool};
pub use refresh::{RefreshDecision, RefreshPolicy, Refresher};
pub use scraper::{HttpScraper, PriceSource};
pub use store::{FileStore, GroupCount, Listing, PriceStore};
pub use subscriber::{Subscriber, SubscriberId};
pub use views::CatalogViews;
