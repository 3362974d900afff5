use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("product {0} not found")]
    NotFound(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown deal type: {0}")]
pub struct UnknownDealType(pub String);

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("invalid scraper url: {0}")]
    Url(#[from] url::ParseError),
    #[error("source returned status {0}")]
    Status(u16),
    #[error("malformed payload: {0}")]
    Payload(String),
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("change query failed: {0}")]
    Store(#[from] StoreError),
    #[error("poller task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("subscriber connection is closed")]
    Closed,
    #[error("subscriber buffer is full")]
    Full,
    #[error("send timed out")]
    Timeout,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no config directory available")]
    NoConfigDir,
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("message encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("broadcaster is shut down")]
    Closed,
}

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("scrape failed: {0}")]
    Scrape(#[from] ScrapeError),
    #[error("store write failed: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ViewError {
    #[error("{0}")]
    Store(#[from] StoreError),
    #[error("product {0} not found")]
    NotFound(String),
    #[error("no products in category {0}")]
    EmptyCategory(u32),
    #[error("view encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}
