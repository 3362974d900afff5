mod error;
mod routes;
mod transport;

use std::sync::Arc;

use anyhow::Context;
use pricewatch_core::{AppConfig, FileStore, HttpScraper, PollerHandle, PriceHub};
use reqwest::{redirect, ClientBuilder};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let data_dir = config.data_dir().context("no data directory available")?;
    let store = FileStore::open(&data_dir)
        .await
        .with_context(|| format!("failed to open store at {}", data_dir.display()))?;
    info!(path = %data_dir.display(), products = store.product_count().await, "store opened");

    let client = ClientBuilder::new()
        .redirect(redirect::Policy::limited(5))
        .user_agent("PriceWatch/0.1")
        .timeout(config.scraper.request_timeout())
        .build()
        .context("failed to build HTTP client")?;
    let scraper = HttpScraper::new(
        client,
        &config.scraper.base_url,
        config.scraper.request_timeout(),
        config.deals.clone(),
    )
    .context("invalid scraper base URL")?;

    let hub = PriceHub::new(&config, Arc::new(store), Arc::new(scraper));
    let poller = hub.start_poller();

    let addr = (config.server.bind.as_str(), config.server.port);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}:{}", addr.0, addr.1))?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "listening");

    let grace = config.broadcast.shutdown_grace();
    axum::serve(listener, routes::router(hub.clone()))
        .with_graceful_shutdown(shutdown_signal(hub, poller, grace))
        .await
        .context("server error")?;

    info!("server stopped");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Resolves after ctrl-c once the hub has notified and closed every
/// subscriber, so open event streams end and axum can finish.
async fn shutdown_signal(hub: PriceHub, poller: PollerHandle, grace: std::time::Duration) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c");
        return;
    }
    info!("shutdown requested");
    let report = hub.shutdown(poller, grace).await;
    info!(
        broadcast_drained = report.broadcast.drained,
        broadcast_aborted = report.broadcast.aborted,
        refresh_drained = report.refresh.drained,
        refresh_aborted = report.refresh.aborted,
        closed_subscribers = report.closed_subscribers,
        "hub shut down"
    );
}
