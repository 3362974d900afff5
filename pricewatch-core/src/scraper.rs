use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::ScrapeError;
use crate::model::{DealThresholds, DealType, ScrapedPrice};

/// External source of current prices. Slow and rate-sensitive; only called
/// from the guarded refresh paths.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch(&self, entity_id: &str) -> Result<ScrapedPrice, ScrapeError>;
}

#[derive(Debug, Deserialize)]
struct ProductPayload {
    price: Option<f64>,
    list_price: Option<f64>,
    original_price: Option<f64>,
    #[serde(default)]
    badges: Vec<Badge>,
}

#[derive(Debug, Deserialize)]
struct Badge {
    #[serde(default)]
    code: String,
}

/// Reads `GET {base_url}/api/v2/products/{id}` from a marketplace JSON API.
#[derive(Debug, Clone)]
pub struct HttpScraper {
    client: Client,
    base_url: Url,
    timeout: Duration,
    thresholds: DealThresholds,
}

impl HttpScraper {
    pub fn new(
        client: Client,
        base_url: &str,
        timeout: Duration,
        thresholds: DealThresholds,
    ) -> Result<Self, ScrapeError> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            client,
            base_url,
            timeout,
            thresholds,
        })
    }

    fn product_url(&self, entity_id: &str) -> Result<Url, ScrapeError> {
        Ok(self.base_url.join(&format!("api/v2/products/{entity_id}"))?)
    }
}

#[async_trait]
impl PriceSource for HttpScraper {
    async fn fetch(&self, entity_id: &str) -> Result<ScrapedPrice, ScrapeError> {
        let url = self.product_url(entity_id)?;
        debug!(%url, "fetching price");
        let response = self.client.get(url).timeout(self.timeout).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::Status(status.as_u16()));
        }
        let bytes = response.bytes().await?;
        let payload: ProductPayload =
            serde_json::from_slice(&bytes).map_err(|e| ScrapeError::Payload(e.to_string()))?;
        parse_payload(payload, &self.thresholds)
    }
}

fn parse_payload(payload: ProductPayload, thresholds: &DealThresholds) -> Result<ScrapedPrice, ScrapeError> {
    let price = payload
        .price
        .filter(|p| *p > 0.0)
        .ok_or_else(|| ScrapeError::Payload("missing price".to_string()))?;
    let original_price = payload
        .list_price
        .or(payload.original_price)
        .filter(|p| *p > 0.0)
        .unwrap_or(price);

    let badge_deal = payload.badges.iter().find_map(|badge| match badge.code.as_str() {
        "flash_sale" => Some(DealType::FlashSale),
        "deal_1" => Some(DealType::HotDeal),
        _ => None,
    });
    let deal_type = badge_deal.unwrap_or_else(|| thresholds.classify(price, original_price));

    Ok(ScrapedPrice {
        price,
        original_price,
        deal_type,
    })
}
