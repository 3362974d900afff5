use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::UnknownDealType;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub brand: Option<String>,
    pub url: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub group_id: Option<u32>,
    #[serde(default = "default_source")]
    pub source: String,
}

fn default_source() -> String {
    "tiki".to_string()
}

/// A product category; products point at one through `Product::group_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProductGroup {
    pub group_id: u32,
    pub group_name: String,
}

/// One row of the append-only price history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceRecord {
    pub product_id: String,
    pub price: f64,
    pub original_price: f64,
    pub deal_type: DealType,
    pub recorded_at: DateTime<Utc>,
}

impl PriceRecord {
    pub fn discount_percent(&self) -> i32 {
        discount_percent(self.price, self.original_price)
    }
}

/// A price-relevant row returned by a change query.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceChange {
    pub entity_id: String,
    pub price: f64,
    pub original_price: f64,
    pub deal_type: DealType,
    pub changed_at: DateTime<Utc>,
    pub product_name: Option<String>,
    pub image_url: Option<String>,
}

/// Fields returned by the external price source for a single product.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapedPrice {
    pub price: f64,
    pub original_price: f64,
    pub deal_type: DealType,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DealType {
    FlashSale,
    HotDeal,
    Trending,
    Normal,
}

impl DealType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DealType::FlashSale => "FLASH_SALE",
            DealType::HotDeal => "HOT_DEAL",
            DealType::Trending => "TRENDING",
            DealType::Normal => "NORMAL",
        }
    }

    pub fn is_deal(&self) -> bool {
        !matches!(self, DealType::Normal)
    }
}

impl fmt::Display for DealType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DealType {
    type Err = UnknownDealType;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "FLASH_SALE" => Ok(DealType::FlashSale),
            "HOT_DEAL" | "DEAL_HOT" => Ok(DealType::HotDeal),
            "TRENDING" => Ok(DealType::Trending),
            "NORMAL" => Ok(DealType::Normal),
            _ => Err(UnknownDealType(value.to_string())),
        }
    }
}

/// Filter accepted by the deals view: one deal type, or every non-normal type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DealFilter {
    All,
    Only(DealType),
}

impl DealFilter {
    pub fn matches(&self, deal_type: DealType) -> bool {
        match self {
            DealFilter::All => deal_type.is_deal(),
            DealFilter::Only(wanted) => *wanted == deal_type,
        }
    }

    pub fn cache_label(&self) -> &'static str {
        match self {
            DealFilter::All => "ALL",
            DealFilter::Only(deal_type) => deal_type.as_str(),
        }
    }
}

impl FromStr for DealFilter {
    type Err = UnknownDealType;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.trim().eq_ignore_ascii_case("all") {
            Ok(DealFilter::All)
        } else {
            value.parse().map(DealFilter::Only)
        }
    }
}

/// Minimum discount (in whole percent) for each deal tier, checked from the
/// highest tier down.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DealThresholds {
    pub tiers: Vec<DealTier>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DealTier {
    pub min_percent: i32,
    pub deal_type: DealType,
}

impl Default for DealThresholds {
    fn default() -> Self {
        Self {
            tiers: vec![
                DealTier {
                    min_percent: 50,
                    deal_type: DealType::FlashSale,
                },
                DealTier {
                    min_percent: 30,
                    deal_type: DealType::HotDeal,
                },
                DealTier {
                    min_percent: 10,
                    deal_type: DealType::Trending,
                },
            ],
        }
    }
}

impl DealThresholds {
    pub fn classify(&self, price: f64, original_price: f64) -> DealType {
        classify(price, original_price, self)
    }
}

/// Whole-percent discount of `price` against `original_price`; zero when
/// there is no real markdown.
pub fn discount_percent(price: f64, original_price: f64) -> i32 {
    if original_price <= 0.0 || original_price <= price {
        return 0;
    }
    (((original_price - price) / original_price) * 100.0).round() as i32
}

pub fn classify(price: f64, original_price: f64, thresholds: &DealThresholds) -> DealType {
    let discount = discount_percent(price, original_price);
    let mut tiers: Vec<&DealTier> = thresholds.tiers.iter().collect();
    tiers.sort_by(|a, b| b.min_percent.cmp(&a.min_percent));
    tiers
        .into_iter()
        .find(|tier| discount >= tier.min_percent)
        .map(|tier| tier.deal_type)
        .unwrap_or(DealType::Normal)
}
