use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{discount_percent, DealType, PriceChange};

pub const WELCOME_MESSAGE: &str = "Welcome to Price Tracker";
pub const SHUTDOWN_MESSAGE: &str = "Server is shutting down";

/// Everything pushed to subscribers. Each variant carries full state so a
/// missed push heals on the next one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    PriceUpdate(PriceUpdate),
    Connected { message: String },
    ServerShutdown { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceUpdate {
    pub entity_id: String,
    pub current_price: f64,
    pub original_price: f64,
    pub discount_percent: i32,
    pub deal_type: DealType,
    pub changed_at: String,
    pub emitted_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl PriceUpdate {
    pub fn from_change(change: &PriceChange, emitted_at: DateTime<Utc>) -> Self {
        Self {
            entity_id: change.entity_id.clone(),
            current_price: change.price,
            original_price: change.original_price,
            discount_percent: discount_percent(change.price, change.original_price),
            deal_type: change.deal_type,
            changed_at: change
                .changed_at
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            emitted_at: emitted_at.timestamp_millis(),
            product_name: change.product_name.clone(),
            image_url: change.image_url.clone(),
        }
    }
}

impl Notification {
    pub fn connected() -> Self {
        Notification::Connected {
            message: WELCOME_MESSAGE.to_string(),
        }
    }

    pub fn shutdown() -> Self {
        Notification::ServerShutdown {
            message: SHUTDOWN_MESSAGE.to_string(),
        }
    }

    pub fn price_update(change: &PriceChange) -> Self {
        Notification::PriceUpdate(PriceUpdate::from_change(change, Utc::now()))
    }

    /// Wire encoding shared by every transport.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
