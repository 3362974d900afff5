#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pricewatch_core::{
    DealFilter, DealType, GroupCount, Listing, PriceChange, PriceRecord, PriceSource, PriceStore,
    Product, ProductGroup, ScrapeError, ScrapedPrice, SendError, StoreError, Subscriber,
};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let mut dir = std::env::temp_dir();
    dir.push(format!(
        "pricewatch_{prefix}_{}_{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    dir
}

pub fn product(id: &str, name: &str) -> Product {
    Product {
        id: id.into(),
        name: name.into(),
        brand: None,
        url: format!("https://tiki.vn/p/{id}"),
        image_url: Some(format!("https://img.example/{id}.jpg")),
        group_id: None,
        source: "tiki".into(),
    }
}

pub fn grouped(id: &str, name: &str, group_id: u32) -> Product {
    Product {
        group_id: Some(group_id),
        ..product(id, name)
    }
}

pub fn group(group_id: u32, name: &str) -> ProductGroup {
    ProductGroup {
        group_id,
        group_name: name.into(),
    }
}

pub fn record(id: &str, price: f64, original: f64, deal: DealType, at: DateTime<Utc>) -> PriceRecord {
    PriceRecord {
        product_id: id.into(),
        price,
        original_price: original,
        deal_type: deal,
        recorded_at: at,
    }
}

pub fn change(id: &str, price: f64, original: f64, at: DateTime<Utc>) -> PriceChange {
    PriceChange {
        entity_id: id.into(),
        price,
        original_price: original,
        deal_type: DealType::Normal,
        changed_at: at,
        product_name: None,
        image_url: None,
    }
}

/// Accepts every frame and keeps it.
#[derive(Default)]
pub struct RecordingSubscriber {
    frames: Mutex<Vec<String>>,
    closed: AtomicBool,
}

impl RecordingSubscriber {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn frames(&self) -> Vec<String> {
        self.frames.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<serde_json::Value> {
        self.frames()
            .iter()
            .map(|f| serde_json::from_str(f).unwrap())
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Subscriber for RecordingSubscriber {
    fn kind(&self) -> &'static str {
        "test"
    }

    async fn send(&self, frame: &str) -> Result<(), SendError> {
        self.frames.lock().unwrap().push(frame.to_string());
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.is_closed()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Reports open but every send fails.
#[derive(Default)]
pub struct FailingSubscriber {
    pub attempts: AtomicUsize,
    closed: AtomicBool,
}

impl FailingSubscriber {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Subscriber for FailingSubscriber {
    fn kind(&self) -> &'static str {
        "failing"
    }

    async fn send(&self, _frame: &str) -> Result<(), SendError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(SendError::Closed)
    }

    fn is_open(&self) -> bool {
        true
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// A peer that never finishes a send.
#[derive(Default)]
pub struct HangingSubscriber;

#[async_trait]
impl Subscriber for HangingSubscriber {
    fn kind(&self) -> &'static str {
        "hanging"
    }

    async fn send(&self, _frame: &str) -> Result<(), SendError> {
        std::future::pending::<()>().await;
        Ok(())
    }

    fn is_open(&self) -> bool {
        true
    }

    fn close(&self) {}
}

/// In-memory change feed that counts queries and can be told to fail.
#[derive(Default)]
pub struct ScriptedStore {
    changes: Mutex<Vec<PriceChange>>,
    pub queries: AtomicUsize,
    fail: AtomicBool,
}

impl ScriptedStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, change: PriceChange) {
        self.changes.lock().unwrap().push(change);
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PriceStore for ScriptedStore {
    async fn changed_since(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<PriceChange>, StoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("scripted outage".into()));
        }
        let mut rows: Vec<PriceChange> = self
            .changes
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.changed_at > since)
            .cloned()
            .collect();
        rows.sort_by_key(|c| c.changed_at);
        rows.truncate(limit);
        Ok(rows)
    }

    async fn product(&self, _id: &str) -> Result<Option<Product>, StoreError> {
        Ok(None)
    }

    async fn latest_price(&self, _id: &str) -> Result<Option<PriceRecord>, StoreError> {
        Ok(None)
    }

    async fn price_history(&self, _id: &str, _limit: usize) -> Result<Vec<PriceRecord>, StoreError> {
        Ok(Vec::new())
    }

    async fn deals(&self, _filter: DealFilter, _limit: usize) -> Result<Vec<Listing>, StoreError> {
        Ok(Vec::new())
    }

    async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<Listing>, StoreError> {
        Ok(Vec::new())
    }

    async fn groups(&self) -> Result<Vec<GroupCount>, StoreError> {
        Ok(Vec::new())
    }

    async fn group(&self, _group_id: u32) -> Result<Option<ProductGroup>, StoreError> {
        Ok(None)
    }

    async fn by_group(&self, _group_id: u32, _limit: usize) -> Result<Vec<Listing>, StoreError> {
        Ok(Vec::new())
    }

    async fn similar(
        &self,
        _group_id: u32,
        _exclude_id: &str,
        _limit: usize,
    ) -> Result<Vec<Listing>, StoreError> {
        Ok(Vec::new())
    }

    async fn upsert_product(&self, _product: Product) -> Result<(), StoreError> {
        Ok(())
    }

    async fn upsert_group(&self, _group: ProductGroup) -> Result<(), StoreError> {
        Ok(())
    }

    async fn record_price(&self, id: &str, _scraped: ScrapedPrice) -> Result<PriceRecord, StoreError> {
        Err(StoreError::NotFound(id.to_string()))
    }
}

/// Price source with a fixed answer and an optional delay.
pub struct StubSource {
    answer: Mutex<Result<ScrapedPrice, u16>>,
    delay: Duration,
    pub calls: AtomicUsize,
}

impl StubSource {
    pub fn returning(price: f64, original: f64, deal: DealType) -> Arc<Self> {
        Arc::new(Self {
            answer: Mutex::new(Ok(ScrapedPrice {
                price,
                original_price: original,
                deal_type: deal,
            })),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(status: u16) -> Arc<Self> {
        Arc::new(Self {
            answer: Mutex::new(Err(status)),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn hanging() -> Arc<Self> {
        Arc::new(Self {
            answer: Mutex::new(Err(504)),
            delay: Duration::from_secs(3600),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PriceSource for StubSource {
    async fn fetch(&self, _entity_id: &str) -> Result<ScrapedPrice, ScrapeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.answer.lock().unwrap().clone().map_err(ScrapeError::Status)
    }
}
