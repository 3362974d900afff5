use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::{category_key, deals_key, product_key, search_key, ViewCache, CATEGORIES_KEY};
use crate::error::ViewError;
use crate::guard::Acquire;
use crate::model::{DealFilter, DealType, PriceRecord, Product, ProductGroup};
use crate::refresh::{RefreshDecision, Refresher};
use crate::store::{Listing, PriceStore};

const HISTORY_LIMIT: usize = 30;
const DEALS_LIMIT: usize = 200;
const TRENDING_LIMIT: usize = 20;
const SEARCH_LIMIT: usize = 50;
const CATEGORY_LIMIT: usize = 100;
const SIMILAR_LIMIT: usize = 16;

#[derive(Debug, Clone, Serialize)]
pub struct PriceView {
    pub price: f64,
    pub original_price: f64,
    pub deal_type: DealType,
    pub discount_percent: i32,
    pub recorded_at: DateTime<Utc>,
}

impl From<&PriceRecord> for PriceView {
    fn from(record: &PriceRecord) -> Self {
        Self {
            price: record.price,
            original_price: record.original_price,
            deal_type: record.deal_type,
            discount_percent: record.discount_percent(),
            recorded_at: record.recorded_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ListingView {
    pub product_id: String,
    pub name: String,
    pub brand: Option<String>,
    pub url: String,
    pub image_url: Option<String>,
    pub group_id: Option<u32>,
    pub source: String,
    pub price: Option<PriceView>,
}

impl ListingView {
    fn new(product: &Product, price: Option<&PriceRecord>) -> Self {
        Self {
            product_id: product.id.clone(),
            name: product.name.clone(),
            brand: product.brand.clone(),
            url: product.url.clone(),
            image_url: product.image_url.clone(),
            group_id: product.group_id,
            source: product.source.clone(),
            price: price.map(PriceView::from),
        }
    }
}

impl From<&Listing> for ListingView {
    fn from(listing: &Listing) -> Self {
        ListingView::new(&listing.product, listing.price.as_ref())
    }
}

#[derive(Debug, Clone, Serialize)]
struct ProductDetail {
    #[serde(flatten)]
    listing: ListingView,
    group_name: Option<String>,
    history: Vec<PriceView>,
    similar_products: Vec<ListingView>,
}

#[derive(Debug, Clone, Serialize)]
struct CategoryView {
    group_id: u32,
    group_name: String,
    product_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshView {
    pub product_id: String,
    pub price: Option<PriceView>,
    pub scraped_new: bool,
}

/// Read paths of the catalog: cache first, store on miss, and for product
/// detail a staleness-gated background refresh.
#[derive(Clone)]
pub struct CatalogViews {
    store: Arc<dyn PriceStore>,
    cache: ViewCache,
    refresher: Refresher,
}

impl CatalogViews {
    pub fn new(store: Arc<dyn PriceStore>, cache: ViewCache, refresher: Refresher) -> Self {
        Self {
            store,
            cache,
            refresher,
        }
    }

    pub fn cache(&self) -> &ViewCache {
        &self.cache
    }

    pub fn refresher(&self) -> &Refresher {
        &self.refresher
    }

    pub async fn product(&self, id: &str) -> Result<Value, ViewError> {
        let key = product_key(id);
        let view = match self.cache.get(&key).await {
            Some(view) => {
                debug!(key = %key, hit_rate = self.cache.hit_rate(), "product view served from cache");
                view
            }
            None => {
                let product = self
                    .store
                    .product(id)
                    .await?
                    .ok_or_else(|| ViewError::NotFound(id.to_string()))?;
                let history = self.store.price_history(id, HISTORY_LIMIT).await?;
                let (group_name, similar) = match product.group_id {
                    Some(group_id) => (
                        self.store.group(group_id).await?.map(|g| g.group_name),
                        self.store.similar(group_id, id, SIMILAR_LIMIT).await?,
                    ),
                    None => (None, Vec::new()),
                };
                let detail = ProductDetail {
                    listing: ListingView::new(&product, history.first()),
                    group_name,
                    history: history.iter().map(PriceView::from).collect(),
                    similar_products: similar.iter().map(ListingView::from).collect(),
                };
                let view = serde_json::to_value(&detail)?;
                self.cache.put(key, view.clone()).await;
                view
            }
        };

        let decision = self.refresher.maybe_refresh(id, recorded_at_of(&view)).await;
        if decision == RefreshDecision::Unavailable {
            warn!(product_id = id, "refresh pool unavailable");
        }
        Ok(view)
    }

    pub async fn deals(&self, filter: DealFilter) -> Result<Value, ViewError> {
        let key = deals_key(filter.cache_label());
        if let Some(view) = self.cache.get(&key).await {
            return Ok(view);
        }
        let limit = match filter {
            DealFilter::Only(DealType::Trending) => TRENDING_LIMIT,
            _ => DEALS_LIMIT,
        };
        let listings = self.store.deals(filter, limit).await?;
        let products: Vec<ListingView> = listings.iter().map(ListingView::from).collect();
        let view = serde_json::json!({
            "deal_type": filter.cache_label(),
            "count": products.len(),
            "products": products,
        });
        self.cache.put(key, view.clone()).await;
        Ok(view)
    }

    pub async fn search(&self, query: &str) -> Result<Value, ViewError> {
        let key = search_key(query);
        if let Some(view) = self.cache.get(&key).await {
            return Ok(view);
        }
        let listings = self.store.search(query, SEARCH_LIMIT).await?;
        let products: Vec<ListingView> = listings.iter().map(ListingView::from).collect();
        let view = serde_json::json!({
            "query": query.trim(),
            "count": products.len(),
            "products": products,
        });
        self.cache.put(key, view.clone()).await;
        Ok(view)
    }

    /// Every known group with its product count.
    pub async fn categories(&self) -> Result<Value, ViewError> {
        if let Some(view) = self.cache.get(CATEGORIES_KEY).await {
            return Ok(view);
        }
        let groups = self.store.groups().await?;
        let categories: Vec<CategoryView> = groups
            .into_iter()
            .map(|g| CategoryView {
                group_id: g.group.group_id,
                group_name: g.group.group_name,
                product_count: g.product_count,
            })
            .collect();
        let view = serde_json::json!({
            "count": categories.len(),
            "categories": categories,
        });
        self.cache.put(CATEGORIES_KEY.to_string(), view.clone()).await;
        Ok(view)
    }

    /// Products of one group. A group with no products is `EmptyCategory`.
    pub async fn by_category(&self, group_id: u32) -> Result<Value, ViewError> {
        let key = category_key(group_id);
        if let Some(view) = self.cache.get(&key).await {
            return Ok(view);
        }
        let listings = self.store.by_group(group_id, CATEGORY_LIMIT).await?;
        if listings.is_empty() {
            return Err(ViewError::EmptyCategory(group_id));
        }
        let category_name = self.store.group(group_id).await?.map(|g| g.group_name);
        let products: Vec<ListingView> = listings.iter().map(ListingView::from).collect();
        let view = serde_json::json!({
            "group_id": group_id,
            "category_name": category_name,
            "count": products.len(),
            "products": products,
        });
        self.cache.put(key, view.clone()).await;
        Ok(view)
    }

    /// Adds or replaces a catalog entry and drops the cached views it shows
    /// up in: its detail, the category counts, and its old and new group.
    pub async fn upsert_product(&self, product: Product) -> Result<(), ViewError> {
        let key = product_key(&product.id);
        let previous_group = self.store.product(&product.id).await?.and_then(|p| p.group_id);
        let group = product.group_id;
        self.store.upsert_product(product).await?;
        self.cache.invalidate(&key).await;
        self.cache.invalidate(CATEGORIES_KEY).await;
        for group_id in previous_group.into_iter().chain(group) {
            self.cache.invalidate(&category_key(group_id)).await;
        }
        Ok(())
    }

    pub async fn upsert_group(&self, group: ProductGroup) -> Result<(), ViewError> {
        let key = category_key(group.group_id);
        self.store.upsert_group(group).await?;
        self.cache.invalidate(CATEGORIES_KEY).await;
        self.cache.invalidate(&key).await;
        Ok(())
    }

    /// Synchronous refresh: scrapes when the stored price is missing or stale
    /// (and the guard allows it), then drops the cached product view so the
    /// next read sees the new data. A failed scrape falls back to the stored
    /// price.
    pub async fn refresh_price(&self, id: &str) -> Result<RefreshView, ViewError> {
        if self.store.product(id).await?.is_none() {
            return Err(ViewError::NotFound(id.to_string()));
        }
        let latest = self.store.latest_price(id).await?;
        let needs_scrape = latest
            .as_ref()
            .map_or(true, |r| self.refresher.is_stale(r.recorded_at, Utc::now()));

        let mut scraped_new = false;
        let mut current = latest;
        if needs_scrape {
            match self.refresher.try_claim(id).await {
                Acquire::Granted => match self.refresher.refresh_now(id).await {
                    Ok(record) => {
                        scraped_new = true;
                        current = Some(record);
                    }
                    Err(err) => warn!(product_id = id, error = %err, "refresh failed, using stored price"),
                },
                Acquire::Denied { retry_in } => {
                    debug!(product_id = id, ?retry_in, "refresh throttled, using stored price");
                }
            }
        }
        self.cache.invalidate(&product_key(id)).await;

        Ok(RefreshView {
            product_id: id.to_string(),
            price: current.as_ref().map(PriceView::from),
            scraped_new,
        })
    }
}

fn recorded_at_of(view: &Value) -> Option<DateTime<Utc>> {
    view.get("price")?
        .get("recorded_at")?
        .as_str()?
        .parse::<DateTime<Utc>>()
        .ok()
}
