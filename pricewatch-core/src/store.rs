use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::model::{DealFilter, PriceChange, PriceRecord, Product, ProductGroup, ScrapedPrice};

/// A product together with its most recent price, if it has one.
#[derive(Debug, Clone, PartialEq)]
pub struct Listing {
    pub product: Product,
    pub price: Option<PriceRecord>,
}

/// A group and how many catalog products point at it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupCount {
    pub group: ProductGroup,
    pub product_count: usize,
}

/// Persistent catalog and price history. Queries are side-effect free.
#[async_trait]
pub trait PriceStore: Send + Sync {
    /// Rows recorded strictly after `since`, ascending by change time, at most
    /// `limit` of them.
    async fn changed_since(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<PriceChange>, StoreError>;

    async fn product(&self, id: &str) -> Result<Option<Product>, StoreError>;

    async fn latest_price(&self, id: &str) -> Result<Option<PriceRecord>, StoreError>;

    /// Newest first.
    async fn price_history(&self, id: &str, limit: usize) -> Result<Vec<PriceRecord>, StoreError>;

    /// Latest record per product that matches `filter` and is actually marked
    /// down, ordered by discount descending.
    async fn deals(&self, filter: DealFilter, limit: usize) -> Result<Vec<Listing>, StoreError>;

    /// Case-insensitive substring match on product name.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Listing>, StoreError>;

    /// Every known group with its product count, ascending by group id.
    async fn groups(&self) -> Result<Vec<GroupCount>, StoreError>;

    async fn group(&self, group_id: u32) -> Result<Option<ProductGroup>, StoreError>;

    /// Products in one group, ordered by name.
    async fn by_group(&self, group_id: u32, limit: usize) -> Result<Vec<Listing>, StoreError>;

    /// Products sharing `group_id`, minus `exclude_id`.
    async fn similar(
        &self,
        group_id: u32,
        exclude_id: &str,
        limit: usize,
    ) -> Result<Vec<Listing>, StoreError>;

    async fn upsert_product(&self, product: Product) -> Result<(), StoreError>;

    async fn upsert_group(&self, group: ProductGroup) -> Result<(), StoreError>;

    /// Appends a price record stamped with the current time.
    async fn record_price(&self, id: &str, scraped: ScrapedPrice) -> Result<PriceRecord, StoreError>;
}

#[derive(Debug, Default)]
struct Catalog {
    products: HashMap<String, Product>,
    groups: HashMap<u32, ProductGroup>,
    history: Vec<PriceRecord>,
}

impl Catalog {
    fn latest(&self, id: &str) -> Option<&PriceRecord> {
        self.history
            .iter()
            .filter(|r| r.product_id == id)
            .max_by_key(|r| r.recorded_at)
    }

    fn latest_per_product(&self) -> HashMap<&str, &PriceRecord> {
        let mut latest: HashMap<&str, &PriceRecord> = HashMap::new();
        for record in &self.history {
            latest
                .entry(record.product_id.as_str())
                .and_modify(|current| {
                    if record.recorded_at >= current.recorded_at {
                        *current = record;
                    }
                })
                .or_insert(record);
        }
        latest
    }

    fn listing(&self, product: &Product) -> Listing {
        Listing {
            product: product.clone(),
            price: self.latest(&product.id).cloned(),
        }
    }

    fn in_group(&self, group_id: u32, exclude_id: Option<&str>, limit: usize) -> Vec<Listing> {
        let mut found: Vec<&Product> = self
            .products
            .values()
            .filter(|p| p.group_id == Some(group_id) && Some(p.id.as_str()) != exclude_id)
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        found.truncate(limit);
        found.into_iter().map(|p| self.listing(p)).collect()
    }
}

/// JSON-file backed store: `products.json`, `groups.json` and
/// `price_history.json` in one data directory, each written through a
/// `.json.tmp` sibling and renamed.
///
/// Writers hold the catalog write lock until the rename completes, so at
/// most one writer touches a tmp file at a time.
#[derive(Debug, Clone)]
pub struct FileStore {
    catalog: Arc<RwLock<Catalog>>,
    products_path: PathBuf,
    groups_path: PathBuf,
    history_path: PathBuf,
}

async fn read_json_with_tmp_fallback<T: DeserializeOwned + Default>(path: &Path) -> T {
    match tokio::fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice::<T>(&bytes) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, path = %path.display(), "failed to parse JSON, trying tmp fallback");
                let tmp = path.with_extension("json.tmp");
                match tokio::fs::read(&tmp).await {
                    Ok(tmp_bytes) => serde_json::from_slice::<T>(&tmp_bytes).unwrap_or_default(),
                    Err(_) => Default::default(),
                }
            }
        },
        Err(_) => Default::default(),
    }
}

async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

impl FileStore {
    /// Opens (creating if needed) the data directory. Failing to create it is
    /// fatal for the caller; unreadable files start empty.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir).await?;
        let products_path = dir.join("products.json");
        let groups_path = dir.join("groups.json");
        let history_path = dir.join("price_history.json");

        let products: Vec<Product> = read_json_with_tmp_fallback(&products_path).await;
        let groups: Vec<ProductGroup> = read_json_with_tmp_fallback(&groups_path).await;
        let history: Vec<PriceRecord> = read_json_with_tmp_fallback(&history_path).await;
        debug!(
            products = products.len(),
            groups = groups.len(),
            records = history.len(),
            dir = %dir.display(),
            "file store opened"
        );

        let catalog = Catalog {
            products: products.into_iter().map(|p| (p.id.clone(), p)).collect(),
            groups: groups.into_iter().map(|g| (g.group_id, g)).collect(),
            history,
        };
        Ok(Self {
            catalog: Arc::new(RwLock::new(catalog)),
            products_path,
            groups_path,
            history_path,
        })
    }

    // The write_* helpers take the catalog from a held write guard.

    async fn write_products(&self, catalog: &Catalog) -> Result<(), StoreError> {
        let mut products: Vec<&Product> = catalog.products.values().collect();
        products.sort_by(|a, b| a.id.cmp(&b.id));
        write_json_atomic(&self.products_path, &products).await
    }

    async fn write_groups(&self, catalog: &Catalog) -> Result<(), StoreError> {
        let mut groups: Vec<&ProductGroup> = catalog.groups.values().collect();
        groups.sort_by_key(|g| g.group_id);
        write_json_atomic(&self.groups_path, &groups).await
    }

    async fn write_history(&self, catalog: &Catalog) -> Result<(), StoreError> {
        write_json_atomic(&self.history_path, &catalog.history).await
    }

    /// Appends a record with its own timestamp, e.g. when importing history.
    pub async fn insert_record(&self, record: PriceRecord) -> Result<(), StoreError> {
        let mut catalog = self.catalog.write().await;
        catalog.history.push(record);
        self.write_history(&catalog).await
    }

    pub async fn product_count(&self) -> usize {
        self.catalog.read().await.products.len()
    }
}

#[async_trait]
impl PriceStore for FileStore {
    async fn changed_since(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<PriceChange>, StoreError> {
        let catalog = self.catalog.read().await;
        let mut rows: Vec<&PriceRecord> = catalog
            .history
            .iter()
            .filter(|r| r.recorded_at > since)
            .collect();
        rows.sort_by_key(|r| r.recorded_at);
        rows.truncate(limit);

        Ok(rows
            .into_iter()
            .map(|record| {
                let product = catalog.products.get(&record.product_id);
                PriceChange {
                    entity_id: record.product_id.clone(),
                    price: record.price,
                    original_price: record.original_price,
                    deal_type: record.deal_type,
                    changed_at: record.recorded_at,
                    product_name: product.map(|p| p.name.clone()),
                    image_url: product.and_then(|p| p.image_url.clone()),
                }
            })
            .collect())
    }

    async fn product(&self, id: &str) -> Result<Option<Product>, StoreError> {
        Ok(self.catalog.read().await.products.get(id).cloned())
    }

    async fn latest_price(&self, id: &str) -> Result<Option<PriceRecord>, StoreError> {
        Ok(self.catalog.read().await.latest(id).cloned())
    }

    async fn price_history(&self, id: &str, limit: usize) -> Result<Vec<PriceRecord>, StoreError> {
        let catalog = self.catalog.read().await;
        let mut records: Vec<PriceRecord> = catalog
            .history
            .iter()
            .filter(|r| r.product_id == id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        records.truncate(limit);
        Ok(records)
    }

    async fn deals(&self, filter: DealFilter, limit: usize) -> Result<Vec<Listing>, StoreError> {
        let catalog = self.catalog.read().await;
        let mut matches: Vec<(&Product, &PriceRecord)> = catalog
            .latest_per_product()
            .into_values()
            .filter(|r| filter.matches(r.deal_type) && r.original_price > r.price)
            .filter_map(|r| catalog.products.get(&r.product_id).map(|p| (p, r)))
            .collect();
        matches.sort_by(|(a_product, a), (b_product, b)| {
            b.discount_percent()
                .cmp(&a.discount_percent())
                .then_with(|| a_product.id.cmp(&b_product.id))
        });
        matches.truncate(limit);
        Ok(matches
            .into_iter()
            .map(|(product, record)| Listing {
                product: product.clone(),
                price: Some(record.clone()),
            })
            .collect())
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Listing>, StoreError> {
        let needle = query.trim().to_lowercase();
        let catalog = self.catalog.read().await;
        let mut found: Vec<&Product> = catalog
            .products
            .values()
            .filter(|p| p.name.to_lowercase().contains(&needle))
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        found.truncate(limit);
        Ok(found.into_iter().map(|p| catalog.listing(p)).collect())
    }

    async fn groups(&self) -> Result<Vec<GroupCount>, StoreError> {
        let catalog = self.catalog.read().await;
        let mut counts: HashMap<u32, usize> = HashMap::new();
        for group_id in catalog.products.values().filter_map(|p| p.group_id) {
            *counts.entry(group_id).or_default() += 1;
        }
        let mut groups: Vec<GroupCount> = catalog
            .groups
            .values()
            .map(|group| GroupCount {
                group: group.clone(),
                product_count: counts.get(&group.group_id).copied().unwrap_or(0),
            })
            .collect();
        groups.sort_by_key(|g| g.group.group_id);
        Ok(groups)
    }

    async fn group(&self, group_id: u32) -> Result<Option<ProductGroup>, StoreError> {
        Ok(self.catalog.read().await.groups.get(&group_id).cloned())
    }

    async fn by_group(&self, group_id: u32, limit: usize) -> Result<Vec<Listing>, StoreError> {
        Ok(self.catalog.read().await.in_group(group_id, None, limit))
    }

    async fn similar(
        &self,
        group_id: u32,
        exclude_id: &str,
        limit: usize,
    ) -> Result<Vec<Listing>, StoreError> {
        Ok(self
            .catalog
            .read()
            .await
            .in_group(group_id, Some(exclude_id), limit))
    }

    async fn upsert_product(&self, product: Product) -> Result<(), StoreError> {
        let mut catalog = self.catalog.write().await;
        catalog.products.insert(product.id.clone(), product);
        self.write_products(&catalog).await
    }

    async fn upsert_group(&self, group: ProductGroup) -> Result<(), StoreError> {
        let mut catalog = self.catalog.write().await;
        catalog.groups.insert(group.group_id, group);
        self.write_groups(&catalog).await
    }

    async fn record_price(&self, id: &str, scraped: ScrapedPrice) -> Result<PriceRecord, StoreError> {
        let mut catalog = self.catalog.write().await;
        if !catalog.products.contains_key(id) {
            return Err(StoreError::NotFound(id.to_string()));
        }
        let record = PriceRecord {
            product_id: id.to_string(),
            price: scraped.price,
            original_price: scraped.original_price,
            deal_type: scraped.deal_type,
            recorded_at: Utc::now(),
        };
        catalog.history.push(record.clone());
        self.write_history(&catalog).await?;
        Ok(record)
    }
}
