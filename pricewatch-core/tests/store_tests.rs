mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{group, grouped, product, record, temp_dir};
use pricewatch_core::{DealFilter, DealType, FileStore, PriceStore, ScrapedPrice, StoreError};

#[tokio::test]
async fn open_uses_tmp_fallback_on_corrupted_json() {
    let dir = temp_dir("corrupt");
    tokio::fs::create_dir_all(&dir).await.unwrap();

    // Corrupted products.json
    let products_path = dir.join("products.json");
    tokio::fs::write(&products_path, b"{ this is not json ").await.unwrap();

    // Valid tmp sibling left behind by an interrupted write
    let tmp_path = dir.join("products.json.tmp");
    let bytes = serde_json::to_vec(&vec![product("x", "Tai nghe")]).unwrap();
    tokio::fs::write(&tmp_path, bytes).await.unwrap();

    let store = FileStore::open(&dir).await.unwrap();
    assert_eq!(store.product_count().await, 1, "should fall back to tmp file when main is corrupted");
    assert_eq!(store.product("x").await.unwrap().unwrap().name, "Tai nghe");

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn catalog_and_history_survive_reopen() {
    let dir = temp_dir("reopen");
    let store = FileStore::open(&dir).await.unwrap();
    store.upsert_product(product("1", "Laptop")).await.unwrap();
    let recorded = store
        .record_price(
            "1",
            ScrapedPrice {
                price: 900.0,
                original_price: 1000.0,
                deal_type: DealType::Trending,
            },
        )
        .await
        .unwrap();
    assert!(!dir.join("price_history.json.tmp").exists());

    let reopened = FileStore::open(&dir).await.unwrap();
    assert_eq!(reopened.product("1").await.unwrap().unwrap().name, "Laptop");
    assert_eq!(reopened.latest_price("1").await.unwrap(), Some(recorded));

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn record_price_requires_known_product() {
    let dir = temp_dir("unknown");
    let store = FileStore::open(&dir).await.unwrap();
    let err = store
        .record_price(
            "ghost",
            ScrapedPrice {
                price: 1.0,
                original_price: 1.0,
                deal_type: DealType::Normal,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(id) if id == "ghost"));

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn changed_since_is_strict_ascending_and_capped() {
    let dir = temp_dir("changes");
    let store = FileStore::open(&dir).await.unwrap();
    store.upsert_product(product("a", "Alpha")).await.unwrap();
    store.upsert_product(product("b", "Beta")).await.unwrap();

    let base = Utc::now() - Duration::hours(1);
    for (id, offset) in [("b", 30), ("a", 10), ("a", 20), ("b", 40)] {
        store
            .insert_record(record(id, 80.0, 100.0, DealType::Normal, base + Duration::seconds(offset)))
            .await
            .unwrap();
    }

    let rows = store.changed_since(base + Duration::seconds(10), 2).await.unwrap();
    let stamps: Vec<_> = rows.iter().map(|r| r.changed_at).collect();
    assert_eq!(stamps, vec![base + Duration::seconds(20), base + Duration::seconds(30)]);
    assert_eq!(rows[0].entity_id, "a");
    assert_eq!(rows[0].product_name.as_deref(), Some("Alpha"));
    assert!(rows[0].image_url.is_some());

    let rest = store.changed_since(base + Duration::seconds(30), 50).await.unwrap();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].entity_id, "b");

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn deals_use_latest_record_and_sort_by_discount() {
    let dir = temp_dir("deals");
    let store = FileStore::open(&dir).await.unwrap();
    for (id, name) in [("1", "One"), ("2", "Two"), ("3", "Three"), ("4", "Four")] {
        store.upsert_product(product(id, name)).await.unwrap();
    }
    let now = Utc::now();
    let earlier = now - Duration::minutes(10);
    // "1" was a flash sale but is back to normal now.
    store.insert_record(record("1", 40.0, 100.0, DealType::FlashSale, earlier)).await.unwrap();
    store.insert_record(record("1", 100.0, 100.0, DealType::Normal, now)).await.unwrap();
    store.insert_record(record("2", 60.0, 100.0, DealType::HotDeal, now)).await.unwrap();
    store.insert_record(record("3", 45.0, 100.0, DealType::FlashSale, now)).await.unwrap();
    store.insert_record(record("4", 85.0, 100.0, DealType::Trending, now)).await.unwrap();

    let all = store.deals(DealFilter::All, 200).await.unwrap();
    let ids: Vec<_> = all.iter().map(|l| l.product.id.as_str()).collect();
    assert_eq!(ids, vec!["3", "2", "4"]);

    let flash = store.deals(DealFilter::Only(DealType::FlashSale), 200).await.unwrap();
    assert_eq!(flash.len(), 1);
    assert_eq!(flash[0].product.id, "3");

    let capped = store.deals(DealFilter::All, 1).await.unwrap();
    assert_eq!(capped.len(), 1);

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn search_is_case_insensitive_and_history_newest_first() {
    let dir = temp_dir("search");
    let store = FileStore::open(&dir).await.unwrap();
    store.upsert_product(product("1", "Apple iPhone 15")).await.unwrap();
    store.upsert_product(product("2", "Samsung Galaxy")).await.unwrap();
    store.upsert_product(product("3", "iPhone case")).await.unwrap();

    let found = store.search("IPHONE", 50).await.unwrap();
    let names: Vec<_> = found.iter().map(|l| l.product.name.as_str()).collect();
    assert_eq!(names, vec!["Apple iPhone 15", "iPhone case"]);
    assert!(found.iter().all(|l| l.price.is_none()));

    let now = Utc::now();
    for minutes in [30, 10, 20] {
        store
            .insert_record(record("1", minutes as f64, 100.0, DealType::Normal, now - Duration::minutes(minutes)))
            .await
            .unwrap();
    }
    let history = store.price_history("1", 2).await.unwrap();
    let prices: Vec<_> = history.iter().map(|r| r.price).collect();
    assert_eq!(prices, vec![10.0, 20.0]);

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_record_price_calls_all_succeed() {
    let dir = temp_dir("concurrent");
    let store = Arc::new(FileStore::open(&dir).await.unwrap());
    let ids = ["1", "2", "3", "4", "5"];
    for id in ids {
        store.upsert_product(product(id, "Concurrent")).await.unwrap();
    }

    let rounds = 20;
    for round in 0..rounds {
        let mut tasks = tokio::task::JoinSet::new();
        for id in ids {
            let store = store.clone();
            tasks.spawn(async move {
                store
                    .record_price(
                        id,
                        ScrapedPrice {
                            price: 100.0 + round as f64,
                            original_price: 200.0,
                            deal_type: DealType::FlashSale,
                        },
                    )
                    .await
            });
        }
        while let Some(joined) = tasks.join_next().await {
            let recorded = joined.unwrap();
            assert!(recorded.is_ok(), "record_price failed: {:?}", recorded.err());
        }
    }
    assert!(!dir.join("price_history.json.tmp").exists());

    let reopened = FileStore::open(&dir).await.unwrap();
    for id in ids {
        assert_eq!(reopened.price_history(id, 1000).await.unwrap().len(), rounds);
    }

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_upserts_leave_a_complete_catalog() {
    let dir = temp_dir("concurrent_upsert");
    let store = Arc::new(FileStore::open(&dir).await.unwrap());

    let mut tasks = tokio::task::JoinSet::new();
    for n in 0..20 {
        let store = store.clone();
        tasks.spawn(async move { store.upsert_product(product(&n.to_string(), "Item")).await });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap().unwrap();
    }

    let reopened = FileStore::open(&dir).await.unwrap();
    assert_eq!(reopened.product_count().await, 20);

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn groups_count_products_and_survive_reopen() {
    let dir = temp_dir("groups");
    let store = FileStore::open(&dir).await.unwrap();
    store.upsert_group(group(2, "Laptop")).await.unwrap();
    store.upsert_group(group(1, "Dien thoai")).await.unwrap();
    store.upsert_group(group(3, "May anh")).await.unwrap();
    store.upsert_product(grouped("a", "iPhone", 1)).await.unwrap();
    store.upsert_product(grouped("b", "Galaxy", 1)).await.unwrap();
    store.upsert_product(grouped("c", "ThinkPad", 2)).await.unwrap();
    // Points at a group nobody registered.
    store.upsert_product(grouped("d", "Mystery", 9)).await.unwrap();
    store.upsert_product(product("e", "Loose")).await.unwrap();

    let reopened = FileStore::open(&dir).await.unwrap();
    let counts: Vec<_> = reopened
        .groups()
        .await
        .unwrap()
        .into_iter()
        .map(|g| (g.group.group_id, g.group.group_name, g.product_count))
        .collect();
    assert_eq!(
        counts,
        vec![
            (1, "Dien thoai".to_string(), 2),
            (2, "Laptop".to_string(), 1),
            (3, "May anh".to_string(), 0),
        ]
    );
    assert_eq!(reopened.group(2).await.unwrap(), Some(group(2, "Laptop")));
    assert_eq!(reopened.group(9).await.unwrap(), None);

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn group_listings_and_similar_products() {
    let dir = temp_dir("similar");
    let store = FileStore::open(&dir).await.unwrap();
    store.upsert_product(grouped("1", "Zenbook", 7)).await.unwrap();
    store.upsert_product(grouped("2", "Aspire", 7)).await.unwrap();
    store.upsert_product(grouped("3", "Macbook", 7)).await.unwrap();
    store.upsert_product(grouped("4", "Tai nghe", 8)).await.unwrap();
    store
        .insert_record(record("2", 500.0, 1000.0, DealType::FlashSale, Utc::now()))
        .await
        .unwrap();

    let in_group = store.by_group(7, 100).await.unwrap();
    let names: Vec<_> = in_group.iter().map(|l| l.product.name.as_str()).collect();
    assert_eq!(names, vec!["Aspire", "Macbook", "Zenbook"]);
    assert_eq!(in_group[0].price.as_ref().unwrap().price, 500.0);

    let similar = store.similar(7, "1", 16).await.unwrap();
    let ids: Vec<_> = similar.iter().map(|l| l.product.id.as_str()).collect();
    assert_eq!(ids, vec!["2", "3"]);

    assert_eq!(store.similar(7, "1", 1).await.unwrap().len(), 1);
    assert!(store.by_group(42, 100).await.unwrap().is_empty());

    let _ = tokio::fs::remove_dir_all(&dir).await;
}
