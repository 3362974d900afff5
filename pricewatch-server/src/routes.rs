use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use pricewatch_core::{DealFilter, PriceHub, Product, ProductGroup};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::error::{ApiError, ApiResult};
use crate::transport::{events_handler, ws_handler};

pub fn router(hub: PriceHub) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/products", post(upsert_product))
        .route("/products/{id}", get(product))
        .route("/deals", get(deals))
        .route("/search", get(search))
        .route("/categories", get(categories))
        .route("/groups", post(upsert_group))
        .route("/refresh-price", post(refresh_price))
        .route("/ws", get(ws_handler))
        .route("/events", get(events_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(hub)
}

/// Merges `view` into a `{"success": true, ...}` envelope.
fn ok(view: Value) -> Json<Value> {
    let mut body = Map::new();
    body.insert("success".to_string(), Value::Bool(true));
    match view {
        Value::Object(fields) => body.extend(fields),
        other => {
            body.insert("data".to_string(), other);
        }
    }
    Json(Value::Object(body))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn metrics(State(hub): State<PriceHub>) -> Json<Value> {
    let snapshot = hub.metrics().await;
    match serde_json::to_value(&snapshot) {
        Ok(value) => ok(json!({ "metrics": value })),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            ok(json!({ "metrics": null }))
        }
    }
}

async fn product(State(hub): State<PriceHub>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    let view = hub.views().product(&id).await?;
    Ok(ok(json!({ "product": view })))
}

#[derive(Debug, Deserialize)]
struct DealsQuery {
    deal_type: Option<String>,
}

async fn deals(
    State(hub): State<PriceHub>,
    Query(query): Query<DealsQuery>,
) -> ApiResult<Json<Value>> {
    let filter = match query.deal_type.as_deref() {
        None | Some("") => DealFilter::All,
        Some(raw) => raw
            .parse::<DealFilter>()
            .map_err(|err| ApiError::bad_request(err.to_string()))?,
    };
    let view = hub.views().deals(filter).await?;
    Ok(ok(view))
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    q: Option<String>,
    group_id: Option<u32>,
}

/// Name search with `?q=`, or category browsing with `?group_id=`.
async fn search(
    State(hub): State<PriceHub>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<Value>> {
    if let Some(group_id) = query.group_id {
        let view = hub.views().by_category(group_id).await?;
        return Ok(ok(view));
    }
    let q = query.q.unwrap_or_default();
    if q.trim().is_empty() {
        return Err(ApiError::bad_request("Missing search query"));
    }
    let view = hub.views().search(&q).await?;
    Ok(ok(view))
}

async fn categories(State(hub): State<PriceHub>) -> ApiResult<Json<Value>> {
    let view = hub.views().categories().await?;
    Ok(ok(view))
}

#[derive(Debug, Deserialize)]
struct RefreshRequest {
    product_id: String,
}

async fn refresh_price(
    State(hub): State<PriceHub>,
    Json(request): Json<RefreshRequest>,
) -> ApiResult<Json<Value>> {
    let id = request.product_id.trim();
    if id.is_empty() {
        return Err(ApiError::bad_request("Missing product_id"));
    }
    let refreshed = hub.views().refresh_price(id).await?;
    let view = serde_json::to_value(&refreshed).map_err(pricewatch_core::ViewError::from)?;
    Ok(ok(view))
}

async fn upsert_product(
    State(hub): State<PriceHub>,
    Json(product): Json<Product>,
) -> ApiResult<Json<Value>> {
    if product.id.trim().is_empty() {
        return Err(ApiError::bad_request("Missing product id"));
    }
    let id = product.id.clone();
    hub.views().upsert_product(product).await?;
    info!(product_id = %id, "product upserted");
    Ok(ok(json!({ "product_id": id })))
}

async fn upsert_group(
    State(hub): State<PriceHub>,
    Json(group): Json<ProductGroup>,
) -> ApiResult<Json<Value>> {
    if group.group_name.trim().is_empty() {
        return Err(ApiError::bad_request("Missing group_name"));
    }
    let group_id = group.group_id;
    hub.views().upsert_group(group).await?;
    info!(group_id, "group upserted");
    Ok(ok(json!({ "group_id": group_id })))
}
