use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use pricewatch_core::ViewError;
use serde_json::json;
use tracing::error;

pub type ApiResult<T> = Result<T, ApiError>;

/// Failure returned to HTTP clients as `{"success": false, "error": ...}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: message.into(),
        }
    }
}

impl From<ViewError> for ApiError {
    fn from(err: ViewError) -> Self {
        match err {
            ViewError::NotFound(id) => ApiError::not_found(format!("Product {id} not found")),
            ViewError::EmptyCategory(group_id) => {
                ApiError::not_found(format!("No products in category {group_id}"))
            }
            ViewError::Store(e) => {
                error!(error = %e, "store read failed");
                ApiError::unavailable(format!("Backend temporarily unavailable: {e}"))
            }
            ViewError::Encode(e) => {
                error!(error = %e, "view encoding failed");
                ApiError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: "Server error".to_string(),
                }
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "success": false, "error": self.message }));
        (self.status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pricewatch_core::StoreError;
    use serde_json::Value;

    async fn render(err: ApiError) -> (StatusCode, Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn store_outage_is_a_tagged_503() {
        let err = ApiError::from(ViewError::Store(StoreError::Unavailable("disk gone".into())));
        let (status, body) = render(err).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["success"], false);
        let message = body["error"].as_str().unwrap();
        assert!(message.starts_with("Backend temporarily unavailable"));
        assert!(message.contains("disk gone"));
    }

    #[tokio::test]
    async fn missing_product_is_a_404() {
        let (status, body) = render(ApiError::from(ViewError::NotFound("42".into()))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, serde_json::json!({ "success": false, "error": "Product 42 not found" }));
    }

    #[tokio::test]
    async fn empty_category_is_a_404() {
        let (status, body) = render(ApiError::from(ViewError::EmptyCategory(7))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "No products in category 7");
    }

    #[tokio::test]
    async fn bad_request_keeps_its_message() {
        let (status, body) = render(ApiError::bad_request("Missing search query")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing search query");
    }
}
