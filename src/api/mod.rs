//! HTTP surface: router, shared state and the error mapping every handler
//! goes through.

mod extract;
mod inventory;
mod products;
mod stocktake;

use crate::catalog::ProductRepository;
use extract::ApiPath;
use crate::config::AppConfig;
use crate::diagnostics::{Diagnostics, DiagnosticsReport};
use crate::inventory::ListingRepository;
use crate::jobs::{JobInfo, JobQueue};
use crate::models::ApiError;
use crate::security::{AuthState, require_api_auth};
use crate::stocktake::StockRepository;
use crate::store::StoreError;
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, StatusCode, header},
    middleware,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, warn};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub products: ProductRepository,
    pub listings: ListingRepository,
    pub stock: StockRepository,
    pub queue: JobQueue,
    pub diagnostics: Diagnostics,
    /// Whether `/inventory/sync` may call out to eBay.
    pub ebay_network: bool,
    pub openapi: Arc<serde_json::Value>,
    pub prometheus_handle: PrometheusHandle,
}

pub fn router(state: AppState, auth: AuthState, body_limit: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let protected = Router::new()
        .route("/products", get(products::list_products))
        .route("/products/stats", get(products::product_stats))
        .route("/products/bulk_delete", post(products::bulk_delete))
        .route(
            "/products/{id}",
            get(products::get_product)
                .patch(products::update_product)
                .delete(products::delete_product),
        )
        .route("/inventory", get(inventory::list_listings))
        .route("/inventory/stats", get(inventory::inventory_stats))
        .route("/inventory/sync", post(inventory::enqueue_sync))
        .route(
            "/inventory/{sku}",
            get(inventory::get_listing).patch(inventory::update_listing),
        )
        .route("/stocktake", get(stocktake::list_stock))
        .route("/stocktake/summary", get(stocktake::stock_summary))
        .route("/stocktake/{id}/count", post(stocktake::record_count))
        .route("/stocktake/{id}/history", get(stocktake::count_history))
        .route("/jobs/{id}", get(get_job_status))
        .route("/diagnostics", get(diagnostics))
        .route_layer(middleware::from_fn_with_state(auth, require_api_auth));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui))
        .merge(protected)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit))
}

#[derive(Debug)]
pub enum AppError {
    Store(StoreError),
    Api(StatusCode, ApiError),
}

impl AppError {
    fn new(status: StatusCode, code: &str, detail: impl Into<String>) -> Self {
        Self::Api(
            status,
            ApiError {
                error: code.to_string(),
                detail: Some(detail.into()),
            },
        )
    }

    pub fn bad_request(code: &str, detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, detail)
    }

    pub fn not_found(code: &str, detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, detail)
    }
}

impl From<StoreError> for AppError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, payload) = match self {
            AppError::Api(status, payload) => (status, payload),
            AppError::Store(err) => {
                let (status, code) = match &err {
                    StoreError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                    StoreError::Invalid(_) => (StatusCode::BAD_REQUEST, "invalid_input"),
                    StoreError::Database(_) => {
                        warn!(target = "ops.api", error = %err, "database write failed");
                        (StatusCode::SERVICE_UNAVAILABLE, "storage_unavailable")
                    }
                    StoreError::Snapshot(_) => {
                        error!(target = "ops.api", error = %err, "snapshot failure");
                        (StatusCode::INTERNAL_SERVER_ERROR, "snapshot_error")
                    }
                };
                let detail = match err {
                    // Driver messages can carry connection details.
                    StoreError::Database(_) => "database unavailable".to_string(),
                    other => other.to_string(),
                };
                (
                    status,
                    ApiError {
                        error: code.to_string(),
                        detail: Some(detail),
                    },
                )
            }
        };
        (status, Json(payload)).into_response()
    }
}

/// Liveness check. Always 200; `mode` tells whether a database is configured.
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "mode": if state.config.offline() { "offline" } else { "database" },
    }))
}

fn key_matches(headers: &HeaderMap, header_name: &str, env_key: &str) -> bool {
    match std::env::var(env_key) {
        Ok(secret) if !secret.is_empty() => {
            headers
                .get(header_name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                == secret
        }
        _ => true,
    }
}

async fn openapi_json(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    if !key_matches(&headers, "X-Docs-Key", "OPENAPI_KEY") {
        return Err(AppError::new(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "Provide X-Docs-Key",
        ));
    }
    Ok(Json((*state.openapi).clone()))
}

async fn swagger_ui() -> Html<&'static str> {
    Html(
        r#"<!doctype html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>Resale Ops API Docs</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' });
    };
  </script>
</body>
</html>"#,
    )
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !key_matches(&headers, "X-Metrics-Key", "METRICS_KEY") {
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus_handle.render(),
    )
        .into_response()
}

async fn get_job_status(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<String>,
) -> Result<Json<JobInfo>, AppError> {
    crate::metrics::inc_requests("/jobs/{id}");
    let Ok(uuid) = uuid::Uuid::parse_str(&id) else {
        return Err(AppError::bad_request("invalid_job_id", format!("`{id}` is not a UUID")));
    };
    state
        .queue
        .get(uuid)
        .await
        .map(Json)
        .ok_or_else(|| AppError::not_found("job_not_found", format!("job {uuid}")))
}

async fn diagnostics(State(state): State<AppState>) -> Json<DiagnosticsReport> {
    crate::metrics::inc_requests("/diagnostics");
    Json(state.diagnostics.run().await)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::diagnostics::SnapshotCheck;
    use crate::ebay::SyncReport;
    use crate::store::SnapshotStore;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use metrics_exporter_prometheus::PrometheusBuilder;
    use serde::Serialize;
    use serde_json::Value;
    use tower::ServiceExt;

    pub const KEY: &str = "secret";

    /// An offline app backed by snapshot files in a temp dir.
    pub struct TestApp {
        pub dir: tempfile::TempDir,
        pub router: Router,
        pub state: AppState,
    }

    impl TestApp {
        pub async fn new() -> Self {
            Self::with_network(false).await
        }

        pub async fn with_network(ebay_network: bool) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let config = AppConfig {
                snapshot_dir: dir.path().to_path_buf(),
                ..Default::default()
            };
            let path = dir.path();
            let products = SnapshotStore::<crate::catalog::ScrapedProduct>::new(path, "products");
            let listings = SnapshotStore::<crate::inventory::EbayListing>::new(path, "listings");
            let items = SnapshotStore::new(path, "stock_items");
            let counts = SnapshotStore::new(path, "stock_counts");
            let diagnostics = Diagnostics::new(
                None,
                None,
                vec![SnapshotCheck::of(&products), SnapshotCheck::of(&listings)],
            );
            let (queue, _worker) = JobQueue::spawn(|_| async { Ok(SyncReport::default()) });
            let state = AppState {
                config: Arc::new(config),
                products: ProductRepository::new(None, products),
                listings: ListingRepository::new(None, listings),
                stock: StockRepository::new(None, items, counts),
                queue,
                diagnostics,
                ebay_network,
                openapi: Arc::new(json!({"openapi": "3.0.3"})),
                prometheus_handle: PrometheusBuilder::new().build_recorder().handle(),
            };
            let auth = AuthState::with_keys(&format!("sato:{KEY}"), 100.0, 100.0);
            let router = router(state.clone(), auth, 64 * 1024);
            Self { dir, router, state }
        }

        /// Write a dataset file the way an export would.
        pub fn seed<T: Serialize>(&self, dataset: &str, rows: &[T]) {
            let body = serde_json::to_vec(&json!({ "data": rows })).unwrap();
            std::fs::write(self.dir.path().join(format!("{dataset}.json")), body).unwrap();
        }

        pub async fn call(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
            let mut builder = Request::builder().method(method).uri(uri);
            let body = match body {
                Some(json) => {
                    builder = builder.header(header::CONTENT_TYPE, "application/json");
                    Body::from(serde_json::to_vec(&json).unwrap())
                }
                None => Body::empty(),
            };
            self.send(builder.body(body).unwrap()).await
        }

        /// Send a prepared request with the operator key attached.
        pub async fn send(&self, mut request: Request<Body>) -> (StatusCode, Value) {
            request
                .headers_mut()
                .insert("X-Ops-Key", header::HeaderValue::from_static(KEY));
            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
            (status, value)
        }

        pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
            self.call(Method::GET, uri, None).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::TestApp;
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_is_public() {
        let app = TestApp::new().await;
        let response = app
            .router
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn protected_routes_need_a_key() {
        let app = TestApp::new().await;
        let response = app
            .router
            .clone()
            .oneshot(Request::builder().uri("/products").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn job_lookup_validates_id() {
        let app = TestApp::new().await;
        let (status, body) = app.get("/jobs/not-a-uuid").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_job_id");

        let (status, body) = app.get(&format!("/jobs/{}", uuid::Uuid::new_v4())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "job_not_found");
    }

    #[tokio::test]
    async fn diagnostics_reports_offline_mode() {
        let app = TestApp::new().await;
        app.seed("products", &[json!({"id": 1, "source_item_id": "x1", "title": "Lens"})]);
        let (status, body) = app.get("/diagnostics").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["database"]["configured"], false);
        assert_eq!(body["snapshots"][0]["dataset"], "products");
        assert_eq!(body["snapshots"][0]["records"], 1);
        assert_eq!(body["snapshots"][1]["exists"], false);

        app.seed("products", &[json!({"foo": 1})]);
        let (_, body) = app.get("/diagnostics").await;
        assert!(body["snapshots"][0]["records"].is_null());
        assert!(body["snapshots"][0]["error"].is_string());
        let (status, _) = app.get("/products").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn malformed_requests_get_api_errors() {
        let app = TestApp::new().await;
        let (status, body) = app
            .call(Method::PATCH, "/products/1", Some(json!({"titel": "x"})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_input");

        let (status, body) = app.get("/products/abc").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_input");

        let (status, body) = app.get("/products?min_price=cheap").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_input");

        let (status, body) = app
            .call(
                Method::POST,
                "/stocktake/1/count",
                Some(json!({"counted_qty": "two"})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_input");
    }

    #[tokio::test]
    async fn body_without_json_content_type_is_bad_request() {
        let app = TestApp::new().await;
        let request = Request::builder()
            .method(Method::PATCH)
            .uri("/inventory/CAM-1")
            .body(Body::from(r#"{"quantity": 1}"#))
            .unwrap();
        let (status, body) = app.send(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_input");

        let request = Request::builder()
            .method(Method::PATCH)
            .uri("/inventory/CAM-1")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = app.send(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].is_string());
    }

    #[test]
    fn store_errors_map_to_statuses() {
        let cases = [
            (StoreError::not_found("product 1"), StatusCode::NOT_FOUND),
            (StoreError::invalid("bad"), StatusCode::BAD_REQUEST),
            (
                StoreError::Database(sqlx::Error::PoolTimedOut),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                StoreError::Snapshot("disk full".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(AppError::from(err).into_response().status(), expected);
        }
    }
}
