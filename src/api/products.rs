use super::extract::{ApiJson, ApiPath, ApiQuery};
use super::{AppError, AppState};
use crate::catalog::{ProductPatch, ProductQuery, ProductStats, ProductView, ScrapedProduct};
use crate::models::{DataResponse, DeletedResponse, ListResponse};
use crate::security::AuthContext;
use crate::store::PageRequest;
use axum::{
    Json,
    extract::{Extension, State},
};
use serde::Deserialize;
use tracing::info;

fn view(state: &AppState, product: ScrapedProduct) -> ProductView {
    let images = product.resolve_images(
        state.config.max_images,
        state.config.image_placeholder_url.as_deref(),
    );
    ProductView { product, images }
}

/// `GET /products`: filtered, paged catalog with resolved images.
pub(super) async fn list_products(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<ProductQuery>,
) -> Result<Json<ListResponse<ProductView>>, AppError> {
    crate::metrics::inc_requests("/products");
    let filter = query.filter()?;
    let page = PageRequest::clamp(
        query.page_params(),
        state.config.default_page_size,
        state.config.max_page_size,
    );
    let found = state.products.list(&filter, page).await?;
    Ok(Json(
        found.map(|page| page.map(|product| view(&state, product))),
    ))
}

pub(super) async fn get_product(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<DataResponse<ProductView>>, AppError> {
    crate::metrics::inc_requests("/products/{id}");
    let found = state.products.get(id).await?;
    Ok(Json(found.map(|product| view(&state, product)).into()))
}

pub(super) async fn update_product(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    ApiPath(id): ApiPath<i64>,
    ApiJson(patch): ApiJson<ProductPatch>,
) -> Result<Json<DataResponse<ProductView>>, AppError> {
    crate::metrics::inc_requests("/products/{id}");
    let changes = patch.validate(state.config.max_images)?;
    let updated = state.products.update(id, &changes).await?;
    info!(
        target = "ops.api",
        operator = %context.operator,
        product_id = id,
        status = updated.status.as_str(),
        "product updated"
    );
    Ok(Json(DataResponse::written(view(&state, updated))))
}

pub(super) async fn delete_product(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<DeletedResponse>, AppError> {
    crate::metrics::inc_requests("/products/{id}");
    state.products.delete(id).await?;
    info!(target = "ops.api", operator = %context.operator, product_id = id, "product deleted");
    Ok(Json(DeletedResponse { deleted: 1 }))
}

#[derive(Debug, Deserialize)]
pub(super) struct BulkDeleteRequest {
    ids: Vec<i64>,
}

pub(super) async fn bulk_delete(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    ApiJson(request): ApiJson<BulkDeleteRequest>,
) -> Result<Json<DeletedResponse>, AppError> {
    crate::metrics::inc_requests("/products/bulk_delete");
    let deleted = state.products.delete_many(&request.ids).await?;
    info!(
        target = "ops.api",
        operator = %context.operator,
        requested = request.ids.len(),
        deleted,
        "bulk delete"
    );
    Ok(Json(DeletedResponse { deleted }))
}

pub(super) async fn product_stats(
    State(state): State<AppState>,
) -> Result<Json<DataResponse<ProductStats>>, AppError> {
    crate::metrics::inc_requests("/products/stats");
    Ok(Json(state.products.stats().await?.into()))
}

#[cfg(test)]
mod tests {
    use crate::api::testing::TestApp;
    use crate::catalog::models::tests::product;
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    async fn seeded() -> TestApp {
        let app = TestApp::new().await;
        let mut listed = product(3, "Canon AE-1 Program", 18_000);
        listed.status = crate::catalog::ProductStatus::Listed;
        app.seed(
            "products",
            &[
                product(1, "Nikon F3 body", 25_000),
                product(2, "Pentax K1000", 9_000),
                listed,
            ],
        );
        app
    }

    #[tokio::test]
    async fn list_carries_source_and_paging() {
        let app = seeded().await;
        let (status, body) = app.get("/products?per_page=2&sort=price_asc").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["source"], "snapshot");
        assert_eq!(body["total"], 3);
        assert_eq!(body["per_page"], 2);
        assert_eq!(body["items"][0]["title"], "Pentax K1000");
        assert_eq!(
            body["items"][0]["images"]["primary"],
            "https://auctions.c.yimg.jp/2.jpg"
        );

        let (status, body) = app.get("/products?status=listed").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 1);

        let (status, body) = app.get("/products?status=bogus").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_input");
    }

    #[tokio::test]
    async fn price_category_and_sort_options() {
        let app = TestApp::new().await;
        let mut lens = product(2, "Pentax 50mm lens", 9_000);
        lens.category = Some("lens".into());
        app.seed(
            "products",
            &[
                product(1, "Nikon F3 body", 25_000),
                lens,
                product(3, "Canon AE-1 Program", 18_000),
            ],
        );

        let (_, body) = app.get("/products?min_price=10000&sort=price_asc").await;
        assert_eq!(body["total"], 2);
        assert_eq!(body["items"][0]["id"], 3);
        assert_eq!(body["items"][1]["id"], 1);

        let (_, body) = app.get("/products?sort=oldest").await;
        assert_eq!(body["items"][0]["id"], 1);
        assert_eq!(body["items"][2]["id"], 3);

        let (_, body) = app.get("/products?sort=title").await;
        assert_eq!(body["items"][0]["title"], "Canon AE-1 Program");
        assert_eq!(body["items"][2]["title"], "Pentax 50mm lens");

        let (_, body) = app.get("/products?category=lens").await;
        assert_eq!(body["total"], 1);
        assert_eq!(body["items"][0]["id"], 2);
    }

    #[tokio::test]
    async fn get_returns_data_envelope_or_404() {
        let app = seeded().await;
        let (status, body) = app.get("/products/1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["source"], "snapshot");
        assert_eq!(body["data"]["title"], "Nikon F3 body");

        let (status, body) = app.get("/products/99").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
    }

    #[tokio::test]
    async fn editing_scraped_product_marks_it_edited() {
        let app = seeded().await;
        let (status, body) = app
            .call(
                Method::PATCH,
                "/products/2",
                Some(json!({"ebay_title": "Pentax K1000 35mm SLR", "ebay_price_usd": 89.0})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.get("source").is_none());
        assert_eq!(body["data"]["status"], "edited");
        assert_eq!(body["data"]["ebay_title"], "Pentax K1000 35mm SLR");

        let (_, reread) = app.get("/products/2").await;
        assert_eq!(reread["data"]["status"], "edited");
    }

    #[tokio::test]
    async fn invalid_patch_is_rejected() {
        let app = seeded().await;
        let (status, _) = app
            .call(Method::PATCH, "/products/1", Some(json!({"title": "  "})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app
            .call(
                Method::PATCH,
                "/products/1",
                Some(json!({"ebay_title": "x".repeat(81)})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn delete_and_bulk_delete() {
        let app = seeded().await;
        let (status, body) = app.call(Method::DELETE, "/products/1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deleted"], 1);

        let (status, _) = app.call(Method::DELETE, "/products/1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = app
            .call(
                Method::POST,
                "/products/bulk_delete",
                Some(json!({"ids": [2, 3, 42]})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deleted"], 2);

        let (status, _) = app
            .call(Method::POST, "/products/bulk_delete", Some(json!({"ids": []})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let too_many: Vec<i64> = (1..=501).collect();
        let (status, body) = app
            .call(
                Method::POST,
                "/products/bulk_delete",
                Some(json!({ "ids": too_many })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_input");
    }

    #[tokio::test]
    async fn stats_count_statuses() {
        let app = seeded().await;
        let (status, body) = app.get("/products/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["source"], "snapshot");
        assert_eq!(body["data"]["total"], 3);
        assert_eq!(body["data"]["by_status"]["listed"], 1);
    }
}
