use super::extract::{ApiJson, ApiPath, ApiQuery};
use super::{AppError, AppState};
use crate::inventory::{EbayListing, InventoryStats, ListingPatch, ListingQuery};
use crate::jobs::JobKind;
use crate::models::{DataResponse, EnqueueResponse, ListResponse};
use crate::security::AuthContext;
use crate::store::PageRequest;
use axum::{
    Json,
    extract::{Extension, State},
    http::StatusCode,
};
use tracing::info;

pub(super) async fn list_listings(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<ListingQuery>,
) -> Result<Json<ListResponse<EbayListing>>, AppError> {
    crate::metrics::inc_requests("/inventory");
    let filter = query.filter()?;
    let page = PageRequest::clamp(
        query.page_params(),
        state.config.default_page_size,
        state.config.max_page_size,
    );
    Ok(Json(state.listings.list(&filter, page).await?))
}

pub(super) async fn get_listing(
    State(state): State<AppState>,
    ApiPath(sku): ApiPath<String>,
) -> Result<Json<DataResponse<EbayListing>>, AppError> {
    crate::metrics::inc_requests("/inventory/{sku}");
    Ok(Json(state.listings.get(&sku).await?.into()))
}

pub(super) async fn update_listing(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    ApiPath(sku): ApiPath<String>,
    ApiJson(patch): ApiJson<ListingPatch>,
) -> Result<Json<DataResponse<EbayListing>>, AppError> {
    crate::metrics::inc_requests("/inventory/{sku}");
    let patch = patch.validate()?;
    let updated = state.listings.update(&sku, &patch).await?;
    info!(
        target = "ops.api",
        operator = %context.operator,
        sku = %sku,
        status = updated.status.as_str(),
        quantity = updated.quantity,
        "listing updated"
    );
    Ok(Json(DataResponse::written(updated)))
}

pub(super) async fn inventory_stats(
    State(state): State<AppState>,
) -> Result<Json<DataResponse<InventoryStats>>, AppError> {
    crate::metrics::inc_requests("/inventory/stats");
    Ok(Json(state.listings.stats().await?.into()))
}

/// `POST /inventory/sync`: queue a pull from eBay and return the job id.
pub(super) async fn enqueue_sync(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
) -> Result<(StatusCode, Json<EnqueueResponse>), AppError> {
    crate::metrics::inc_requests("/inventory/sync");
    if !state.ebay_network {
        return Err(AppError::bad_request(
            "ebay_network_disabled",
            "set EBAY_ENABLE_NETWORK=1 to sync with eBay",
        ));
    }
    let id = state
        .queue
        .enqueue(JobKind::InventorySync)
        .await
        .map_err(|err| AppError::Api(StatusCode::INTERNAL_SERVER_ERROR, err))?;
    info!(target = "ops.api", operator = %context.operator, job_id = %id, "inventory sync queued");
    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse {
            job_id: id.to_string(),
        }),
    ))
}
