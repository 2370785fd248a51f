use super::extract::{ApiJson, ApiPath, ApiQuery};
use super::{AppError, AppState};
use crate::models::{DataResponse, ListResponse};
use crate::security::AuthContext;
use crate::stocktake::models::StockCount;
use crate::stocktake::{CountRequest, StockItemView, StockQuery, StockSummary};
use crate::store::PageRequest;
use axum::{
    Json,
    extract::{Extension, State},
};
use tracing::info;

pub(super) async fn list_stock(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<StockQuery>,
) -> Result<Json<ListResponse<StockItemView>>, AppError> {
    crate::metrics::inc_requests("/stocktake");
    let filter = query.filter()?;
    let page = PageRequest::clamp(
        query.page_params(),
        state.config.default_page_size,
        state.config.max_page_size,
    );
    let found = state.stock.list(&filter, page).await?;
    Ok(Json(found.map(|page| page.map(StockItemView::from))))
}

pub(super) async fn stock_summary(
    State(state): State<AppState>,
) -> Result<Json<DataResponse<StockSummary>>, AppError> {
    crate::metrics::inc_requests("/stocktake/summary");
    Ok(Json(state.stock.summary().await?.into()))
}

/// `POST /stocktake/{id}/count`. `counted_by` falls back to the caller.
pub(super) async fn record_count(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<CountRequest>,
) -> Result<Json<DataResponse<StockItemView>>, AppError> {
    crate::metrics::inc_requests("/stocktake/{id}/count");
    let entry = request.validate(&context.operator)?;
    let item = state.stock.record_count(id, &entry).await?;
    info!(
        target = "ops.api",
        operator = %context.operator,
        item_id = id,
        sku = %item.sku,
        counted_qty = entry.counted_qty,
        "stock counted"
    );
    Ok(Json(DataResponse::written(item.into())))
}

pub(super) async fn count_history(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<DataResponse<Vec<StockCount>>>, AppError> {
    crate::metrics::inc_requests("/stocktake/{id}/history");
    Ok(Json(state.stock.history(id).await?.into()))
}
