use crate::ebay::auth::{EbayAuthError, get_user_access_token_from_refresh};
use crate::ebay::config::{EBAY_REFRESH_TOKEN, PAGE_LIMIT, USER_SCOPES};
use crate::ebay::inventory::{EbayInventoryError, RemoteInventoryItem, list_inventory_items};
use crate::ebay::offers::{EbayOfferError, OfferSummary, get_offers_by_sku};
use crate::inventory::{EbayListing, ListingRepository, ListingStatus};
use crate::store::StoreError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("ebay auth: {0}")]
    Auth(#[from] EbayAuthError),
    #[error("ebay inventory: {0}")]
    Inventory(#[from] EbayInventoryError),
    #[error("ebay offers: {0}")]
    Offers(#[from] EbayOfferError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncReport {
    pub pages: u32,
    pub fetched: u32,
    pub upserted: u64,
    /// Items left untouched because their offers could not be read.
    pub skipped: u32,
}

/// Turn one remote inventory item and its offers into a local listing row.
///
/// Status and listing id follow the published offer; the price is the
/// first offer's.
pub fn listing_from_remote(item: &RemoteInventoryItem, offers: &[OfferSummary]) -> EbayListing {
    let published = offers.iter().find(|o| o.is_published());
    let offer = published.or_else(|| offers.first());
    let quantity = item.quantity();
    let status = match published {
        Some(_) => ListingStatus::Active.for_quantity(quantity),
        None => ListingStatus::Draft,
    };
    let price = offers.first().and_then(OfferSummary::price);
    let product = item.product.clone().unwrap_or_default();

    EbayListing {
        sku: item.sku.clone(),
        listing_id: published
            .and_then(|o| o.listing.as_ref())
            .and_then(|l| l.listingId.clone()),
        offer_id: offer.and_then(|o| o.offerId.clone()),
        title: product
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| item.sku.clone()),
        price_usd: price.and_then(|p| p.amount()),
        currency: price
            .and_then(|p| p.currency.clone())
            .unwrap_or_else(|| "USD".to_string()),
        quantity,
        status,
        condition: item.condition.clone(),
        category_id: offer.and_then(|o| o.categoryId.clone()),
        image_urls: product.image_urls,
        product_id: None,
        updated_at: Utc::now(),
    }
}

/// Map an item only when its offers were read; a failed lookup would
/// otherwise overwrite a live listing with a draft.
fn mapped_listing(
    item: &RemoteInventoryItem,
    offers: Result<Vec<OfferSummary>, EbayOfferError>,
) -> Option<EbayListing> {
    match offers {
        Ok(offers) => Some(listing_from_remote(item, &offers)),
        Err(err) => {
            warn!(target = "ops.ebay", sku = %item.sku, error = %err, "offer lookup failed; item skipped");
            None
        }
    }
}

/// Pull every inventory item from eBay and upsert it locally.
pub async fn sync_inventory(listings: &ListingRepository) -> Result<SyncReport, SyncError> {
    let refresh = EBAY_REFRESH_TOKEN
        .as_deref()
        .ok_or(EbayAuthError::MissingRefreshToken)?;
    let token = get_user_access_token_from_refresh(refresh, USER_SCOPES).await?;
    let limit = *PAGE_LIMIT;

    let mut report = SyncReport::default();
    let mut offset = 0u32;
    loop {
        let page = list_inventory_items(offset, limit, &token).await?;
        report.pages += 1;
        let count = page.inventory_items.len() as u32;
        report.fetched += count;

        let mut mapped = Vec::with_capacity(page.inventory_items.len());
        for item in &page.inventory_items {
            match mapped_listing(item, get_offers_by_sku(&item.sku, &token).await) {
                Some(listing) => mapped.push(listing),
                None => report.skipped += 1,
            }
        }
        report.upserted += listings.upsert_many(&mapped).await?;

        info!(
            target = "ops.ebay",
            offset,
            count,
            total = page.total.unwrap_or_default(),
            "inventory page synced"
        );
        if count < limit {
            break;
        }
        offset += count;
    }
    Ok(report)
}
