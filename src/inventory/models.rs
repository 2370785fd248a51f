use crate::pgarray::parse_text_array;
use crate::store::{PageParams, StoreError, contains_ci, search_term};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::collections::BTreeMap;
use tracing::warn;

pub const TITLE_MAX: usize = 80;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    Draft,
    Active,
    OutOfStock,
    Ended,
}

impl ListingStatus {
    pub const ALL: [ListingStatus; 4] = [
        ListingStatus::Draft,
        ListingStatus::Active,
        ListingStatus::OutOfStock,
        ListingStatus::Ended,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::Draft => "draft",
            ListingStatus::Active => "active",
            ListingStatus::OutOfStock => "out_of_stock",
            ListingStatus::Ended => "ended",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        let wanted = input.trim().to_lowercase();
        Self::ALL.into_iter().find(|s| s.as_str() == wanted)
    }

    pub fn from_db(raw: &str) -> Self {
        Self::parse(raw).unwrap_or_else(|| {
            warn!(target = "ops.store", status = raw, "unknown listing status");
            ListingStatus::Draft
        })
    }

    /// Keep the status consistent with the stock level.
    pub fn for_quantity(self, quantity: i32) -> Self {
        match self {
            ListingStatus::Active if quantity == 0 => ListingStatus::OutOfStock,
            ListingStatus::OutOfStock if quantity > 0 => ListingStatus::Active,
            other => other,
        }
    }
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_status() -> ListingStatus {
    ListingStatus::Draft
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EbayListing {
    pub sku: String,
    pub listing_id: Option<String>,
    pub offer_id: Option<String>,
    pub title: String,
    pub price_usd: Option<f64>,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub quantity: i32,
    #[serde(default = "default_status")]
    pub status: ListingStatus,
    pub condition: Option<String>,
    pub category_id: Option<String>,
    #[serde(default)]
    pub image_urls: Vec<String>,
    pub product_id: Option<i64>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
pub struct ListingRow {
    pub sku: String,
    pub listing_id: Option<String>,
    pub offer_id: Option<String>,
    pub title: String,
    pub price_usd: Option<f64>,
    pub currency: String,
    pub quantity: i32,
    pub status: String,
    pub condition: Option<String>,
    pub category_id: Option<String>,
    pub image_urls_raw: Option<String>,
    pub product_id: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

impl From<ListingRow> for EbayListing {
    fn from(row: ListingRow) -> Self {
        Self {
            sku: row.sku,
            listing_id: row.listing_id,
            offer_id: row.offer_id,
            title: row.title,
            price_usd: row.price_usd,
            currency: row.currency,
            quantity: row.quantity,
            status: ListingStatus::from_db(&row.status),
            condition: row.condition,
            category_id: row.category_id,
            image_urls: row
                .image_urls_raw
                .as_deref()
                .map(parse_text_array)
                .unwrap_or_default(),
            product_id: row.product_id,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListingQuery {
    pub status: Option<String>,
    pub q: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct ListingFilter {
    pub status: Option<ListingStatus>,
    pub q: Option<String>,
}

impl ListingQuery {
    pub fn page_params(&self) -> PageParams {
        PageParams {
            page: self.page,
            per_page: self.per_page,
        }
    }

    pub fn filter(&self) -> Result<ListingFilter, StoreError> {
        let status = match self.status.as_deref().map(str::trim) {
            None | Some("") | Some("all") => None,
            Some(raw) => Some(
                ListingStatus::parse(raw)
                    .ok_or_else(|| StoreError::invalid(format!("unknown status `{raw}`")))?,
            ),
        };
        Ok(ListingFilter {
            status,
            q: search_term(self.q.as_deref()),
        })
    }
}

impl ListingFilter {
    pub fn matches(&self, listing: &EbayListing) -> bool {
        if self.status.is_some_and(|s| s != listing.status) {
            return false;
        }
        match &self.q {
            Some(q) => contains_ci(&listing.title, q) || contains_ci(&listing.sku, q),
            None => true,
        }
    }

    pub fn apply(&self, rows: Vec<EbayListing>) -> Vec<EbayListing> {
        let mut rows: Vec<_> = rows.into_iter().filter(|l| self.matches(l)).collect();
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.sku.cmp(&b.sku)));
        rows
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListingPatch {
    pub title: Option<String>,
    pub price_usd: Option<f64>,
    pub quantity: Option<i32>,
    pub status: Option<ListingStatus>,
}

impl ListingPatch {
    pub fn validate(self) -> Result<ListingPatch, StoreError> {
        if self.title.is_none()
            && self.price_usd.is_none()
            && self.quantity.is_none()
            && self.status.is_none()
        {
            return Err(StoreError::invalid("patch contains no changes"));
        }
        let title = match self.title {
            Some(t) => {
                let t = t.trim().to_string();
                if t.is_empty() {
                    return Err(StoreError::invalid("title must not be blank"));
                }
                if t.chars().count() > TITLE_MAX {
                    return Err(StoreError::invalid(format!(
                        "title exceeds {TITLE_MAX} characters"
                    )));
                }
                Some(t)
            }
            None => None,
        };
        if self.price_usd.is_some_and(|p| !p.is_finite() || p <= 0.0) {
            return Err(StoreError::invalid("price_usd must be > 0"));
        }
        if self.quantity.is_some_and(|q| q < 0) {
            return Err(StoreError::invalid("quantity must be >= 0"));
        }
        Ok(ListingPatch { title, ..self })
    }

    pub fn apply(&self, listing: &mut EbayListing, at: DateTime<Utc>) {
        if let Some(title) = &self.title {
            listing.title = title.clone();
        }
        if let Some(price) = self.price_usd {
            listing.price_usd = Some(price);
        }
        if let Some(quantity) = self.quantity {
            listing.quantity = quantity;
        }
        let status = self.status.unwrap_or(listing.status);
        listing.status = status.for_quantity(listing.quantity);
        listing.updated_at = at;
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct InventoryStats {
    pub total: i64,
    pub by_status: BTreeMap<ListingStatus, i64>,
    pub total_quantity: i64,
    pub inventory_value_usd: f64,
}

impl InventoryStats {
    pub fn from_rows(rows: &[EbayListing]) -> Self {
        let mut by_status = BTreeMap::new();
        let mut total_quantity = 0i64;
        let mut value = 0.0f64;
        for listing in rows {
            *by_status.entry(listing.status).or_insert(0) += 1;
            total_quantity += i64::from(listing.quantity);
            value += listing.price_usd.unwrap_or(0.0) * f64::from(listing.quantity);
        }
        Self {
            total: rows.len() as i64,
            by_status,
            total_quantity,
            inventory_value_usd: round_cents(value),
        }
    }
}

pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
