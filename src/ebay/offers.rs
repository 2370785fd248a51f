#![allow(non_snake_case)]

use crate::ebay::config::ROOT;
use crate::http::build_client;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EbayOfferError {
    #[error("request failed: {0}")]
    Request(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Price {
    pub value: String,
    #[serde(default)]
    pub currency: Option<String>,
}

impl Price {
    pub fn amount(&self) -> Option<f64> {
        self.value
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v > 0.0)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PricingSummary {
    #[serde(default)]
    pub price: Option<Price>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OfferListing {
    #[serde(default)]
    pub listingId: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OfferSummary {
    #[serde(default)]
    pub offerId: Option<String>,
    /// `PUBLISHED` or `UNPUBLISHED`.
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub categoryId: Option<String>,
    #[serde(default)]
    pub pricingSummary: Option<PricingSummary>,
    #[serde(default)]
    pub listing: Option<OfferListing>,
}

impl OfferSummary {
    pub fn is_published(&self) -> bool {
        self.status
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("PUBLISHED"))
    }

    pub fn price(&self) -> Option<&Price> {
        self.pricingSummary.as_ref()?.price.as_ref()
    }
}

#[derive(Debug, Deserialize)]
struct OfferSearchResponse {
    offers: Option<Vec<OfferSummary>>,
}

pub async fn get_offers_by_sku(
    sku: &str,
    access_token: &str,
) -> Result<Vec<OfferSummary>, EbayOfferError> {
    let url = format!("{}/sell/inventory/v1/offer", *ROOT);
    let response = build_client()
        .get(url)
        .bearer_auth(access_token)
        .query(&[("sku", sku)])
        .send()
        .await
        .map_err(|err| EbayOfferError::Request(err.to_string()))?;
    // eBay answers 404 for SKUs that were never offered.
    if response.status() == 404 {
        return Ok(Vec::new());
    }
    if !response.status().is_success() {
        return Err(EbayOfferError::Request(format!(
            "HTTP {}",
            response.status()
        )));
    }
    let payload: OfferSearchResponse = response
        .json()
        .await
        .map_err(|err| EbayOfferError::Request(err.to_string()))?;
    Ok(payload.offers.unwrap_or_default())
}
