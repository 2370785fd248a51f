use crate::ebay::config::ROOT;
use crate::http::build_client;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EbayInventoryError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid response: {0}")]
    Deserialize(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryPage {
    #[serde(default)]
    pub total: Option<u32>,
    #[serde(default)]
    pub inventory_items: Vec<RemoteInventoryItem>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteInventoryItem {
    pub sku: String,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub product: Option<RemoteProduct>,
    #[serde(default)]
    pub availability: Option<RemoteAvailability>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteProduct {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub image_urls: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteAvailability {
    #[serde(default)]
    pub ship_to_location_availability: Option<RemoteShipToLocation>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteShipToLocation {
    #[serde(default)]
    pub quantity: Option<i32>,
}

impl RemoteInventoryItem {
    pub fn quantity(&self) -> i32 {
        self.availability
            .as_ref()
            .and_then(|a| a.ship_to_location_availability.as_ref())
            .and_then(|s| s.quantity)
            .unwrap_or(0)
            .max(0)
    }
}

pub async fn list_inventory_items(
    offset: u32,
    limit: u32,
    access_token: &str,
) -> Result<InventoryPage, EbayInventoryError> {
    let url = format!("{}/sell/inventory/v1/inventory_item", *ROOT);
    let response = build_client()
        .get(url)
        .bearer_auth(access_token)
        .query(&[("limit", limit), ("offset", offset)])
        .send()
        .await
        .map_err(|err| EbayInventoryError::Request(err.to_string()))?;

    if !response.status().is_success() {
        return Err(EbayInventoryError::Request(format!(
            "HTTP {}",
            response.status()
        )));
    }

    response
        .json()
        .await
        .map_err(|err| EbayInventoryError::Deserialize(err.to_string()))
}
