use crate::images::{ImageCandidates, ResolvedImages, normalize_image_url, resolve_images};
use crate::pgarray::parse_text_array;
use crate::store::{PageParams, StoreError, contains_ci, search_term};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use std::cmp::Ordering;
use tracing::warn;

pub const EBAY_TITLE_MAX: usize = 80;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    Scraped,
    Edited,
    Approved,
    Listed,
    Rejected,
}

impl ProductStatus {
    pub const ALL: [ProductStatus; 5] = [
        ProductStatus::Scraped,
        ProductStatus::Edited,
        ProductStatus::Approved,
        ProductStatus::Listed,
        ProductStatus::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProductStatus::Scraped => "scraped",
            ProductStatus::Edited => "edited",
            ProductStatus::Approved => "approved",
            ProductStatus::Listed => "listed",
            ProductStatus::Rejected => "rejected",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        let wanted = input.trim().to_lowercase();
        Self::ALL.into_iter().find(|s| s.as_str() == wanted)
    }

    /// Legacy rows carry free-form statuses; anything unrecognised is
    /// treated as freshly scraped.
    pub fn from_db(raw: &str) -> Self {
        Self::parse(raw).unwrap_or_else(|| {
            warn!(target = "ops.store", status = raw, "unknown product status");
            ProductStatus::Scraped
        })
    }
}

fn now() -> DateTime<Utc> {
    Utc::now()
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapedProduct {
    pub id: i64,
    pub source_item_id: String,
    pub title: String,
    #[serde(default)]
    pub price_jpy: i64,
    pub category: Option<String>,
    pub condition: Option<String>,
    pub seller: Option<String>,
    pub description: Option<String>,
    pub source_url: Option<String>,
    #[serde(default)]
    pub image_urls: Vec<String>,
    pub active_image_url: Option<String>,
    pub scraped_data: Option<Value>,
    #[serde(default = "default_status")]
    pub status: ProductStatus,
    pub ebay_title: Option<String>,
    pub ebay_price_usd: Option<f64>,
    pub sku: Option<String>,
    #[serde(default = "now")]
    pub scraped_at: DateTime<Utc>,
    #[serde(default = "now")]
    pub updated_at: DateTime<Utc>,
}

fn default_status() -> ProductStatus {
    ProductStatus::Scraped
}

impl ScrapedProduct {
    pub fn resolve_images(&self, max: usize, placeholder: Option<&str>) -> ResolvedImages {
        resolve_images(
            ImageCandidates {
                active: self.active_image_url.as_deref(),
                stored: &self.image_urls,
                payload: self.scraped_data.as_ref(),
            },
            max,
            placeholder,
        )
    }
}

/// Row shape as selected from Postgres; the array column arrives as text.
#[derive(Debug, sqlx::FromRow)]
pub struct ProductRow {
    pub id: i64,
    pub source_item_id: String,
    pub title: String,
    pub price_jpy: i64,
    pub category: Option<String>,
    pub condition: Option<String>,
    pub seller: Option<String>,
    pub description: Option<String>,
    pub source_url: Option<String>,
    pub image_urls_raw: Option<String>,
    pub active_image_url: Option<String>,
    pub scraped_data: Option<Value>,
    pub status: String,
    pub ebay_title: Option<String>,
    pub ebay_price_usd: Option<f64>,
    pub sku: Option<String>,
    pub scraped_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ProductRow> for ScrapedProduct {
    fn from(row: ProductRow) -> Self {
        Self {
            id: row.id,
            source_item_id: row.source_item_id,
            title: row.title,
            price_jpy: row.price_jpy,
            category: row.category,
            condition: row.condition,
            seller: row.seller,
            description: row.description,
            source_url: row.source_url,
            image_urls: row
                .image_urls_raw
                .as_deref()
                .map(parse_text_array)
                .unwrap_or_default(),
            active_image_url: row.active_image_url,
            scraped_data: row.scraped_data,
            status: ProductStatus::from_db(&row.status),
            ebay_title: row.ebay_title,
            ebay_price_usd: row.ebay_price_usd,
            sku: row.sku,
            scraped_at: row.scraped_at,
            updated_at: row.updated_at,
        }
    }
}

/// A product as returned by the API, with its images already resolved.
#[derive(Debug, Clone, Serialize)]
pub struct ProductView {
    #[serde(flatten)]
    pub product: ScrapedProduct,
    pub images: ResolvedImages,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProductSort {
    #[default]
    Newest,
    Oldest,
    PriceAsc,
    PriceDesc,
    Title,
}

impl ProductSort {
    fn parse(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "newest" => Some(Self::Newest),
            "oldest" => Some(Self::Oldest),
            "price_asc" => Some(Self::PriceAsc),
            "price_desc" => Some(Self::PriceDesc),
            "title" => Some(Self::Title),
            _ => None,
        }
    }

    pub fn order_by(&self) -> &'static str {
        match self {
            Self::Newest => "scraped_at DESC, id DESC",
            Self::Oldest => "scraped_at ASC, id ASC",
            Self::PriceAsc => "price_jpy ASC, id ASC",
            Self::PriceDesc => "price_jpy DESC, id DESC",
            Self::Title => "title ASC, id ASC",
        }
    }

    fn compare(&self, a: &ScrapedProduct, b: &ScrapedProduct) -> Ordering {
        match self {
            Self::Newest => b.scraped_at.cmp(&a.scraped_at).then(b.id.cmp(&a.id)),
            Self::Oldest => a.scraped_at.cmp(&b.scraped_at).then(a.id.cmp(&b.id)),
            Self::PriceAsc => a.price_jpy.cmp(&b.price_jpy).then(a.id.cmp(&b.id)),
            Self::PriceDesc => b.price_jpy.cmp(&a.price_jpy).then(b.id.cmp(&a.id)),
            Self::Title => a.title.cmp(&b.title).then(a.id.cmp(&b.id)),
        }
    }
}

/// Raw query string for `GET /products`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductQuery {
    pub status: Option<String>,
    pub q: Option<String>,
    pub category: Option<String>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    pub sort: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl ProductQuery {
    pub fn page_params(&self) -> PageParams {
        PageParams {
            page: self.page,
            per_page: self.per_page,
        }
    }

    pub fn filter(&self) -> Result<ProductFilter, StoreError> {
        let status = match self.status.as_deref().map(str::trim) {
            None | Some("") | Some("all") => None,
            Some(raw) => Some(
                ProductStatus::parse(raw)
                    .ok_or_else(|| StoreError::invalid(format!("unknown status `{raw}`")))?,
            ),
        };
        let sort = match self.sort.as_deref().map(str::trim) {
            None | Some("") => ProductSort::default(),
            Some(raw) => ProductSort::parse(raw)
                .ok_or_else(|| StoreError::invalid(format!("unknown sort `{raw}`")))?,
        };
        if let (Some(min), Some(max)) = (self.min_price, self.max_price)
            && min > max
        {
            return Err(StoreError::invalid("min_price exceeds max_price"));
        }
        Ok(ProductFilter {
            status,
            q: search_term(self.q.as_deref()),
            category: self
                .category
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
            min_price: self.min_price,
            max_price: self.max_price,
            sort,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProductFilter {
    pub status: Option<ProductStatus>,
    /// Already lowercased.
    pub q: Option<String>,
    pub category: Option<String>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    pub sort: ProductSort,
}

impl ProductFilter {
    pub fn matches(&self, product: &ScrapedProduct) -> bool {
        if self.status.is_some_and(|s| s != product.status) {
            return false;
        }
        if let Some(category) = &self.category
            && product.category.as_deref() != Some(category.as_str())
        {
            return false;
        }
        if self.min_price.is_some_and(|min| product.price_jpy < min)
            || self.max_price.is_some_and(|max| product.price_jpy > max)
        {
            return false;
        }
        if let Some(q) = &self.q {
            let hit = contains_ci(&product.title, q)
                || contains_ci(&product.source_item_id, q)
                || product.ebay_title.as_deref().is_some_and(|t| contains_ci(t, q))
                || product.sku.as_deref().is_some_and(|s| contains_ci(s, q));
            if !hit {
                return false;
            }
        }
        true
    }

    pub fn apply(&self, rows: Vec<ScrapedProduct>) -> Vec<ScrapedProduct> {
        let mut rows: Vec<_> = rows.into_iter().filter(|p| self.matches(p)).collect();
        rows.sort_by(|a, b| self.sort.compare(a, b));
        rows
    }
}

/// Body of `PATCH /products/{id}`. Blank optional text clears the field.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProductPatch {
    pub title: Option<String>,
    pub price_jpy: Option<i64>,
    pub category: Option<String>,
    pub condition: Option<String>,
    pub description: Option<String>,
    pub ebay_title: Option<String>,
    pub ebay_price_usd: Option<f64>,
    pub sku: Option<String>,
    pub status: Option<ProductStatus>,
    pub active_image_url: Option<String>,
    pub image_urls: Option<Vec<String>>,
}

/// A checked patch. `Some(None)` clears a nullable column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductChanges {
    pub title: Option<String>,
    pub price_jpy: Option<i64>,
    pub category: Option<Option<String>>,
    pub condition: Option<Option<String>>,
    pub description: Option<Option<String>>,
    pub ebay_title: Option<Option<String>>,
    pub ebay_price_usd: Option<Option<f64>>,
    pub sku: Option<Option<String>>,
    pub status: Option<ProductStatus>,
    pub active_image_url: Option<Option<String>>,
    pub image_urls: Option<Vec<String>>,
}

fn clearable(value: Option<String>) -> Option<Option<String>> {
    value.map(|v| {
        let trimmed = v.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

impl ProductPatch {
    pub fn validate(self, max_images: usize) -> Result<ProductChanges, StoreError> {
        let title = match self.title {
            Some(t) if t.trim().is_empty() => {
                return Err(StoreError::invalid("title must not be blank"));
            }
            other => other.map(|t| t.trim().to_string()),
        };
        if self.price_jpy.is_some_and(|p| p < 0) {
            return Err(StoreError::invalid("price_jpy must be >= 0"));
        }
        if self
            .ebay_price_usd
            .is_some_and(|p| !p.is_finite() || p < 0.0)
        {
            return Err(StoreError::invalid("ebay_price_usd must be >= 0"));
        }
        let ebay_title = clearable(self.ebay_title);
        if let Some(Some(t)) = &ebay_title
            && t.chars().count() > EBAY_TITLE_MAX
        {
            return Err(StoreError::invalid(format!(
                "ebay_title exceeds {EBAY_TITLE_MAX} characters"
            )));
        }
        let active_image_url = match clearable(self.active_image_url) {
            Some(Some(raw)) => Some(Some(normalize_image_url(&raw).ok_or_else(|| {
                StoreError::invalid(format!("invalid active_image_url: {raw}"))
            })?)),
            other => other,
        };
        let image_urls = match self.image_urls {
            Some(urls) => {
                let mut cleaned = Vec::new();
                for raw in urls.iter().filter(|u| !u.trim().is_empty()) {
                    let url = normalize_image_url(raw)
                        .ok_or_else(|| StoreError::invalid(format!("invalid image url: {raw}")))?;
                    if !cleaned.contains(&url) {
                        cleaned.push(url);
                    }
                }
                if cleaned.len() > max_images {
                    return Err(StoreError::invalid(format!(
                        "at most {max_images} images allowed"
                    )));
                }
                Some(cleaned)
            }
            None => None,
        };

        let changes = ProductChanges {
            title,
            price_jpy: self.price_jpy,
            category: clearable(self.category),
            condition: clearable(self.condition),
            description: clearable(self.description),
            ebay_title,
            ebay_price_usd: self.ebay_price_usd.map(Some),
            sku: clearable(self.sku),
            status: self.status,
            active_image_url,
            image_urls,
        };
        if changes == ProductChanges::default() {
            return Err(StoreError::invalid("patch contains no changes"));
        }
        Ok(changes)
    }
}

impl ProductChanges {
    pub fn touches_content(&self) -> bool {
        let content = ProductChanges {
            status: None,
            ..self.clone()
        };
        content != ProductChanges::default()
    }

    /// Status after applying these changes to a product currently in `current`.
    pub fn next_status(&self, current: ProductStatus) -> ProductStatus {
        match self.status {
            Some(explicit) => explicit,
            None if current == ProductStatus::Scraped && self.touches_content() => {
                ProductStatus::Edited
            }
            None => current,
        }
    }

    pub fn apply(&self, product: &mut ScrapedProduct, at: DateTime<Utc>) {
        product.status = self.next_status(product.status);
        if let Some(v) = &self.title {
            product.title = v.clone();
        }
        if let Some(v) = self.price_jpy {
            product.price_jpy = v;
        }
        if let Some(v) = &self.category {
            product.category = v.clone();
        }
        if let Some(v) = &self.condition {
            product.condition = v.clone();
        }
        if let Some(v) = &self.description {
            product.description = v.clone();
        }
        if let Some(v) = &self.ebay_title {
            product.ebay_title = v.clone();
        }
        if let Some(v) = self.ebay_price_usd {
            product.ebay_price_usd = v;
        }
        if let Some(v) = &self.sku {
            product.sku = v.clone();
        }
        if let Some(v) = &self.active_image_url {
            product.active_image_url = v.clone();
        }
        if let Some(v) = &self.image_urls {
            product.image_urls = v.clone();
        }
        product.updated_at = at;
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProductStats {
    pub total: i64,
    pub by_status: std::collections::BTreeMap<ProductStatus, i64>,
    pub average_price_jpy: Option<f64>,
}

impl ProductStats {
    pub fn from_rows(rows: &[ScrapedProduct]) -> Self {
        let mut by_status = std::collections::BTreeMap::new();
        for product in rows {
            *by_status.entry(product.status).or_insert(0) += 1;
        }
        let average_price_jpy = (!rows.is_empty()).then(|| {
            rows.iter().map(|p| p.price_jpy as f64).sum::<f64>() / rows.len() as f64
        });
        Self {
            total: rows.len() as i64,
            by_status,
            average_price_jpy,
        }
    }
}
