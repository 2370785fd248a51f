use crate::store::{PageParams, StoreError, contains_ci, search_term};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use tracing::warn;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StockType {
    /// Held in the warehouse.
    InStock,
    /// Shipped straight from the supplier; usually counted as zero.
    Dropship,
    Set,
    Hybrid,
}

impl StockType {
    pub const ALL: [StockType; 4] = [
        StockType::InStock,
        StockType::Dropship,
        StockType::Set,
        StockType::Hybrid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StockType::InStock => "in_stock",
            StockType::Dropship => "dropship",
            StockType::Set => "set",
            StockType::Hybrid => "hybrid",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        let wanted = input.trim().to_lowercase();
        Self::ALL.into_iter().find(|s| s.as_str() == wanted)
    }

    pub fn from_db(raw: &str) -> Self {
        Self::parse(raw).unwrap_or_else(|| {
            warn!(target = "ops.store", stock_type = raw, "unknown stock type");
            StockType::InStock
        })
    }
}

fn default_stock_type() -> StockType {
    StockType::InStock
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct StockItem {
    pub id: i64,
    pub sku: String,
    pub product_name: String,
    pub location: Option<String>,
    #[serde(default = "default_stock_type")]
    #[sqlx(try_from = "String")]
    pub stock_type: StockType,
    #[serde(default)]
    pub expected_qty: i32,
    pub counted_qty: Option<i32>,
    #[serde(default)]
    pub unit_cost_jpy: i64,
    pub last_counted_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl TryFrom<String> for StockType {
    type Error = std::convert::Infallible;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Ok(StockType::from_db(&value))
    }
}

impl StockItem {
    pub fn discrepancy(&self) -> Option<i32> {
        self.counted_qty.map(|counted| counted - self.expected_qty)
    }
}

/// A stock item as returned by the API.
#[derive(Debug, Clone, Serialize)]
pub struct StockItemView {
    #[serde(flatten)]
    pub item: StockItem,
    pub discrepancy: Option<i32>,
}

impl From<StockItem> for StockItemView {
    fn from(item: StockItem) -> Self {
        Self {
            discrepancy: item.discrepancy(),
            item,
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct StockCount {
    pub id: i64,
    pub item_id: i64,
    pub counted_qty: i32,
    pub previous_qty: Option<i32>,
    pub counted_by: String,
    pub note: Option<String>,
    pub counted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountState {
    Counted,
    Uncounted,
    Discrepancy,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StockQuery {
    pub stock_type: Option<String>,
    pub location: Option<String>,
    pub q: Option<String>,
    pub state: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct StockFilter {
    pub stock_type: Option<StockType>,
    pub location: Option<String>,
    pub q: Option<String>,
    pub state: Option<CountState>,
}

impl StockQuery {
    pub fn page_params(&self) -> PageParams {
        PageParams {
            page: self.page,
            per_page: self.per_page,
        }
    }

    pub fn filter(&self) -> Result<StockFilter, StoreError> {
        let stock_type = match self.stock_type.as_deref().map(str::trim) {
            None | Some("") | Some("all") => None,
            Some(raw) => Some(
                StockType::parse(raw)
                    .ok_or_else(|| StoreError::invalid(format!("unknown stock_type `{raw}`")))?,
            ),
        };
        let state = match self.state.as_deref().map(|s| s.trim().to_lowercase()).as_deref() {
            None | Some("") | Some("all") => None,
            Some("counted") => Some(CountState::Counted),
            Some("uncounted") => Some(CountState::Uncounted),
            Some("discrepancy") => Some(CountState::Discrepancy),
            Some(other) => {
                return Err(StoreError::invalid(format!("unknown state `{other}`")));
            }
        };
        Ok(StockFilter {
            stock_type,
            location: self
                .location
                .as_deref()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string),
            q: search_term(self.q.as_deref()),
            state,
        })
    }
}

impl StockFilter {
    pub fn matches(&self, item: &StockItem) -> bool {
        if self.stock_type.is_some_and(|t| t != item.stock_type) {
            return false;
        }
        if let Some(location) = &self.location
            && item.location.as_deref() != Some(location.as_str())
        {
            return false;
        }
        if let Some(q) = &self.q
            && !(contains_ci(&item.sku, q) || contains_ci(&item.product_name, q))
        {
            return false;
        }
        match self.state {
            Some(CountState::Counted) => item.counted_qty.is_some(),
            Some(CountState::Uncounted) => item.counted_qty.is_none(),
            Some(CountState::Discrepancy) => item.discrepancy().is_some_and(|d| d != 0),
            None => true,
        }
    }

    pub fn apply(&self, rows: Vec<StockItem>) -> Vec<StockItem> {
        let mut rows: Vec<_> = rows.into_iter().filter(|i| self.matches(i)).collect();
        rows.sort_by(|a, b| a.sku.cmp(&b.sku).then(a.id.cmp(&b.id)));
        rows
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct StockSummary {
    pub total_items: i64,
    pub counted: i64,
    pub uncounted: i64,
    pub discrepancies: i64,
    pub expected_units: i64,
    pub counted_units: i64,
    pub expected_value_jpy: i64,
    pub counted_value_jpy: i64,
}

impl StockSummary {
    pub fn from_items(items: &[StockItem]) -> Self {
        let mut summary = StockSummary {
            total_items: items.len() as i64,
            ..Default::default()
        };
        for item in items {
            let expected = i64::from(item.expected_qty);
            summary.expected_units += expected;
            summary.expected_value_jpy += expected * item.unit_cost_jpy;
            match item.counted_qty {
                Some(counted) => {
                    let counted = i64::from(counted);
                    summary.counted += 1;
                    summary.counted_units += counted;
                    summary.counted_value_jpy += counted * item.unit_cost_jpy;
                    if counted != expected {
                        summary.discrepancies += 1;
                    }
                }
                None => summary.uncounted += 1,
            }
        }
        summary
    }
}

/// Body of `POST /stocktake/{id}/count`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CountRequest {
    pub counted_qty: i32,
    #[serde(default)]
    pub counted_by: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

/// A count ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct CountEntry {
    pub counted_qty: i32,
    pub counted_by: String,
    pub note: Option<String>,
}

impl CountRequest {
    pub fn validate(self, operator: &str) -> Result<CountEntry, StoreError> {
        if self.counted_qty < 0 {
            return Err(StoreError::invalid("counted_qty must be >= 0"));
        }
        let counted_by = self
            .counted_by
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| operator.to_string());
        Ok(CountEntry {
            counted_qty: self.counted_qty,
            counted_by,
            note: self
                .note
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        })
    }
}
