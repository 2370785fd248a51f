//! Shared plumbing for the record stores: where a response came from,
//! paging, and the error type every store returns.

pub mod snapshot;

pub use snapshot::SnapshotStore;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Database,
    Snapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct Sourced<T> {
    pub source: Source,
    #[serde(flatten)]
    pub value: T,
}

impl<T> Sourced<T> {
    pub fn database(value: T) -> Self {
        Self {
            source: Source::Database,
            value,
        }
    }

    pub fn snapshot(value: T) -> Self {
        Self {
            source: Source::Snapshot,
            value,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Sourced<U> {
        Sourced {
            source: self.source,
            value: f(self.value),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Invalid(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("snapshot error: {0}")]
    Snapshot(String),
}

impl StoreError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}

/// Log a failed database read before serving the snapshot instead.
pub fn note_fallback(dataset: &'static str, err: &sqlx::Error) {
    warn!(
        target = "ops.store",
        dataset,
        error = %err,
        "database read failed; serving snapshot"
    );
    crate::metrics::store_fallback(dataset);
}

#[derive(Debug, Clone, Copy, Deserialize, Default)]
pub struct PageParams {
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub per_page: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl PageRequest {
    pub fn clamp(params: PageParams, default_size: u32, max_size: u32) -> Self {
        let per_page = params
            .per_page
            .unwrap_or(default_size)
            .clamp(1, max_size.max(1));
        Self {
            page: params.page.unwrap_or(1).max(1),
            per_page,
        }
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.per_page)
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.per_page)
    }

    /// Cut an already filtered and ordered list down to this page.
    pub fn slice<T>(&self, rows: Vec<T>) -> Page<T> {
        let total = rows.len() as i64;
        let items = rows
            .into_iter()
            .skip(self.offset() as usize)
            .take(self.per_page as usize)
            .collect();
        Page {
            items,
            total,
            page: self.page,
            per_page: self.per_page,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            per_page: self.per_page,
        }
    }
}

/// Case-insensitive substring match used by the snapshot filters.
pub fn contains_ci(haystack: &str, needle_lower: &str) -> bool {
    haystack.to_lowercase().contains(needle_lower)
}

/// Normalise a free-text filter: trimmed, lowercased, `None` when blank.
pub fn search_term(raw: Option<&str>) -> Option<String> {
    raw.map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty())
}
