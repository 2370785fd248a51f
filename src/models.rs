use crate::store::{Page, Source, Sourced};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// `{ source?, data }` wrapper for single-record responses.
#[derive(Debug, Serialize)]
pub struct DataResponse<T> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    pub data: T,
}

impl<T> DataResponse<T> {
    pub fn written(data: T) -> Self {
        Self { source: None, data }
    }
}

impl<T> From<Sourced<T>> for DataResponse<T> {
    fn from(sourced: Sourced<T>) -> Self {
        Self {
            source: Some(sourced.source),
            data: sourced.value,
        }
    }
}

/// List responses flatten the page next to its source:
/// `{ source, items, total, page, per_page }`.
pub type ListResponse<T> = Sourced<Page<T>>;

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    pub job_id: String,
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub deleted: u64,
}
