//! Stock-take (tanaoroshi): expected versus counted stock per SKU.

pub mod models;
pub mod repo;

pub use models::{CountRequest, StockItemView, StockQuery, StockSummary};
pub use repo::StockRepository;
