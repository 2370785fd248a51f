//! eBay listings mirrored from the Sell Inventory API.

pub mod models;
pub mod repo;

pub use models::{EbayListing, InventoryStats, ListingPatch, ListingQuery, ListingStatus};
pub use repo::ListingRepository;
