//! Products scraped from Yahoo Auctions and edited before listing.

pub mod models;
pub mod repo;

pub use models::{
    ProductPatch, ProductQuery, ProductStats, ProductStatus, ProductView, ScrapedProduct,
};
pub use repo::ProductRepository;
