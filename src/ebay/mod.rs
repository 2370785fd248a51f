pub mod auth;
pub mod config;
pub mod inventory;
pub mod offers;
pub mod sync;

pub use sync::{SyncReport, sync_inventory};
