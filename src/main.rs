mod api;
mod catalog;
mod config;
mod db;
mod diagnostics;
mod ebay;
mod http;
mod images;
mod inventory;
mod jobs;
mod metrics;
mod models;
mod pgarray;
mod security;
mod stocktake;
mod store;

use api::AppState;
use catalog::ProductRepository;
use config::AppConfig;
use db::{Database, redact_database_url};
use diagnostics::{Diagnostics, SnapshotCheck};
use inventory::ListingRepository;
use jobs::{JobKind, JobQueue};
use metrics_exporter_prometheus::PrometheusBuilder;
use security::AuthState;
use stocktake::StockRepository;
use std::{net::SocketAddr, sync::Arc};
use store::SnapshotStore;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "ops.api", "server crashed: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let dotenv = dotenvy::dotenv().ok();
    init_tracing();
    if let Some(path) = dotenv {
        info!(target = "ops.config", path = %path.display(), "loaded .env");
    }

    let config = AppConfig::from_env();
    let db = match &config.database_url {
        Some(url) => {
            let db = Database::connect_lazy(url, &config)?;
            if config.auto_migrate
                && let Err(err) = db.migrate().await
            {
                // Keep serving from snapshots; diagnostics will show the outage.
                warn!(target = "ops.db", error = %err, "auto-migrate failed");
            }
            Some(db)
        }
        None => {
            warn!(
                target = "ops.config",
                snapshot_dir = %config.snapshot_dir.display(),
                "DATABASE_URL not set; running offline from snapshots"
            );
            None
        }
    };

    let dir = config.snapshot_dir.as_path();
    let product_snapshot: SnapshotStore<catalog::ScrapedProduct> = SnapshotStore::new(dir, "products");
    let listing_snapshot: SnapshotStore<inventory::EbayListing> = SnapshotStore::new(dir, "listings");
    let item_snapshot: SnapshotStore<stocktake::models::StockItem> =
        SnapshotStore::new(dir, "stock_items");
    let count_snapshot: SnapshotStore<stocktake::models::StockCount> =
        SnapshotStore::new(dir, "stock_counts");
    let diagnostics = Diagnostics::new(
        db.clone(),
        config.database_url.clone(),
        vec![
            SnapshotCheck::of(&product_snapshot),
            SnapshotCheck::of(&listing_snapshot),
            SnapshotCheck::of(&item_snapshot),
            SnapshotCheck::of(&count_snapshot),
        ],
    );

    let products = ProductRepository::new(db.clone(), product_snapshot);
    let listings = ListingRepository::new(db.clone(), listing_snapshot);
    let stock = StockRepository::new(db.clone(), item_snapshot, count_snapshot);

    let sync_listings = listings.clone();
    let (queue, _worker) = JobQueue::spawn(move |kind| {
        let listings = sync_listings.clone();
        async move {
            match kind {
                JobKind::InventorySync => ebay::sync_inventory(&listings)
                    .await
                    .map_err(|err| err.to_string()),
            }
        }
    });

    let openapi: serde_json::Value = serde_yaml::from_str(include_str!("../docs/openapi.yaml"))
        .unwrap_or_else(|err| {
            warn!(target = "ops.api", error = %err, "openapi document did not parse");
            serde_json::json!({"openapi": "3.0.3"})
        });
    let prometheus_handle = PrometheusBuilder::new().install_recorder()?;

    if let Some(url) = &config.database_url {
        info!(target = "ops.db", url = %redact_database_url(url), "database mode");
    }
    let state = AppState {
        config: Arc::new(config),
        products,
        listings,
        stock,
        queue,
        diagnostics,
        ebay_network: *ebay::config::NETWORK_ENABLED,
        openapi: Arc::new(openapi),
        prometheus_handle,
    };
    let app = api::router(state, AuthState::from_env(), body_limit_from_env());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "ops.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(256 * 1024)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,sqlx=warn"));
    let _ = fmt().with_env_filter(filter).try_init();
}
