//! One report covering the database, its tables and the snapshot files.

use crate::db::{Database, KNOWN_TABLES, redact_database_url};
use crate::store::SnapshotStore;
use crate::store::snapshot::decode_records;
use serde::{Serialize, de::DeserializeOwned};
use std::path::PathBuf;
use tracing::warn;

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsReport {
    pub service: &'static str,
    pub version: &'static str,
    pub database: DatabaseStatus,
    pub tables: Vec<TableStatus>,
    pub snapshots: Vec<SnapshotStatus>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DatabaseStatus {
    pub configured: bool,
    pub reachable: bool,
    pub url: Option<String>,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableStatus {
    pub table: &'static str,
    pub exists: bool,
    pub rows: Option<i64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotStatus {
    pub dataset: &'static str,
    pub path: String,
    pub exists: bool,
    pub records: Option<usize>,
    pub error: Option<String>,
}

/// A snapshot file plus the decoder its store reads it with.
#[derive(Clone)]
pub struct SnapshotCheck {
    dataset: &'static str,
    path: PathBuf,
    decode: fn(&[u8]) -> Result<usize, String>,
}

impl SnapshotCheck {
    pub fn of<T: Serialize + DeserializeOwned>(store: &SnapshotStore<T>) -> Self {
        Self {
            dataset: store.dataset(),
            path: store.path().to_path_buf(),
            decode: count_records::<T>,
        }
    }
}

fn count_records<T: DeserializeOwned>(bytes: &[u8]) -> Result<usize, String> {
    decode_records::<T>(bytes).map(|rows| rows.len())
}

#[derive(Clone)]
pub struct Diagnostics {
    db: Option<Database>,
    database_url: Option<String>,
    snapshots: Vec<SnapshotCheck>,
}

impl Diagnostics {
    pub fn new(
        db: Option<Database>,
        database_url: Option<String>,
        snapshots: Vec<SnapshotCheck>,
    ) -> Self {
        Self {
            db,
            database_url,
            snapshots,
        }
    }

    pub async fn run(&self) -> DiagnosticsReport {
        let (database, tables) = self.inspect_database().await;
        let mut snapshots = Vec::with_capacity(self.snapshots.len());
        for check in &self.snapshots {
            snapshots.push(inspect_snapshot(check).await);
        }
        DiagnosticsReport {
            service: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            database,
            tables,
            snapshots,
        }
    }

    async fn inspect_database(&self) -> (DatabaseStatus, Vec<TableStatus>) {
        let mut status = DatabaseStatus {
            configured: self.database_url.is_some(),
            url: self.database_url.as_deref().map(redact_database_url),
            ..Default::default()
        };
        let Some(db) = &self.db else {
            if status.configured {
                status.error = Some("pool not initialised".into());
            }
            return (status, Vec::new());
        };

        match db.ping().await {
            Ok(ping) => {
                status.reachable = true;
                status.latency_ms = Some(ping.latency_ms);
            }
            Err(err) => {
                warn!(target = "ops.db", error = %err, "diagnostics ping failed");
                let message = err.to_string();
                let tables = KNOWN_TABLES
                    .iter()
                    .map(|&table| TableStatus {
                        table,
                        exists: false,
                        rows: None,
                        error: Some(format!("not checked: {message}")),
                    })
                    .collect();
                status.error = Some(message);
                return (status, tables);
            }
        }

        let mut tables = Vec::with_capacity(KNOWN_TABLES.len());
        for table in KNOWN_TABLES {
            tables.push(inspect_table(db, table).await);
        }
        (status, tables)
    }
}

async fn inspect_table(db: &Database, table: &'static str) -> TableStatus {
    let mut status = TableStatus {
        table,
        exists: false,
        rows: None,
        error: None,
    };
    match db.table_exists(table).await {
        Ok(false) => {}
        Ok(true) => {
            status.exists = true;
            match db.count_rows(table).await {
                Ok(rows) => status.rows = Some(rows),
                Err(err) => status.error = Some(err.to_string()),
            }
        }
        Err(err) => status.error = Some(err.to_string()),
    }
    status
}

async fn inspect_snapshot(check: &SnapshotCheck) -> SnapshotStatus {
    let mut status = SnapshotStatus {
        dataset: check.dataset,
        path: check.path.display().to_string(),
        exists: false,
        records: None,
        error: None,
    };
    let bytes = match tokio::fs::read(&check.path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return status,
        Err(err) => {
            status.error = Some(err.to_string());
            return status;
        }
    };
    status.exists = true;
    match (check.decode)(&bytes) {
        Ok(n) => status.records = Some(n),
        Err(err) => status.error = Some(err),
    }
    status
}
