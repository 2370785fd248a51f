use super::models::{EbayListing, InventoryStats, ListingFilter, ListingPatch, ListingRow};
use crate::catalog::repo::escape_like;
use crate::db::{Database, LISTINGS_TABLE};
use crate::pgarray::format_text_array;
use crate::store::{Page, PageRequest, SnapshotStore, Sourced, StoreError, note_fallback};
use chrono::Utc;
use sqlx::{PgPool, Postgres, QueryBuilder};

const SELECT_COLUMNS: &str = "sku, listing_id, offer_id, title, price_usd, currency, quantity, \
     status, condition, category_id, image_urls::text AS image_urls_raw, product_id, updated_at";

#[derive(Clone)]
pub struct ListingRepository {
    db: Option<Database>,
    snapshot: SnapshotStore<EbayListing>,
}

impl ListingRepository {
    pub fn new(db: Option<Database>, snapshot: SnapshotStore<EbayListing>) -> Self {
        Self { db, snapshot }
    }

    pub async fn list(
        &self,
        filter: &ListingFilter,
        page: PageRequest,
    ) -> Result<Sourced<Page<EbayListing>>, StoreError> {
        if let Some(db) = &self.db {
            match pg::list(db.pool(), filter, page).await {
                Ok(found) => return Ok(Sourced::database(found)),
                Err(err) => note_fallback(LISTINGS_TABLE, &err),
            }
        }
        let rows = self.snapshot.load().await?;
        Ok(Sourced::snapshot(page.slice(filter.apply(rows))))
    }

    pub async fn get(&self, sku: &str) -> Result<Sourced<EbayListing>, StoreError> {
        if let Some(db) = &self.db {
            match pg::get(db.pool(), sku).await {
                Ok(Some(found)) => return Ok(Sourced::database(found)),
                Ok(None) => return Err(not_found(sku)),
                Err(err) => note_fallback(LISTINGS_TABLE, &err),
            }
        }
        self.snapshot
            .load()
            .await?
            .into_iter()
            .find(|l| l.sku == sku)
            .map(Sourced::snapshot)
            .ok_or_else(|| not_found(sku))
    }

    pub async fn update(&self, sku: &str, patch: &ListingPatch) -> Result<EbayListing, StoreError> {
        if let Some(db) = &self.db {
            return pg::update(db.pool(), sku, patch)
                .await?
                .ok_or_else(|| not_found(sku));
        }
        self.snapshot
            .mutate(|rows| {
                let listing = rows
                    .iter_mut()
                    .find(|l| l.sku == sku)
                    .ok_or_else(|| not_found(sku))?;
                patch.apply(listing, Utc::now());
                Ok(listing.clone())
            })
            .await
    }

    /// Insert new listings and replace existing ones with the same SKU.
    pub async fn upsert_many(&self, listings: &[EbayListing]) -> Result<u64, StoreError> {
        if listings.is_empty() {
            return Ok(0);
        }
        if let Some(db) = &self.db {
            return Ok(pg::upsert_many(db.pool(), listings).await?);
        }
        self.snapshot
            .mutate(|rows| {
                for incoming in listings {
                    match rows.iter_mut().find(|l| l.sku == incoming.sku) {
                        Some(existing) => {
                            let product_id = existing.product_id;
                            *existing = incoming.clone();
                            // Sync has no idea about catalog links; keep ours.
                            existing.product_id = incoming.product_id.or(product_id);
                        }
                        None => rows.push(incoming.clone()),
                    }
                }
                Ok(listings.len() as u64)
            })
            .await
    }

    pub async fn stats(&self) -> Result<Sourced<InventoryStats>, StoreError> {
        if let Some(db) = &self.db {
            match pg::all(db.pool()).await {
                Ok(rows) => return Ok(Sourced::database(InventoryStats::from_rows(&rows))),
                Err(err) => note_fallback(LISTINGS_TABLE, &err),
            }
        }
        let rows = self.snapshot.load().await?;
        Ok(Sourced::snapshot(InventoryStats::from_rows(&rows)))
    }
}

fn not_found(sku: &str) -> StoreError {
    StoreError::not_found(format!("listing {sku}"))
}

mod pg {
    use super::*;

    fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &ListingFilter) {
        qb.push(" WHERE TRUE");
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(q) = &filter.q {
            let pattern = format!("%{}%", escape_like(q));
            qb.push(" AND (title ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR sku ILIKE ")
                .push_bind(pattern)
                .push(")");
        }
    }

    pub(super) async fn list(
        pool: &PgPool,
        filter: &ListingFilter,
        page: PageRequest,
    ) -> Result<Page<EbayListing>, sqlx::Error> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM ebay_inventory");
        push_filters(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

        let mut select = QueryBuilder::new(format!("SELECT {SELECT_COLUMNS} FROM ebay_inventory"));
        push_filters(&mut select, filter);
        select
            .push(" ORDER BY updated_at DESC, sku ASC LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());
        let rows: Vec<ListingRow> = select.build_query_as().fetch_all(pool).await?;
        Ok(Page {
            items: rows.into_iter().map(EbayListing::from).collect(),
            total,
            page: page.page,
            per_page: page.per_page,
        })
    }

    pub(super) async fn get(pool: &PgPool, sku: &str) -> Result<Option<EbayListing>, sqlx::Error> {
        let row: Option<ListingRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM ebay_inventory WHERE sku = $1"
        ))
        .bind(sku)
        .fetch_optional(pool)
        .await?;
        Ok(row.map(EbayListing::from))
    }

    pub(super) async fn all(pool: &PgPool) -> Result<Vec<EbayListing>, sqlx::Error> {
        let rows: Vec<ListingRow> =
            sqlx::query_as(&format!("SELECT {SELECT_COLUMNS} FROM ebay_inventory"))
                .fetch_all(pool)
                .await?;
        Ok(rows.into_iter().map(EbayListing::from).collect())
    }

    /// Read-modify-write under a row lock so the quantity/status rule sees
    /// the current status.
    pub(super) async fn update(
        pool: &PgPool,
        sku: &str,
        patch: &ListingPatch,
    ) -> Result<Option<EbayListing>, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let row: Option<ListingRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM ebay_inventory WHERE sku = $1 FOR UPDATE"
        ))
        .bind(sku)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut listing = EbayListing::from(row);
        patch.apply(&mut listing, Utc::now());
        sqlx::query(
            "UPDATE ebay_inventory SET title = $2, price_usd = $3, quantity = $4, status = $5, \
             updated_at = $6 WHERE sku = $1",
        )
        .bind(sku)
        .bind(&listing.title)
        .bind(listing.price_usd)
        .bind(listing.quantity)
        .bind(listing.status.as_str())
        .bind(listing.updated_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(Some(listing))
    }

    pub(super) async fn upsert_many(
        pool: &PgPool,
        listings: &[EbayListing],
    ) -> Result<u64, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let mut affected = 0;
        for listing in listings {
            let result = sqlx::query(
                "INSERT INTO ebay_inventory (sku, listing_id, offer_id, title, price_usd, currency, \
                 quantity, status, condition, category_id, image_urls, product_id, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11::text[], $12, $13) \
                 ON CONFLICT (sku) DO UPDATE SET listing_id = EXCLUDED.listing_id, \
                 offer_id = EXCLUDED.offer_id, title = EXCLUDED.title, \
                 price_usd = EXCLUDED.price_usd, currency = EXCLUDED.currency, \
                 quantity = EXCLUDED.quantity, status = EXCLUDED.status, \
                 condition = EXCLUDED.condition, category_id = EXCLUDED.category_id, \
                 image_urls = EXCLUDED.image_urls, \
                 product_id = COALESCE(EXCLUDED.product_id, ebay_inventory.product_id), \
                 updated_at = EXCLUDED.updated_at",
            )
            .bind(&listing.sku)
            .bind(&listing.listing_id)
            .bind(&listing.offer_id)
            .bind(&listing.title)
            .bind(listing.price_usd)
            .bind(&listing.currency)
            .bind(listing.quantity)
            .bind(listing.status.as_str())
            .bind(&listing.condition)
            .bind(&listing.category_id)
            .bind(format_text_array(&listing.image_urls))
            .bind(listing.product_id)
            .bind(listing.updated_at)
            .execute(&mut *tx)
            .await?;
            affected += result.rows_affected();
        }
        tx.commit().await?;
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::models::ListingStatus;
    use crate::inventory::models::tests::listing;
    use crate::store::Source;

    fn repo(dir: &tempfile::TempDir) -> ListingRepository {
        ListingRepository::new(None, SnapshotStore::new(dir.path(), "listings"))
    }

    #[tokio::test]
    async fn upsert_replaces_by_sku_and_keeps_catalog_link() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(&dir);
        let mut first = listing("CAM-1", 100.0, 1, ListingStatus::Active);
        first.product_id = Some(42);
        repo.upsert_many(&[first]).await.unwrap();

        let refreshed = listing("CAM-1", 120.0, 2, ListingStatus::Active);
        let other = listing("CAM-2", 50.0, 1, ListingStatus::Draft);
        assert_eq!(repo.upsert_many(&[refreshed, other]).await.unwrap(), 2);

        let got = repo.get("CAM-1").await.unwrap();
        assert_eq!(got.source, Source::Snapshot);
        assert_eq!(got.value.price_usd, Some(120.0));
        assert_eq!(got.value.product_id, Some(42));

        let stats = repo.stats().await.unwrap().value;
        assert_eq!(stats.total, 2);
    }

    #[tokio::test]
    async fn update_unknown_sku_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let patch = ListingPatch {
            quantity: Some(1),
            ..Default::default()
        };
        assert!(matches!(
            repo(&dir).update("missing", &patch).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn update_applies_stock_rule() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(&dir);
        repo.upsert_many(&[listing("A", 10.0, 1, ListingStatus::Active)])
            .await
            .unwrap();
        let patch = ListingPatch {
            quantity: Some(0),
            ..Default::default()
        };
        let updated = repo.update("A", &patch).await.unwrap();
        assert_eq!(updated.status, ListingStatus::OutOfStock);
    }
}
