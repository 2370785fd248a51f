use super::models::{
    ProductChanges, ProductFilter, ProductRow, ProductStats, ProductStatus, ScrapedProduct,
};
use crate::db::{Database, PRODUCTS_TABLE};
use crate::pgarray::format_text_array;
use crate::store::{Page, PageRequest, SnapshotStore, Sourced, StoreError, note_fallback};
use chrono::Utc;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use std::collections::BTreeMap;

pub const MAX_BULK_DELETE: usize = 500;

const SELECT_COLUMNS: &str = "id, source_item_id, title, price_jpy, category, condition, seller, \
     description, source_url, image_urls::text AS image_urls_raw, active_image_url, scraped_data, \
     status, ebay_title, ebay_price_usd, sku, scraped_at, updated_at";

#[derive(Clone)]
pub struct ProductRepository {
    db: Option<Database>,
    snapshot: SnapshotStore<ScrapedProduct>,
}

impl ProductRepository {
    pub fn new(db: Option<Database>, snapshot: SnapshotStore<ScrapedProduct>) -> Self {
        Self { db, snapshot }
    }

    pub async fn list(
        &self,
        filter: &ProductFilter,
        page: PageRequest,
    ) -> Result<Sourced<Page<ScrapedProduct>>, StoreError> {
        if let Some(db) = &self.db {
            match pg::list(db.pool(), filter, page).await {
                Ok(found) => return Ok(Sourced::database(found)),
                Err(err) => note_fallback(PRODUCTS_TABLE, &err),
            }
        }
        let rows = self.snapshot.load().await?;
        Ok(Sourced::snapshot(page.slice(filter.apply(rows))))
    }

    pub async fn get(&self, id: i64) -> Result<Sourced<ScrapedProduct>, StoreError> {
        if let Some(db) = &self.db {
            match pg::get(db.pool(), id).await {
                Ok(Some(found)) => return Ok(Sourced::database(found)),
                Ok(None) => return Err(not_found(id)),
                Err(err) => note_fallback(PRODUCTS_TABLE, &err),
            }
        }
        self.snapshot
            .load()
            .await?
            .into_iter()
            .find(|p| p.id == id)
            .map(Sourced::snapshot)
            .ok_or_else(|| not_found(id))
    }

    pub async fn update(
        &self,
        id: i64,
        changes: &ProductChanges,
    ) -> Result<ScrapedProduct, StoreError> {
        if let Some(db) = &self.db {
            return pg::update(db.pool(), id, changes)
                .await?
                .ok_or_else(|| not_found(id));
        }
        self.snapshot
            .mutate(|rows| {
                let product = rows
                    .iter_mut()
                    .find(|p| p.id == id)
                    .ok_or_else(|| not_found(id))?;
                changes.apply(product, Utc::now());
                Ok(product.clone())
            })
            .await
    }

    pub async fn delete(&self, id: i64) -> Result<(), StoreError> {
        let deleted = self.delete_many(&[id]).await?;
        if deleted == 0 {
            return Err(not_found(id));
        }
        Ok(())
    }

    /// Delete every listed id that exists; returns how many were removed.
    pub async fn delete_many(&self, ids: &[i64]) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Err(StoreError::invalid("ids must not be empty"));
        }
        if ids.len() > MAX_BULK_DELETE {
            return Err(StoreError::invalid(format!(
                "at most {MAX_BULK_DELETE} ids per request"
            )));
        }
        if let Some(db) = &self.db {
            let result = sqlx::query("DELETE FROM yahoo_scraped_products WHERE id = ANY($1)")
                .bind(ids)
                .execute(db.pool())
                .await?;
            return Ok(result.rows_affected());
        }
        self.snapshot
            .mutate(|rows| {
                let before = rows.len();
                rows.retain(|p| !ids.contains(&p.id));
                Ok((before - rows.len()) as u64)
            })
            .await
    }

    pub async fn stats(&self) -> Result<Sourced<ProductStats>, StoreError> {
        if let Some(db) = &self.db {
            match pg::stats(db.pool()).await {
                Ok(stats) => return Ok(Sourced::database(stats)),
                Err(err) => note_fallback(PRODUCTS_TABLE, &err),
            }
        }
        let rows = self.snapshot.load().await?;
        Ok(Sourced::snapshot(ProductStats::from_rows(&rows)))
    }
}

fn not_found(id: i64) -> StoreError {
    StoreError::not_found(format!("product {id}"))
}

mod pg {
    use super::*;

    fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &ProductFilter) {
        qb.push(" WHERE TRUE");
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(category) = &filter.category {
            qb.push(" AND category = ").push_bind(category.clone());
        }
        if let Some(min) = filter.min_price {
            qb.push(" AND price_jpy >= ").push_bind(min);
        }
        if let Some(max) = filter.max_price {
            qb.push(" AND price_jpy <= ").push_bind(max);
        }
        if let Some(q) = &filter.q {
            let pattern = format!("%{}%", escape_like(q));
            qb.push(" AND (title ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR source_item_id ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR COALESCE(ebay_title, '') ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR COALESCE(sku, '') ILIKE ")
                .push_bind(pattern)
                .push(")");
        }
    }

    pub(super) async fn list(
        pool: &PgPool,
        filter: &ProductFilter,
        page: PageRequest,
    ) -> Result<Page<ScrapedProduct>, sqlx::Error> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM yahoo_scraped_products");
        push_filters(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

        let mut select = QueryBuilder::new(format!(
            "SELECT {SELECT_COLUMNS} FROM yahoo_scraped_products"
        ));
        push_filters(&mut select, filter);
        select
            .push(" ORDER BY ")
            .push(filter.sort.order_by())
            .push(" LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());
        let rows: Vec<ProductRow> = select.build_query_as().fetch_all(pool).await?;

        Ok(Page {
            items: rows.into_iter().map(ScrapedProduct::from).collect(),
            total,
            page: page.page,
            per_page: page.per_page,
        })
    }

    pub(super) async fn get(pool: &PgPool, id: i64) -> Result<Option<ScrapedProduct>, sqlx::Error> {
        let row: Option<ProductRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM yahoo_scraped_products WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(row.map(ScrapedProduct::from))
    }

    pub(super) async fn update(
        pool: &PgPool,
        id: i64,
        changes: &ProductChanges,
    ) -> Result<Option<ScrapedProduct>, sqlx::Error> {
        let mut qb = QueryBuilder::new("UPDATE yahoo_scraped_products SET updated_at = NOW()");
        if let Some(status) = changes.status {
            qb.push(", status = ").push_bind(status.as_str());
        } else if changes.touches_content() {
            qb.push(", status = CASE WHEN status = ")
                .push_bind(ProductStatus::Scraped.as_str())
                .push(" THEN ")
                .push_bind(ProductStatus::Edited.as_str())
                .push(" ELSE status END");
        }
        if let Some(v) = &changes.title {
            qb.push(", title = ").push_bind(v.clone());
        }
        if let Some(v) = changes.price_jpy {
            qb.push(", price_jpy = ").push_bind(v);
        }
        if let Some(v) = &changes.category {
            qb.push(", category = ").push_bind(v.clone());
        }
        if let Some(v) = &changes.condition {
            qb.push(", condition = ").push_bind(v.clone());
        }
        if let Some(v) = &changes.description {
            qb.push(", description = ").push_bind(v.clone());
        }
        if let Some(v) = &changes.ebay_title {
            qb.push(", ebay_title = ").push_bind(v.clone());
        }
        if let Some(v) = changes.ebay_price_usd {
            qb.push(", ebay_price_usd = ").push_bind(v);
        }
        if let Some(v) = &changes.sku {
            qb.push(", sku = ").push_bind(v.clone());
        }
        if let Some(v) = &changes.active_image_url {
            qb.push(", active_image_url = ").push_bind(v.clone());
        }
        if let Some(v) = &changes.image_urls {
            // Written as a literal so legacy text columns accept it too.
            qb.push(", image_urls = ")
                .push_bind(format_text_array(v))
                .push("::text[]");
        }
        qb.push(" WHERE id = ")
            .push_bind(id)
            .push(format!(" RETURNING {SELECT_COLUMNS}"));
        let row: Option<ProductRow> = qb.build_query_as().fetch_optional(pool).await?;
        Ok(row.map(ScrapedProduct::from))
    }

    pub(super) async fn stats(pool: &PgPool) -> Result<ProductStats, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM yahoo_scraped_products GROUP BY status",
        )
        .fetch_all(pool)
        .await?;
        let mut by_status = BTreeMap::new();
        let mut total = 0i64;
        for row in rows {
            let status: String = row.try_get("status")?;
            let n: i64 = row.try_get("n")?;
            total += n;
            *by_status.entry(ProductStatus::from_db(&status)).or_insert(0) += n;
        }
        let average_price_jpy: Option<f64> =
            sqlx::query_scalar("SELECT AVG(price_jpy)::float8 FROM yahoo_scraped_products")
                .fetch_one(pool)
                .await?;
        Ok(ProductStats {
            total,
            by_status,
            average_price_jpy,
        })
    }
}

/// Escape `%`, `_` and `\` so user text matches literally inside ILIKE.
pub(crate) fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}
