use super::models::{CountEntry, CountState, StockCount, StockFilter, StockItem, StockSummary};
use crate::catalog::repo::escape_like;
use crate::db::{Database, STOCK_TABLE};
use crate::store::{Page, PageRequest, SnapshotStore, Sourced, StoreError, note_fallback};
use chrono::Utc;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::error;

const ITEM_COLUMNS: &str = "id, sku, product_name, location, stock_type, expected_qty, \
     counted_qty, unit_cost_jpy, last_counted_at, notes";

#[derive(Clone)]
pub struct StockRepository {
    db: Option<Database>,
    items: SnapshotStore<StockItem>,
    counts: SnapshotStore<StockCount>,
}

impl StockRepository {
    pub fn new(
        db: Option<Database>,
        items: SnapshotStore<StockItem>,
        counts: SnapshotStore<StockCount>,
    ) -> Self {
        Self { db, items, counts }
    }

    pub async fn list(
        &self,
        filter: &StockFilter,
        page: PageRequest,
    ) -> Result<Sourced<Page<StockItem>>, StoreError> {
        if let Some(db) = &self.db {
            match pg::list(db.pool(), filter, page).await {
                Ok(found) => return Ok(Sourced::database(found)),
                Err(err) => note_fallback(STOCK_TABLE, &err),
            }
        }
        let rows = self.items.load().await?;
        Ok(Sourced::snapshot(page.slice(filter.apply(rows))))
    }

    pub async fn summary(&self) -> Result<Sourced<StockSummary>, StoreError> {
        if let Some(db) = &self.db {
            match pg::summary(db.pool()).await {
                Ok(summary) => return Ok(Sourced::database(summary)),
                Err(err) => note_fallback(STOCK_TABLE, &err),
            }
        }
        let rows = self.items.load().await?;
        Ok(Sourced::snapshot(StockSummary::from_items(&rows)))
    }

    /// Store a count for one item and append it to the item's history.
    pub async fn record_count(&self, id: i64, entry: &CountEntry) -> Result<StockItem, StoreError> {
        if let Some(db) = &self.db {
            return pg::record_count(db.pool(), id, entry)
                .await?
                .ok_or_else(|| not_found(id));
        }

        // Lock order is items then counts; nothing else holds both.
        let items_guard = self.items.lock().await;
        let counts_guard = self.counts.lock().await;
        let mut items = items_guard.read().await?;
        let mut counts = counts_guard.read().await?;

        let now = Utc::now();
        let item = items
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| not_found(id))?;
        let previous = item.counted_qty;
        item.counted_qty = Some(entry.counted_qty);
        item.last_counted_at = Some(now);
        let item = item.clone();

        let next_id = counts.iter().map(|c| c.id).max().unwrap_or(0) + 1;
        counts.push(StockCount {
            id: next_id,
            item_id: id,
            counted_qty: entry.counted_qty,
            previous_qty: previous,
            counted_by: entry.counted_by.clone(),
            note: entry.note.clone(),
            counted_at: now,
        });

        // History first, so a failed item write can be undone.
        counts_guard.write(&counts).await?;
        if let Err(err) = items_guard.write(&items).await {
            counts.pop();
            if let Err(undo) = counts_guard.write(&counts).await {
                error!(target = "ops.store", item_id = id, error = %undo, "count history rollback failed");
            }
            return Err(err);
        }
        Ok(item)
    }

    /// Counts for one item, newest first.
    pub async fn history(&self, id: i64) -> Result<Sourced<Vec<StockCount>>, StoreError> {
        if let Some(db) = &self.db {
            match pg::history(db.pool(), id).await {
                Ok(Some(counts)) => return Ok(Sourced::database(counts)),
                Ok(None) => return Err(not_found(id)),
                Err(err) => note_fallback(STOCK_TABLE, &err),
            }
        }
        if !self.items.load().await?.iter().any(|i| i.id == id) {
            return Err(not_found(id));
        }
        let mut counts: Vec<StockCount> = self
            .counts
            .load()
            .await?
            .into_iter()
            .filter(|c| c.item_id == id)
            .collect();
        counts.sort_by(|a, b| b.counted_at.cmp(&a.counted_at).then(b.id.cmp(&a.id)));
        Ok(Sourced::snapshot(counts))
    }
}

fn not_found(id: i64) -> StoreError {
    StoreError::not_found(format!("stock item {id}"))
}

mod pg {
    use super::*;

    fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &StockFilter) {
        qb.push(" WHERE TRUE");
        if let Some(stock_type) = filter.stock_type {
            qb.push(" AND stock_type = ").push_bind(stock_type.as_str());
        }
        if let Some(location) = &filter.location {
            qb.push(" AND location = ").push_bind(location.clone());
        }
        if let Some(q) = &filter.q {
            let pattern = format!("%{}%", escape_like(q));
            qb.push(" AND (sku ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR product_name ILIKE ")
                .push_bind(pattern)
                .push(")");
        }
        match filter.state {
            Some(CountState::Counted) => {
                qb.push(" AND counted_qty IS NOT NULL");
            }
            Some(CountState::Uncounted) => {
                qb.push(" AND counted_qty IS NULL");
            }
            Some(CountState::Discrepancy) => {
                qb.push(" AND counted_qty IS NOT NULL AND counted_qty <> expected_qty");
            }
            None => {}
        }
    }

    pub(super) async fn list(
        pool: &PgPool,
        filter: &StockFilter,
        page: PageRequest,
    ) -> Result<Page<StockItem>, sqlx::Error> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM inventory_stocktake");
        push_filters(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

        let mut select =
            QueryBuilder::new(format!("SELECT {ITEM_COLUMNS} FROM inventory_stocktake"));
        push_filters(&mut select, filter);
        select
            .push(" ORDER BY sku ASC, id ASC LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());
        let items: Vec<StockItem> = select.build_query_as().fetch_all(pool).await?;
        Ok(Page {
            items,
            total,
            page: page.page,
            per_page: page.per_page,
        })
    }

    pub(super) async fn summary(pool: &PgPool) -> Result<StockSummary, sqlx::Error> {
        let items: Vec<StockItem> =
            sqlx::query_as(&format!("SELECT {ITEM_COLUMNS} FROM inventory_stocktake"))
                .fetch_all(pool)
                .await?;
        Ok(StockSummary::from_items(&items))
    }

    pub(super) async fn record_count(
        pool: &PgPool,
        id: i64,
        entry: &CountEntry,
    ) -> Result<Option<StockItem>, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let previous: Option<Option<i32>> =
            sqlx::query_scalar("SELECT counted_qty FROM inventory_stocktake WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(previous) = previous else {
            return Ok(None);
        };
        let item: StockItem = sqlx::query_as(&format!(
            "UPDATE inventory_stocktake SET counted_qty = $2, last_counted_at = NOW() \
             WHERE id = $1 RETURNING {ITEM_COLUMNS}"
        ))
        .bind(id)
        .bind(entry.counted_qty)
        .fetch_one(&mut *tx)
        .await?;
        sqlx::query(
            "INSERT INTO stocktake_counts (item_id, counted_qty, previous_qty, counted_by, note) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(id)
        .bind(entry.counted_qty)
        .bind(previous)
        .bind(&entry.counted_by)
        .bind(&entry.note)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(Some(item))
    }

    pub(super) async fn history(
        pool: &PgPool,
        id: i64,
    ) -> Result<Option<Vec<StockCount>>, sqlx::Error> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM inventory_stocktake WHERE id = $1)")
                .bind(id)
                .fetch_one(pool)
                .await?;
        if !exists {
            return Ok(None);
        }
        let counts: Vec<StockCount> = sqlx::query_as(
            "SELECT id, item_id, counted_qty, previous_qty, counted_by, note, counted_at \
             FROM stocktake_counts WHERE item_id = $1 ORDER BY counted_at DESC, id DESC",
        )
        .bind(id)
        .fetch_all(pool)
        .await?;
        Ok(Some(counts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stocktake::models::CountRequest;
    use crate::stocktake::models::tests::item;

    async fn offline(items: Vec<StockItem>) -> (tempfile::TempDir, StockRepository) {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path(), "stock_items");
        store
            .mutate(|rows| {
                *rows = items;
                Ok(())
            })
            .await
            .unwrap();
        let repo = StockRepository::new(None, store, SnapshotStore::new(dir.path(), "stock_counts"));
        (dir, repo)
    }

    #[tokio::test]
    async fn counting_updates_item_and_history() {
        let (_dir, repo) = offline(vec![item(1, "A", 3, None), item(2, "B", 1, None)]).await;
        let first = CountRequest {
            counted_qty: 2,
            counted_by: None,
            note: None,
        }
        .validate("sato")
        .unwrap();
        let updated = repo.record_count(1, &first).await.unwrap();
        assert_eq!(updated.counted_qty, Some(2));
        assert!(updated.last_counted_at.is_some());

        let second = CountRequest {
            counted_qty: 3,
            counted_by: Some("suzuki".into()),
            note: Some("recount".into()),
        }
        .validate("sato")
        .unwrap();
        repo.record_count(1, &second).await.unwrap();

        let history = repo.history(1).await.unwrap().value;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].counted_by, "suzuki");
        assert_eq!(history[0].previous_qty, Some(2));
        assert_eq!(history[1].previous_qty, None);

        let summary = repo.summary().await.unwrap().value;
        assert_eq!(summary.counted, 1);
        assert_eq!(summary.discrepancies, 0);
    }

    #[tokio::test]
    async fn unknown_item_is_not_found() {
        let (_dir, repo) = offline(vec![item(1, "A", 3, None)]).await;
        let entry = CountRequest {
            counted_qty: 1,
            counted_by: None,
            note: None,
        }
        .validate("sato")
        .unwrap();
        assert!(matches!(
            repo.record_count(9, &entry).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(repo.history(9).await, Err(StoreError::NotFound(_))));
        assert!(repo.history(1).await.unwrap().value.is_empty());
    }

    fn count(qty: i32) -> CountEntry {
        CountRequest {
            counted_qty: qty,
            counted_by: None,
            note: None,
        }
        .validate("sato")
        .unwrap()
    }

    #[tokio::test]
    async fn failed_history_write_leaves_item_uncounted() {
        let (dir, repo) = offline(vec![item(1, "A", 3, None)]).await;
        std::fs::create_dir(dir.path().join("stock_counts.json.tmp")).unwrap();

        assert!(matches!(
            repo.record_count(1, &count(2)).await,
            Err(StoreError::Snapshot(_))
        ));
        let items = repo.items.load().await.unwrap();
        assert_eq!(items[0].counted_qty, None);
        assert!(repo.history(1).await.unwrap().value.is_empty());
    }

    #[tokio::test]
    async fn failed_item_write_rolls_back_history() {
        let (dir, repo) = offline(vec![item(1, "A", 3, None)]).await;
        std::fs::create_dir(dir.path().join("stock_items.json.tmp")).unwrap();

        assert!(matches!(
            repo.record_count(1, &count(2)).await,
            Err(StoreError::Snapshot(_))
        ));
        assert_eq!(repo.items.load().await.unwrap()[0].counted_qty, None);
        assert!(repo.history(1).await.unwrap().value.is_empty());
    }
}
