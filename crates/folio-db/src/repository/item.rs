//! # Item Repository
//!
//! Catalog reads for the purchase lifecycle, plus the catalog state
//! transitions. Catalog management proper lives elsewhere; the only column
//! the lifecycle writes during normal operation is `purchase_count`, and
//! that happens inside the order ledger's paid transition.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::retry::RetryPolicy;
use folio_core::validation::{validate_id, validate_price};
use folio_core::{CoreError, Item, ItemStatus};

/// Repository for catalog items.
#[derive(Debug, Clone)]
pub struct ItemRepository {
    pool: SqlitePool,
    retry: RetryPolicy,
}

impl ItemRepository {
    /// Creates a new ItemRepository.
    pub fn new(pool: SqlitePool, retry: RetryPolicy) -> Self {
        ItemRepository { pool, retry }
    }

    /// Gets an item by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Item>> {
        self.retry
            .run("get_item", || async move {
                let mut conn = self.pool.acquire().await?;
                fetch_item(&mut conn, id).await
            })
            .await
    }

    /// Gets an item by ID, failing with `ItemNotFound` when absent.
    pub async fn get(&self, id: &str) -> DbResult<Item> {
        self.get_by_id(id)
            .await?
            .ok_or_else(|| CoreError::ItemNotFound(id.to_string()).into())
    }

    /// Lists items in a given state, newest first.
    pub async fn list_by_status(&self, status: ItemStatus, limit: i64) -> DbResult<Vec<Item>> {
        self.retry
            .run("list_items", || async move {
                let items = sqlx::query_as::<_, Item>(
                    "SELECT * FROM items WHERE status = ?1 ORDER BY created_at DESC, id LIMIT ?2",
                )
                .bind(status)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?;

                Ok(items)
            })
            .await
    }

    /// Counts all items, whatever their state.
    pub async fn count(&self) -> DbResult<i64> {
        self.retry
            .run("count_items", || async move {
                let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items")
                    .fetch_one(&self.pool)
                    .await?;
                Ok(count)
            })
            .await
    }

    /// Inserts a catalog item.
    pub async fn insert(&self, item: &Item) -> DbResult<()> {
        validate_id("item_id", &item.id).map_err(CoreError::from)?;
        validate_id("creator_id", &item.creator_id).map_err(CoreError::from)?;
        validate_price(item.price_cents).map_err(CoreError::from)?;

        debug!(id = %item.id, price_cents = item.price_cents, status = %item.status, "Inserting item");

        sqlx::query(
            r#"
            INSERT INTO items (
                id, title, creator_id, price_cents, status,
                storage_path, bonus_url, purchase_count,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&item.id)
        .bind(&item.title)
        .bind(&item.creator_id)
        .bind(item.price_cents)
        .bind(item.status)
        .bind(&item.storage_path)
        .bind(&item.bonus_url)
        .bind(item.purchase_count)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { field, .. } => DbError::duplicate(field, item.id.clone()),
            other => other,
        })?;

        Ok(())
    }

    /// Moves an item to `next`, enforcing the catalog state machine.
    ///
    /// The update is a compare-and-swap on the status that was read, so a
    /// concurrent transition makes this one fail instead of skipping a step.
    pub async fn transition_status(&self, id: &str, next: ItemStatus) -> DbResult<Item> {
        let current = self.get(id).await?;

        if !current.status.can_transition_to(next) {
            return Err(CoreError::InvalidItemTransition {
                item_id: id.to_string(),
                from: current.status,
                to: next,
            }
            .into());
        }

        let item = sqlx::query_as::<_, Item>(
            "UPDATE items SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4 RETURNING *",
        )
        .bind(next)
        .bind(Utc::now())
        .bind(id)
        .bind(current.status)
        .fetch_optional(&self.pool)
        .await?;

        match item {
            Some(item) => {
                info!(item_id = %id, from = %current.status, to = %next, "Item status changed");
                Ok(item)
            }
            None => {
                let now = self.get(id).await?;
                Err(CoreError::InvalidItemTransition {
                    item_id: id.to_string(),
                    from: now.status,
                    to: next,
                }
                .into())
            }
        }
    }
}

/// Reads one item on an existing connection or transaction.
pub(crate) async fn fetch_item(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Item>> {
    let item = sqlx::query_as::<_, Item>("SELECT * FROM items WHERE id = ?1")
        .bind(id)
        .fetch_optional(conn)
        .await?;

    Ok(item)
}

/// Increments the purchase counter. Only the paid transition calls this.
pub(crate) async fn bump_purchase_count(conn: &mut SqliteConnection, item_id: &str) -> DbResult<()> {
    let result = sqlx::query("UPDATE items SET purchase_count = purchase_count + 1 WHERE id = ?1")
        .bind(item_id)
        .execute(conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(CoreError::ItemNotFound(item_id.to_string()).into());
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::{db, item};

    #[tokio::test]
    async fn test_insert_and_get() {
        let db = db().await;
        let draft = item("item-1", 9_900, ItemStatus::Draft);
        db.items().insert(&draft).await.unwrap();

        let loaded = db.items().get("item-1").await.unwrap();
        assert_eq!(loaded.price_cents, 9_900);
        assert_eq!(loaded.status, ItemStatus::Draft);

        let missing = db.items().get("nope").await;
        assert!(matches!(missing, Err(DbError::Rule(CoreError::ItemNotFound(_)))));
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_rejected() {
        let db = db().await;
        let draft = item("item-1", 100, ItemStatus::Draft);
        db.items().insert(&draft).await.unwrap();

        let again = db.items().insert(&draft).await;
        assert!(matches!(again, Err(DbError::UniqueViolation { .. })));
    }

    #[tokio::test]
    async fn test_negative_price_is_rejected() {
        let db = db().await;
        let bad = item("item-1", -1, ItemStatus::Draft);
        assert!(matches!(
            db.items().insert(&bad).await,
            Err(DbError::Rule(CoreError::Validation(_)))
        ));
    }

    #[tokio::test]
    async fn test_status_transitions() {
        let db = db().await;
        db.items()
            .insert(&item("item-1", 100, ItemStatus::Draft))
            .await
            .unwrap();

        let items = db.items();
        items.transition_status("item-1", ItemStatus::PendingReview).await.unwrap();
        let published = items.transition_status("item-1", ItemStatus::Published).await.unwrap();
        assert_eq!(published.status, ItemStatus::Published);

        let listed = items.list_by_status(ItemStatus::Published, 10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(items.count().await.unwrap(), 1);

        let skip = items.transition_status("item-1", ItemStatus::Rejected).await;
        assert!(matches!(
            skip,
            Err(DbError::Rule(CoreError::InvalidItemTransition {
                from: ItemStatus::Published,
                to: ItemStatus::Rejected,
                ..
            }))
        ));
    }
}
