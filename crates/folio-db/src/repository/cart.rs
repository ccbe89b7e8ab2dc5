//! # Cart Repository
//!
//! Per-user cart entries and priced snapshots.
//!
//! ## Snapshot
//! ```text
//! cart_entries ⋈ items  (ordered by added_at, id)
//!       │
//!       ├── published, not owned ──► priced lines ──► CartSummary
//!       └── anything else        ──► unavailable_item_ids
//! ```
//!
//! Prices are read when the snapshot is taken. Nothing is cached from the
//! moment an entry was added.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use crate::repository::item::fetch_item;
use crate::repository::tier::load_tiers;
use crate::retry::RetryPolicy;
use folio_core::cart::{CartLine, CartSnapshot};
use folio_core::validation::validate_id;
use folio_core::{CartEntry, CoreError, ItemStatus, MAX_CART_ITEMS};

/// Outcome of adding an item.
///
/// A repeat add is not an error; the caller gets the existing entry back
/// with a flag.
#[derive(Debug, Clone, PartialEq)]
pub enum CartAdd {
    Added(CartEntry),
    AlreadyInCart(CartEntry),
}

impl CartAdd {
    pub fn entry(&self) -> &CartEntry {
        match self {
            CartAdd::Added(entry) | CartAdd::AlreadyInCart(entry) => entry,
        }
    }

    pub fn already_in_cart(&self) -> bool {
        matches!(self, CartAdd::AlreadyInCart(_))
    }
}

/// A cart entry joined with its item, as read for pricing.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct CartRow {
    pub entry_id: i64,
    pub item_id: String,
    pub title: String,
    pub price_cents: i64,
    pub status: ItemStatus,
    pub added_at: DateTime<Utc>,
    pub owned: bool,
}

impl CartRow {
    /// Published, not yet owned, and not free.
    pub fn is_purchasable(&self) -> bool {
        self.status.is_purchasable() && !self.owned && self.price_cents > 0
    }

    pub fn into_line(self) -> CartLine {
        CartLine {
            entry_id: self.entry_id,
            item_id: self.item_id,
            title: self.title,
            price_cents: self.price_cents,
            added_at: self.added_at,
        }
    }
}

/// Repository for cart entries.
#[derive(Debug, Clone)]
pub struct CartRepository {
    pool: SqlitePool,
    retry: RetryPolicy,
}

impl CartRepository {
    pub fn new(pool: SqlitePool, retry: RetryPolicy) -> Self {
        CartRepository { pool, retry }
    }

    /// Adds `item_id` to the user's cart.
    ///
    /// ## Errors
    /// - `ItemNotFound` if the item does not exist
    /// - `ItemUnavailable` if it is not published, is free, or is already owned
    /// - `CartTooLarge` once the cart holds `MAX_CART_ITEMS` entries
    pub async fn add(&self, user_id: &str, item_id: &str) -> DbResult<CartAdd> {
        validate_id("user_id", user_id).map_err(CoreError::from)?;
        validate_id("item_id", item_id).map_err(CoreError::from)?;

        self.retry
            .run("cart_add", || async move { self.add_once(user_id, item_id).await })
            .await
    }

    async fn add_once(&self, user_id: &str, item_id: &str) -> DbResult<CartAdd> {
        let mut conn = self.pool.acquire().await?;

        if let Some(existing) = fetch_entry(&mut conn, user_id, item_id).await? {
            return Ok(CartAdd::AlreadyInCart(existing));
        }

        let item = fetch_item(&mut conn, item_id)
            .await?
            .ok_or_else(|| CoreError::ItemNotFound(item_id.to_string()))?;

        let unavailable = |reason: &str| CoreError::ItemUnavailable {
            item_id: item_id.to_string(),
            reason: reason.to_string(),
        };

        if !item.status.is_purchasable() {
            return Err(unavailable("item is not published").into());
        }
        if item.is_free() {
            return Err(unavailable("free items need no purchase").into());
        }
        if owns(&mut conn, user_id, item_id).await? {
            return Err(unavailable("item is already owned").into());
        }

        let count = count_entries(&mut conn, user_id).await?;
        if count as usize >= MAX_CART_ITEMS {
            return Err(CoreError::CartTooLarge { max: MAX_CART_ITEMS }.into());
        }

        // A concurrent add of the same item lands on the unique key
        let inserted = sqlx::query_as::<_, CartEntry>(
            r#"
            INSERT INTO cart_entries (user_id, item_id, added_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (user_id, item_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(item_id)
        .bind(Utc::now())
        .fetch_optional(&mut *conn)
        .await?;

        match inserted {
            Some(entry) => {
                debug!(user_id = %user_id, item_id = %item_id, entry_id = entry.id, "Added to cart");
                Ok(CartAdd::Added(entry))
            }
            None => {
                let existing = fetch_entry(&mut conn, user_id, item_id)
                    .await?
                    .ok_or_else(|| CoreError::ItemNotFound(item_id.to_string()))?;
                Ok(CartAdd::AlreadyInCart(existing))
            }
        }
    }

    /// Removes one entry. Fails with `CartEntryNotFound` if it is not the user's.
    pub async fn remove(&self, user_id: &str, entry_id: i64) -> DbResult<()> {
        let removed = self
            .retry
            .run("cart_remove", || async move {
                let result = sqlx::query("DELETE FROM cart_entries WHERE id = ?1 AND user_id = ?2")
                    .bind(entry_id)
                    .bind(user_id)
                    .execute(&self.pool)
                    .await?;
                Ok(result.rows_affected())
            })
            .await?;

        if removed == 0 {
            return Err(CoreError::CartEntryNotFound(entry_id).into());
        }

        debug!(user_id = %user_id, entry_id, "Removed from cart");
        Ok(())
    }

    /// Empties the cart. Always succeeds; returns the number of entries removed.
    pub async fn clear(&self, user_id: &str) -> DbResult<u64> {
        let removed = self
            .retry
            .run("cart_clear", || async move {
                let result = sqlx::query("DELETE FROM cart_entries WHERE user_id = ?1")
                    .bind(user_id)
                    .execute(&self.pool)
                    .await?;
                Ok(result.rows_affected())
            })
            .await?;

        debug!(user_id = %user_id, removed, "Cart cleared");
        Ok(removed)
    }

    /// Counts every entry, including unavailable ones.
    pub async fn count(&self, user_id: &str) -> DbResult<i64> {
        self.retry
            .run("cart_count", || async move {
                let mut conn = self.pool.acquire().await?;
                count_entries(&mut conn, user_id).await
            })
            .await
    }

    /// Lists raw entries in cart order.
    pub async fn list(&self, user_id: &str) -> DbResult<Vec<CartEntry>> {
        self.retry
            .run("cart_list", || async move {
                let entries = sqlx::query_as::<_, CartEntry>(
                    "SELECT * FROM cart_entries WHERE user_id = ?1 ORDER BY added_at, id",
                )
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;

                Ok(entries)
            })
            .await
    }

    /// Prices the cart at current item prices.
    pub async fn snapshot(&self, user_id: &str) -> DbResult<CartSnapshot> {
        let (rows, tiers) = self
            .retry
            .run("cart_snapshot", || async move {
                let mut conn = self.pool.acquire().await?;
                let rows = fetch_cart_rows(&mut conn, user_id).await?;
                let tiers = load_tiers(&mut conn).await?;
                Ok((rows, tiers))
            })
            .await?;

        let (lines, unavailable): (Vec<CartRow>, Vec<CartRow>) =
            rows.into_iter().partition(CartRow::is_purchasable);

        Ok(CartSnapshot::new(
            user_id,
            lines.into_iter().map(CartRow::into_line).collect(),
            unavailable.into_iter().map(|row| row.item_id).collect(),
            &tiers,
        ))
    }
}

// =============================================================================
// Connection-level helpers
// =============================================================================

async fn fetch_entry(conn: &mut SqliteConnection, user_id: &str, item_id: &str) -> DbResult<Option<CartEntry>> {
    let entry = sqlx::query_as::<_, CartEntry>("SELECT * FROM cart_entries WHERE user_id = ?1 AND item_id = ?2")
        .bind(user_id)
        .bind(item_id)
        .fetch_optional(conn)
        .await?;

    Ok(entry)
}

async fn count_entries(conn: &mut SqliteConnection, user_id: &str) -> DbResult<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cart_entries WHERE user_id = ?1")
        .bind(user_id)
        .fetch_one(conn)
        .await?;

    Ok(count)
}

async fn owns(conn: &mut SqliteConnection, user_id: &str, item_id: &str) -> DbResult<bool> {
    let owned: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM orders WHERE user_id = ?1 AND item_id = ?2 AND status = 'paid')",
    )
    .bind(user_id)
    .bind(item_id)
    .fetch_one(conn)
    .await?;

    Ok(owned)
}

/// Reads the cart joined with current item state, in cart order.
pub(crate) async fn fetch_cart_rows(conn: &mut SqliteConnection, user_id: &str) -> DbResult<Vec<CartRow>> {
    let rows = sqlx::query_as::<_, CartRow>(
        r#"
        SELECT
            c.id AS entry_id,
            c.item_id,
            i.title,
            i.price_cents,
            i.status,
            c.added_at,
            EXISTS (
                SELECT 1 FROM orders o
                WHERE o.user_id = c.user_id AND o.item_id = c.item_id AND o.status = 'paid'
            ) AS owned
        FROM cart_entries c
        JOIN items i ON i.id = c.item_id
        WHERE c.user_id = ?1
        ORDER BY c.added_at, c.id
        "#,
    )
    .bind(user_id)
    .fetch_all(conn)
    .await?;

    Ok(rows)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use crate::repository::test_support::{db, item, published};
    use crate::{Database, DbConfig};
    use std::time::Duration;

    #[tokio::test]
    async fn test_add_is_idempotent() {
        let db = db().await;
        published(&db, "item-1", 10_000).await;

        let first = db.carts().add("user-1", "item-1").await.unwrap();
        assert!(!first.already_in_cart());

        let second = db.carts().add("user-1", "item-1").await.unwrap();
        assert!(second.already_in_cart());
        assert_eq!(first.entry().id, second.entry().id);
        assert_eq!(db.carts().count("user-1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_add_rejects_unavailable_items() {
        let db = db().await;
        db.items()
            .insert(&item("draft", 10_000, ItemStatus::Draft))
            .await
            .unwrap();
        published(&db, "free", 0).await;
        let owned = published(&db, "owned", 10_000).await;

        let checkout = db.orders().create_single("user-1", &owned.id).await.unwrap();
        db.orders().mark_paid(checkout.order.id, "staff-1", None).await.unwrap();

        for id in ["draft", "free", "owned"] {
            let result = db.carts().add("user-1", id).await;
            assert!(
                matches!(result, Err(DbError::Rule(CoreError::ItemUnavailable { .. }))),
                "{id} should be unavailable"
            );
        }

        assert!(matches!(
            db.carts().add("user-1", "missing").await,
            Err(DbError::Rule(CoreError::ItemNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_remove_only_own_entries() {
        let db = db().await;
        published(&db, "item-1", 10_000).await;
        let added = db.carts().add("user-1", "item-1").await.unwrap();
        let entry_id = added.entry().id;

        let foreign = db.carts().remove("user-2", entry_id).await;
        assert!(matches!(foreign, Err(DbError::Rule(CoreError::CartEntryNotFound(_)))));

        db.carts().remove("user-1", entry_id).await.unwrap();
        assert_eq!(db.carts().count("user-1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_clear_always_succeeds() {
        let db = db().await;
        assert_eq!(db.carts().clear("nobody").await.unwrap(), 0);

        published(&db, "item-1", 10_000).await;
        db.carts().add("user-1", "item-1").await.unwrap();
        assert_eq!(db.carts().clear("user-1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_prices_and_discount() {
        let db = db().await;
        db.tiers()
            .replace_all(&[
                folio_core::cart::BundleDiscountTier::new(2, 500),
                folio_core::cart::BundleDiscountTier::new(3, 1000),
            ])
            .await
            .unwrap();

        for (id, price) in [("a", 10_000), ("b", 15_000), ("c", 25_000)] {
            published(&db, id, price).await;
            db.carts().add("user-1", id).await.unwrap();
        }

        let snapshot = db.carts().snapshot("user-1").await.unwrap();
        assert_eq!(snapshot.lines.len(), 3);
        assert_eq!(snapshot.summary.subtotal_cents, 50_000);
        assert_eq!(snapshot.summary.discount_cents, 5_000);
        assert_eq!(snapshot.summary.total_cents, 45_000);
        assert_eq!(
            snapshot.lines.iter().map(|l| l.item_id.as_str()).collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );
    }

    #[tokio::test]
    async fn test_snapshot_rereads_prices_and_skips_unpublished() {
        let db = db().await;
        published(&db, "a", 10_000).await;
        published(&db, "b", 15_000).await;
        db.carts().add("user-1", "a").await.unwrap();
        db.carts().add("user-1", "b").await.unwrap();

        sqlx::query("UPDATE items SET price_cents = 12000 WHERE id = 'a'")
            .execute(db.pool())
            .await
            .unwrap();
        db.items()
            .transition_status("b", ItemStatus::Deactivated)
            .await
            .unwrap();

        let snapshot = db.carts().snapshot("user-1").await.unwrap();
        assert_eq!(snapshot.lines.len(), 1);
        assert_eq!(snapshot.lines[0].price_cents, 12_000);
        assert_eq!(snapshot.unavailable_item_ids, vec!["b".to_string()]);

        // Single line: no bundle discount
        assert_eq!(snapshot.summary.discount_cents, 0);
        assert_eq!(db.carts().count("user-1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_writes_wait_out_a_held_lock() {
        let dir = tempfile::tempdir().unwrap();
        let config = DbConfig::new(dir.path().join("folio.db"))
            .max_connections(2)
            .busy_timeout(Duration::from_millis(10));

        let impatient = Database::new(config.clone().retry(RetryPolicy::none())).await.unwrap();
        let patient = Database::new(
            config.run_migrations(false).retry(
                RetryPolicy::default()
                    .max_attempts(10)
                    .backoff(Duration::from_millis(50), Duration::from_millis(200)),
            ),
        )
        .await
        .unwrap();

        published(&impatient, "item-1", 10_000).await;
        impatient.carts().add("user-1", "item-1").await.unwrap();

        let mut holder = impatient.pool().acquire().await.unwrap();
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *holder).await.unwrap();

        let busy = impatient.carts().clear("user-1").await;
        assert!(matches!(busy, Err(DbError::Busy(_))), "{busy:?}");

        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            sqlx::query("COMMIT").execute(&mut *holder).await.unwrap();
        });

        assert_eq!(patient.carts().clear("user-1").await.unwrap(), 1);
        release.await.unwrap();
    }
}
