//! # Order Repository (the Order Ledger)
//!
//! Every status change of an order happens here, inside one transaction
//! with its side effects.
//!
//! ## Order Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Order Lifecycle                                   │
//! │                                                                         │
//! │  1. CHECKOUT                                                           │
//! │     ├── create_single()  → pending (or the existing pending order)     │
//! │     └── create_bundle()  → N pending orders, one bundle_id,            │
//! │                            cart entries removed, all in one tx         │
//! │                                                                         │
//! │  2. PAYMENT REQUEST                                                    │
//! │     └── request_payment() → payment_payload on still-pending orders    │
//! │                                                                         │
//! │  3. REVIEW (staff)                                                     │
//! │     ├── mark_paid()        → paid + paid_at + purchase_count+1 (1 tx)  │
//! │     ├── mark_bundle_paid() → every pending order of a bundle (1 tx)    │
//! │     └── mark_failed()      → failed + reason                           │
//! │                                                                         │
//! │  4. AFTER SALE                                                         │
//! │     ├── record_download()  → download_count+1 + log entry (1 tx)       │
//! │     └── mark_refunded()    → refunded                                  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Serializing Writers
//! Each transaction opens with a write statement (a compare-and-swap on
//! `status`, or the supersede step of checkout). SQLite grants one write
//! lock at a time, so two approvals of the same order run one after the
//! other and the second one sees `paid`.

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::repository::cart::{fetch_cart_rows, CartRow};
use crate::repository::download_log::append_in;
use crate::repository::item::{bump_purchase_count, fetch_item};
use crate::repository::tier::load_tiers;
use crate::retry::RetryPolicy;
use folio_core::cart::{prorate_discount, summarize, CartSummary};
use folio_core::validation::{validate_id, validate_page, validate_reason, validate_reference};
use folio_core::{
    CoreError, DownloadLogEntry, Money, NewDownloadLogEntry, Order, OrderFilter, OrderStatus, Page, ValidationError,
};

/// Failure reason stamped on pending orders replaced by a bundle checkout.
///
/// Their payment payload is cleared in the same step. A buyer who already
/// transferred against the old QR has paid for an order staff can no
/// longer approve; staff match that transfer to the bundle instead.
pub const SUPERSEDED_BY_BUNDLE: &str = "superseded by bundle checkout";

/// Result of a single-item checkout.
#[derive(Debug, Clone, PartialEq)]
pub struct SingleCheckout {
    pub order: Order,

    /// False when an existing pending order was returned unchanged.
    pub created: bool,
}

/// Result of a cart checkout.
#[derive(Debug, Clone, PartialEq)]
pub struct BundleCheckout {
    pub bundle_id: String,
    pub orders: Vec<Order>,
    pub summary: CartSummary,

    /// Cart items left behind because they are no longer purchasable.
    pub skipped_item_ids: Vec<String>,
}

/// The pending orders a payment request covers and the payload stored on them.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentAttachment {
    /// Still-pending orders, by ID, as stored after the request.
    pub orders: Vec<Order>,
    pub payload: String,

    /// True when every order already carried this payload.
    pub reused: bool,
}

impl PaymentAttachment {
    pub fn order_ids(&self) -> Vec<i64> {
        self.orders.iter().map(|order| order.id).collect()
    }

    pub fn amount(&self) -> Money {
        Money::from_cents(self.orders.iter().map(|order| order.final_amount_cents).sum())
    }
}

/// Partial update of an order. Only present fields are written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderUpdate {
    pub payment_payload: Option<String>,
    pub payment_reference: Option<String>,
}

impl OrderUpdate {
    pub fn is_empty(&self) -> bool {
        self.payment_payload.is_none() && self.payment_reference.is_none()
    }
}

/// Repository for the order ledger.
#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
    retry: RetryPolicy,
}

impl OrderRepository {
    /// Creates a new OrderRepository.
    pub fn new(pool: SqlitePool, retry: RetryPolicy) -> Self {
        OrderRepository { pool, retry }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Gets an order by ID.
    pub async fn get_by_id(&self, order_id: i64) -> DbResult<Option<Order>> {
        self.retry
            .run("get_order", || async move {
                let mut conn = self.pool.acquire().await?;
                fetch_order(&mut conn, order_id).await
            })
            .await
    }

    /// Gets an order, failing with `OrderNotFound` when absent.
    pub async fn get(&self, order_id: i64) -> DbResult<Order> {
        self.get_by_id(order_id)
            .await?
            .ok_or_else(|| CoreError::OrderNotFound(order_id).into())
    }

    /// Gets an order owned by `user_id`.
    ///
    /// Another user's order is reported as not found.
    pub async fn get_owned(&self, order_id: i64, user_id: &str) -> DbResult<Order> {
        match self.get_by_id(order_id).await? {
            Some(order) if order.belongs_to(user_id) => Ok(order),
            _ => Err(CoreError::OrderNotFound(order_id).into()),
        }
    }

    /// The user's most relevant order for an item: paid, else pending,
    /// else the newest.
    pub async fn find_for(&self, user_id: &str, item_id: &str) -> DbResult<Option<Order>> {
        self.retry
            .run("find_order", || async move {
                let order = sqlx::query_as::<_, Order>(
                    r#"
                    SELECT * FROM orders
                    WHERE user_id = ?1 AND item_id = ?2
                    ORDER BY CASE status WHEN 'paid' THEN 0 WHEN 'pending' THEN 1 ELSE 2 END, id DESC
                    LIMIT 1
                    "#,
                )
                .bind(user_id)
                .bind(item_id)
                .fetch_optional(&self.pool)
                .await?;
                Ok(order)
            })
            .await
    }

    /// Lists the orders of one checkout, by ID.
    pub async fn list_by_bundle(&self, bundle_id: &str) -> DbResult<Vec<Order>> {
        self.retry
            .run("list_bundle", || async move {
                let mut conn = self.pool.acquire().await?;
                fetch_bundle(&mut conn, bundle_id).await
            })
            .await
    }

    /// Filtered, paginated listing, newest first.
    pub async fn search(&self, filter: &OrderFilter, page: u32, per_page: u32) -> DbResult<Page<Order>> {
        validate_page(page, per_page).map_err(CoreError::from)?;

        self.retry
            .run("search_orders", || async move {
                let mut conn = self.pool.acquire().await?;

                let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM orders");
                push_filter(&mut count, filter);
                let total: i64 = count.build_query_scalar().fetch_one(&mut *conn).await?;

                let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM orders");
                push_filter(&mut query, filter);
                query.push(" ORDER BY created_at DESC, id DESC LIMIT ");
                query.push_bind(per_page as i64);
                query.push(" OFFSET ");
                query.push_bind((page as i64 - 1) * per_page as i64);

                let items = query.build_query_as::<Order>().fetch_all(&mut *conn).await?;

                Ok(Page {
                    items,
                    total,
                    page,
                    per_page,
                })
            })
            .await
    }

    // =========================================================================
    // Checkout
    // =========================================================================

    /// Creates a pending order for one item.
    ///
    /// ## Behavior
    /// - Paid order exists → `AlreadyOwned`
    /// - Pending order exists → returned unchanged (`created == false`)
    /// - Failed/refunded orders → removed, then a fresh pending order is
    ///   created at the current price
    pub async fn create_single(&self, user_id: &str, item_id: &str) -> DbResult<SingleCheckout> {
        validate_id("user_id", user_id).map_err(CoreError::from)?;
        validate_id("item_id", item_id).map_err(CoreError::from)?;

        self.retry
            .run("create_single", || async move { self.create_single_once(user_id, item_id).await })
            .await
    }

    async fn create_single_once(&self, user_id: &str, item_id: &str) -> DbResult<SingleCheckout> {
        let mut tx = self.pool.begin().await?;

        // Write first: takes the write lock and drops superseded attempts
        let superseded = sqlx::query(
            "DELETE FROM orders WHERE user_id = ?1 AND item_id = ?2 AND status IN ('failed', 'refunded')",
        )
        .bind(user_id)
        .bind(item_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if let Some(live) = fetch_live(&mut tx, user_id, item_id).await? {
            return match live.status {
                OrderStatus::Paid => Err(CoreError::AlreadyOwned {
                    item_id: item_id.to_string(),
                }
                .into()),
                _ => {
                    tx.rollback().await?;
                    debug!(order_id = live.id, user_id = %user_id, "Returning existing pending order");
                    Ok(SingleCheckout {
                        order: live,
                        created: false,
                    })
                }
            };
        }

        let item = fetch_item(&mut tx, item_id)
            .await?
            .ok_or_else(|| CoreError::ItemNotFound(item_id.to_string()))?;

        if !item.status.is_purchasable() {
            return Err(CoreError::ItemUnavailable {
                item_id: item_id.to_string(),
                reason: "item is not published".to_string(),
            }
            .into());
        }
        if item.price_cents <= 0 {
            return Err(CoreError::ItemUnavailable {
                item_id: item_id.to_string(),
                reason: "free items need no purchase".to_string(),
            }
            .into());
        }

        let order = insert_order(
            &mut tx,
            None,
            user_id,
            item_id,
            item.price(),
            Money::zero(),
            Utc::now(),
        )
        .await?;

        tx.commit().await?;

        info!(
            order_id = order.id,
            user_id = %user_id,
            item_id = %item_id,
            amount = %order.final_amount(),
            superseded,
            "Order created"
        );

        Ok(SingleCheckout { order, created: true })
    }

    /// Converts the user's cart into one pending order per purchasable
    /// item, all sharing `bundle_id`.
    ///
    /// ## One Transaction
    /// 1. Pending orders for the cart's items are marked failed (superseded)
    /// 2. The cart is read, owned and unpublished items are filtered out
    /// 3. The bundle discount is computed and pro-rated across the lines
    /// 4. One order per line is inserted
    /// 5. Converted and already-owned entries are removed from the cart
    ///
    /// Any failure rolls back every step. Not retried: a caller that sees a
    /// transient error re-reads the cart before trying again.
    pub async fn create_bundle(&self, user_id: &str, bundle_id: &str) -> DbResult<BundleCheckout> {
        validate_id("user_id", user_id).map_err(CoreError::from)?;
        validate_id("bundle_id", bundle_id).map_err(CoreError::from)?;

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let superseded = sqlx::query(
            r#"
            UPDATE orders
            SET status = 'failed', failure_reason = ?1, payment_payload = NULL
            WHERE user_id = ?2 AND status = 'pending' AND item_id IN (
                SELECT c.item_id
                FROM cart_entries c
                JOIN items i ON i.id = c.item_id
                WHERE c.user_id = ?2 AND i.status = 'published' AND i.price_cents > 0
            )
            "#,
        )
        .bind(SUPERSEDED_BY_BUNDLE)
        .bind(user_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let rows = fetch_cart_rows(&mut tx, user_id).await?;
        let (lines, rest): (Vec<CartRow>, Vec<CartRow>) = rows.into_iter().partition(CartRow::is_purchasable);

        if lines.is_empty() {
            // Dropping the transaction rolls back the supersede step
            return Err(CoreError::EmptyCart.into());
        }

        let tiers = load_tiers(&mut tx).await?;
        let prices: Vec<Money> = lines.iter().map(|row| Money::from_cents(row.price_cents)).collect();
        let summary = summarize(&prices, &tiers);
        let shares = prorate_discount(&prices, summary.discount());

        let mut orders = Vec::with_capacity(lines.len());
        for ((row, price), share) in lines.iter().zip(&prices).zip(&shares) {
            let order = insert_order(&mut tx, Some(bundle_id), user_id, &row.item_id, *price, *share, now).await?;
            orders.push(order);
            delete_cart_entry(&mut tx, row.entry_id).await?;
        }

        for row in rest.iter().filter(|row| row.owned) {
            delete_cart_entry(&mut tx, row.entry_id).await?;
        }

        tx.commit().await?;

        info!(
            bundle_id = %bundle_id,
            user_id = %user_id,
            orders = orders.len(),
            total = %summary.total(),
            superseded,
            "Bundle created"
        );

        Ok(BundleCheckout {
            bundle_id: bundle_id.to_string(),
            orders,
            summary,
            skipped_item_ids: rest
                .into_iter()
                .filter(|row| !row.owned)
                .map(|row| row.item_id)
                .collect(),
        })
    }

    // =========================================================================
    // Payment Request
    // =========================================================================

    /// Stores the payment payload for whichever of `order_ids` are still pending.
    ///
    /// `payload_for` gets the pending orders and returns the payload that
    /// pays for exactly them. Reads and writes share one transaction, and
    /// the pending set is read again after every write: if a status changed
    /// in between (an approval, a rejection), the payload is recomputed for
    /// the orders that are left. A writer that commits between our read and
    /// our write makes SQLite refuse the upgrade as busy, and the whole
    /// request runs again under the retry policy.
    ///
    /// ## Errors
    /// - `AlreadyPaid` when nothing is pending and one of the orders is paid
    /// - `InvalidTransition` when nothing is pending or paid
    /// - `OrderNotFound` when none of the orders exist
    pub async fn request_payment<F>(&self, order_ids: &[i64], payload_for: F) -> DbResult<PaymentAttachment>
    where
        F: Fn(&[Order]) -> DbResult<String>,
    {
        let payload_for = &payload_for;

        let attachment = self
            .retry
            .run("request_payment", || async move {
                let mut tx = self.pool.begin().await?;
                let attachment = request_payment_in(&mut tx, order_ids, payload_for).await?;
                tx.commit().await?;
                Ok(attachment)
            })
            .await?;

        debug!(
            orders = ?attachment.order_ids(),
            reused = attachment.reused,
            "Payment payload attached"
        );
        Ok(attachment)
    }

    /// Replaces the staff-entered payment reference of an order.
    pub async fn amend_reference(&self, order_id: i64, reference: &str) -> DbResult<Order> {
        let reference = validate_reference(Some(reference))
            .map_err(CoreError::from)?
            .ok_or_else(|| {
                CoreError::from(ValidationError::Required {
                    field: "reference".to_string(),
                })
            })?;

        let update = OrderUpdate {
            payment_reference: Some(reference),
            ..OrderUpdate::default()
        };
        let update = &update;

        self.retry
            .run("amend_reference", || async move {
                let mut conn = self.pool.acquire().await?;
                if apply_update(&mut conn, &[order_id], update, None).await? == 0 {
                    return Err(CoreError::OrderNotFound(order_id).into());
                }
                fetch_order(&mut conn, order_id)
                    .await?
                    .ok_or_else(|| CoreError::OrderNotFound(order_id).into())
            })
            .await
    }

    // =========================================================================
    // Review
    // =========================================================================

    /// Approves a pending order.
    ///
    /// Status, `paid_at`, reviewer, reference and the item's purchase
    /// counter change in one transaction. Approving an order that is
    /// already paid fails with `AlreadyPaid` and changes nothing.
    pub async fn mark_paid(&self, order_id: i64, staff_id: &str, reference: Option<&str>) -> DbResult<Order> {
        validate_id("staff_id", staff_id).map_err(CoreError::from)?;
        let reference = validate_reference(reference).map_err(CoreError::from)?;
        let reference = reference.as_deref();

        let order = self
            .retry
            .run("mark_paid", || async move {
                let mut tx = self.pool.begin().await?;
                let order = mark_paid_in(&mut tx, order_id, staff_id, reference, Utc::now()).await?;
                tx.commit().await?;
                Ok(order)
            })
            .await?;

        info!(
            order_id,
            staff_id = %staff_id,
            item_id = %order.item_id,
            amount = %order.final_amount(),
            "Order marked paid"
        );

        Ok(order)
    }

    /// Approves every pending order of a bundle, all or nothing.
    ///
    /// Not retried; a caller that sees a transient error re-reads the bundle.
    pub async fn mark_bundle_paid(
        &self,
        bundle_id: &str,
        staff_id: &str,
        reference: Option<&str>,
    ) -> DbResult<Vec<Order>> {
        validate_id("bundle_id", bundle_id).map_err(CoreError::from)?;
        validate_id("staff_id", staff_id).map_err(CoreError::from)?;
        let reference = validate_reference(reference).map_err(CoreError::from)?;

        let mut tx = self.pool.begin().await?;

        let mut paid = sqlx::query_as::<_, Order>(
            r#"
            UPDATE orders
            SET status = 'paid',
                paid_at = ?1,
                reviewed_by = ?2,
                payment_reference = COALESCE(?3, payment_reference)
            WHERE bundle_id = ?4 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(Utc::now())
        .bind(staff_id)
        .bind(reference.as_deref())
        .bind(bundle_id)
        .fetch_all(&mut *tx)
        .await?;

        if paid.is_empty() {
            let orders = fetch_bundle(&mut tx, bundle_id).await?;
            let err = match (orders.iter().find(|o| o.status == OrderStatus::Paid), orders.first()) {
                (_, None) => CoreError::BundleNotFound(bundle_id.to_string()),
                (Some(already), _) => CoreError::AlreadyPaid { order_id: already.id },
                (None, Some(first)) => CoreError::InvalidTransition {
                    order_id: first.id,
                    from: first.status,
                    to: OrderStatus::Paid,
                },
            };
            return Err(err.into());
        }

        for order in &paid {
            bump_purchase_count(&mut tx, &order.item_id).await?;
        }

        tx.commit().await?;

        paid.sort_by_key(|order| order.id);
        info!(bundle_id = %bundle_id, staff_id = %staff_id, orders = paid.len(), "Bundle marked paid");

        Ok(paid)
    }

    /// Rejects a pending order. Idempotent when it is already failed.
    pub async fn mark_failed(&self, order_id: i64, staff_id: &str, reason: &str) -> DbResult<Order> {
        validate_id("staff_id", staff_id).map_err(CoreError::from)?;
        let reason = validate_reason(reason).map_err(CoreError::from)?;
        let reason = reason.as_str();

        let order = self
            .retry
            .run("mark_failed", || async move {
                let mut conn = self.pool.acquire().await?;
                let updated = sqlx::query_as::<_, Order>(
                    r#"
                    UPDATE orders SET status = 'failed', failure_reason = ?1, reviewed_by = ?2
                    WHERE id = ?3 AND status = 'pending'
                    RETURNING *
                    "#,
                )
                .bind(reason)
                .bind(staff_id)
                .bind(order_id)
                .fetch_optional(&mut *conn)
                .await?;

                match updated {
                    Some(order) => Ok(order),
                    None => match fetch_order(&mut conn, order_id).await? {
                        Some(order) if order.status == OrderStatus::Failed => Ok(order),
                        Some(order) => Err(CoreError::InvalidTransition {
                            order_id,
                            from: order.status,
                            to: OrderStatus::Failed,
                        }
                        .into()),
                        None => Err(CoreError::OrderNotFound(order_id).into()),
                    },
                }
            })
            .await?;

        info!(order_id, staff_id = %staff_id, reason = %reason, "Order marked failed");
        Ok(order)
    }

    /// Refunds a paid order.
    pub async fn mark_refunded(&self, order_id: i64, staff_id: &str) -> DbResult<Order> {
        validate_id("staff_id", staff_id).map_err(CoreError::from)?;

        let order = self
            .retry
            .run("mark_refunded", || async move {
                let mut conn = self.pool.acquire().await?;
                let updated = sqlx::query_as::<_, Order>(
                    "UPDATE orders SET status = 'refunded', reviewed_by = ?1 WHERE id = ?2 AND status = 'paid' RETURNING *",
                )
                .bind(staff_id)
                .bind(order_id)
                .fetch_optional(&mut *conn)
                .await?;

                match updated {
                    Some(order) => Ok(order),
                    None => Err(rejected_transition(&mut conn, order_id, OrderStatus::Refunded).await),
                }
            })
            .await?;

        info!(order_id, staff_id = %staff_id, "Order refunded");
        Ok(order)
    }

    // =========================================================================
    // Fulfillment
    // =========================================================================

    /// Counts a delivered download and appends its log entry, together.
    ///
    /// Fails with `PaymentIncomplete` unless the order is paid. Not retried,
    /// since a replay after a lost commit would count the download twice.
    pub async fn record_download(
        &self,
        order_id: i64,
        entry: &NewDownloadLogEntry,
    ) -> DbResult<(Order, DownloadLogEntry)> {
        let mut tx = self.pool.begin().await?;

        let order = sqlx::query_as::<_, Order>(
            r#"
            UPDATE orders
            SET download_count = download_count + 1, last_download_at = ?1
            WHERE id = ?2 AND status = 'paid'
            RETURNING *
            "#,
        )
        .bind(Utc::now())
        .bind(order_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(order) = order else {
            let err = match fetch_order(&mut tx, order_id).await? {
                Some(order) => CoreError::PaymentIncomplete {
                    order_id,
                    status: order.status,
                },
                None => CoreError::OrderNotFound(order_id),
            };
            return Err(err.into());
        };

        let logged = append_in(&mut tx, entry).await?;
        tx.commit().await?;

        debug!(order_id, downloads = order.download_count, "Download recorded");
        Ok((order, logged))
    }
}

// =============================================================================
// Connection-level helpers
// =============================================================================

async fn fetch_order(conn: &mut SqliteConnection, order_id: i64) -> DbResult<Option<Order>> {
    let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = ?1")
        .bind(order_id)
        .fetch_optional(conn)
        .await?;

    Ok(order)
}

async fn fetch_orders(conn: &mut SqliteConnection, order_ids: &[i64]) -> DbResult<Vec<Order>> {
    if order_ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM orders WHERE id IN (");
    let mut ids = query.separated(", ");
    for id in order_ids {
        ids.push_bind(*id);
    }
    query.push(") ORDER BY id");

    let orders = query.build_query_as::<Order>().fetch_all(conn).await?;
    Ok(orders)
}

async fn fetch_live(conn: &mut SqliteConnection, user_id: &str, item_id: &str) -> DbResult<Option<Order>> {
    let order = sqlx::query_as::<_, Order>(
        "SELECT * FROM orders WHERE user_id = ?1 AND item_id = ?2 AND status IN ('pending', 'paid')",
    )
    .bind(user_id)
    .bind(item_id)
    .fetch_optional(conn)
    .await?;

    Ok(order)
}

async fn fetch_bundle(conn: &mut SqliteConnection, bundle_id: &str) -> DbResult<Vec<Order>> {
    let orders = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE bundle_id = ?1 ORDER BY id")
        .bind(bundle_id)
        .fetch_all(conn)
        .await?;

    Ok(orders)
}

async fn insert_order(
    conn: &mut SqliteConnection,
    bundle_id: Option<&str>,
    user_id: &str,
    item_id: &str,
    original: Money,
    discount: Money,
    now: DateTime<Utc>,
) -> DbResult<Order> {
    let order = sqlx::query_as::<_, Order>(
        r#"
        INSERT INTO orders (
            bundle_id, user_id, item_id, status,
            original_price_cents, discount_cents, final_amount_cents,
            created_at, download_count
        ) VALUES (?1, ?2, ?3, 'pending', ?4, ?5, ?6, ?7, 0)
        RETURNING *
        "#,
    )
    .bind(bundle_id)
    .bind(user_id)
    .bind(item_id)
    .bind(original.cents())
    .bind(discount.cents())
    .bind((original - discount).cents())
    .bind(now)
    .fetch_one(conn)
    .await?;

    Ok(order)
}

async fn delete_cart_entry(conn: &mut SqliteConnection, entry_id: i64) -> DbResult<()> {
    sqlx::query("DELETE FROM cart_entries WHERE id = ?1")
        .bind(entry_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// The pending → paid transition plus its purchase counter side effect.
///
/// Must run inside a transaction. The compare-and-swap on `status` is the
/// first statement, so it also takes the write lock.
pub(crate) async fn mark_paid_in(
    conn: &mut SqliteConnection,
    order_id: i64,
    staff_id: &str,
    reference: Option<&str>,
    now: DateTime<Utc>,
) -> DbResult<Order> {
    let updated = sqlx::query_as::<_, Order>(
        r#"
        UPDATE orders
        SET status = 'paid',
            paid_at = ?1,
            reviewed_by = ?2,
            payment_reference = COALESCE(?3, payment_reference)
        WHERE id = ?4 AND status = 'pending'
        RETURNING *
        "#,
    )
    .bind(now)
    .bind(staff_id)
    .bind(reference)
    .bind(order_id)
    .fetch_optional(&mut *conn)
    .await?;

    match updated {
        Some(order) => {
            bump_purchase_count(conn, &order.item_id).await?;
            Ok(order)
        }
        None => Err(rejected_transition(conn, order_id, OrderStatus::Paid).await),
    }
}

/// Explains why a compare-and-swap to `to` matched no row.
async fn rejected_transition(conn: &mut SqliteConnection, order_id: i64, to: OrderStatus) -> DbError {
    match fetch_order(conn, order_id).await {
        Err(err) => err,
        Ok(None) => CoreError::OrderNotFound(order_id).into(),
        Ok(Some(order)) if order.status == OrderStatus::Paid && to == OrderStatus::Paid => {
            CoreError::AlreadyPaid { order_id }.into()
        }
        Ok(Some(order)) => CoreError::InvalidTransition {
            order_id,
            from: order.status,
            to,
        }
        .into(),
    }
}

/// Upper bound on recompute rounds within one payment request.
const PAYMENT_PASSES: usize = 4;

async fn request_payment_in<F>(
    conn: &mut SqliteConnection,
    order_ids: &[i64],
    payload_for: &F,
) -> DbResult<PaymentAttachment>
where
    F: Fn(&[Order]) -> DbResult<String>,
{
    let mut wrote = false;

    for _ in 0..PAYMENT_PASSES {
        let orders = fetch_orders(&mut *conn, order_ids).await?;
        let pending: Vec<Order> = orders
            .iter()
            .filter(|order| order.status == OrderStatus::Pending)
            .cloned()
            .collect();

        if pending.is_empty() {
            return Err(nothing_payable(order_ids, &orders).into());
        }

        let payload = payload_for(&pending)?;
        if pending.iter().all(|order| order.payment_payload.as_deref() == Some(payload.as_str())) {
            return Ok(PaymentAttachment {
                orders: pending,
                payload,
                reused: !wrote,
            });
        }

        let ids: Vec<i64> = pending.iter().map(|order| order.id).collect();
        let update = OrderUpdate {
            payment_payload: Some(payload),
            ..OrderUpdate::default()
        };
        apply_update(&mut *conn, &ids, &update, Some(OrderStatus::Pending)).await?;
        wrote = true;
    }

    Err(DbError::Busy("pending orders kept changing during the payment request".to_string()))
}

/// Why a payment request found nothing pending.
fn nothing_payable(order_ids: &[i64], orders: &[Order]) -> CoreError {
    if let Some(paid) = orders.iter().find(|order| order.status == OrderStatus::Paid) {
        return CoreError::AlreadyPaid { order_id: paid.id };
    }

    match orders.first() {
        Some(order) => CoreError::InvalidTransition {
            order_id: order.id,
            from: order.status,
            to: OrderStatus::Paid,
        },
        None => CoreError::OrderNotFound(order_ids.first().copied().unwrap_or_default()),
    }
}

/// Writes the present fields of `update` to the listed orders.
///
/// Values are always bound, never interpolated. With `require_status`,
/// only orders in that status are touched.
async fn apply_update(
    conn: &mut SqliteConnection,
    order_ids: &[i64],
    update: &OrderUpdate,
    require_status: Option<OrderStatus>,
) -> DbResult<u64> {
    if update.is_empty() || order_ids.is_empty() {
        return Ok(0);
    }

    let mut query = QueryBuilder::<Sqlite>::new("UPDATE orders SET ");
    let mut set_clause = query.separated(", ");
    if let Some(payload) = &update.payment_payload {
        set_clause.push("payment_payload = ");
        set_clause.push_bind_unseparated(payload.clone());
    }
    if let Some(reference) = &update.payment_reference {
        set_clause.push("payment_reference = ");
        set_clause.push_bind_unseparated(reference.clone());
    }

    query.push(" WHERE id IN (");
    let mut ids = query.separated(", ");
    for id in order_ids {
        ids.push_bind(*id);
    }
    query.push(")");

    if let Some(status) = require_status {
        query.push(" AND status = ");
        query.push_bind(status);
    }

    let result = query.build().execute(conn).await?;
    Ok(result.rows_affected())
}

fn push_filter(query: &mut QueryBuilder<'_, Sqlite>, filter: &OrderFilter) {
    if filter.is_empty() {
        return;
    }

    query.push(" WHERE ");
    let mut where_clause = query.separated(" AND ");
    if let Some(user_id) = &filter.user_id {
        where_clause.push("user_id = ");
        where_clause.push_bind_unseparated(user_id.clone());
    }
    if let Some(item_id) = &filter.item_id {
        where_clause.push("item_id = ");
        where_clause.push_bind_unseparated(item_id.clone());
    }
    if let Some(bundle_id) = &filter.bundle_id {
        where_clause.push("bundle_id = ");
        where_clause.push_bind_unseparated(bundle_id.clone());
    }
    if !filter.statuses.is_empty() {
        where_clause.push("status IN (");
        for (idx, status) in filter.statuses.iter().enumerate() {
            if idx > 0 {
                where_clause.push_unseparated(", ");
            }
            where_clause.push_bind_unseparated(*status);
        }
        where_clause.push_unseparated(")");
    }
    if let Some(since) = filter.since {
        where_clause.push("created_at >= ");
        where_clause.push_bind_unseparated(since);
    }
    if let Some(until) = filter.until {
        where_clause.push("created_at <= ");
        where_clause.push_bind_unseparated(until);
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
