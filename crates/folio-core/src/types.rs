//! # Domain Types
//!
//! Core domain types of the purchase lifecycle.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │      Item       │   │      Order      │   │ DownloadLogEntry│       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │   │  id (i64)       │   │  order_id?      │       │
//! │  │  price_cents    │◄──│  item_id        │◄──│  item_id        │       │
//! │  │  status         │   │  bundle_id?     │   │  outcome        │       │
//! │  │  storage_path   │   │  status         │   │  ip, user_agent │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │          ▲                                                              │
//! │          │             ┌─────────────────┐   ┌─────────────────┐       │
//! │          └─────────────│    CartEntry    │   │     Caller      │       │
//! │                        │  user_id        │   │  user_id, roles │       │
//! │                        │  item_id        │   │  name, email    │       │
//! │                        └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Order State Machine
//! ```text
//!              ┌──────────┐   approve    ┌──────────┐   refund   ┌──────────┐
//!  checkout ──►│ pending  │─────────────►│   paid   │───────────►│ refunded │
//!              └────┬─────┘              └──────────┘            └──────────┘
//!                   │ reject / superseded
//!                   ▼
//!              ┌──────────┐
//!              │  failed  │  (a new pending order may follow)
//!              └──────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::money::Money;

// =============================================================================
// Item Status
// =============================================================================

/// Catalog state of an item.
///
/// Replaces the "active flag + approval status" pair with one tagged state.
///
/// ## Transitions
/// ```text
/// draft ──► pending_review ──┬──► published ◄──► deactivated
///                ▲           │
///                └─ rejected ◄┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Created by the seller, not yet submitted.
    Draft,
    /// Waiting for staff review.
    PendingReview,
    /// Visible and purchasable.
    Published,
    /// Review failed; the seller may resubmit.
    Rejected,
    /// Withdrawn from sale. Existing buyers keep their downloads.
    Deactivated,
}

impl ItemStatus {
    /// Returns true if the catalog allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: ItemStatus) -> bool {
        use ItemStatus::*;
        matches!(
            (self, next),
            (Draft, PendingReview)
                | (PendingReview, Published)
                | (PendingReview, Rejected)
                | (Rejected, PendingReview)
                | (Published, Deactivated)
                | (Deactivated, Published)
        )
    }

    /// Only published items can be bought or downloaded.
    #[inline]
    pub fn is_purchasable(self) -> bool {
        self == ItemStatus::Published
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ItemStatus::Draft => "draft",
            ItemStatus::PendingReview => "pending_review",
            ItemStatus::Published => "published",
            ItemStatus::Rejected => "rejected",
            ItemStatus::Deactivated => "deactivated",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(ItemStatus::Draft),
            "pending_review" => Ok(ItemStatus::PendingReview),
            "published" => Ok(ItemStatus::Published),
            "rejected" => Ok(ItemStatus::Rejected),
            "deactivated" => Ok(ItemStatus::Deactivated),
            other => Err(format!("Invalid item status: {other}")),
        }
    }
}

// =============================================================================
// Item
// =============================================================================

/// A digital item (PDF) in the catalog.
///
/// Read-only to the purchase lifecycle apart from `purchase_count`, which
/// only the paid transition increments.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Item {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Display title.
    pub title: String,

    /// Seller who uploaded the item.
    pub creator_id: String,

    /// Price in minor units. Zero marks a free item.
    pub price_cents: i64,

    /// Catalog state.
    pub status: ItemStatus,

    /// Blob store path of the source PDF. Never sent to clients unredacted.
    pub storage_path: String,

    /// Optional link to bonus material for buyers.
    pub bonus_url: Option<String>,

    /// Number of paid orders for this item.
    pub purchase_count: i64,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Item {
    /// Returns the price as a Money type.
    #[inline]
    pub fn price(&self) -> Money {
        Money::from_cents(self.price_cents)
    }

    /// Free items are published items with a zero price.
    #[inline]
    pub fn is_free(&self) -> bool {
        self.price_cents == 0 && self.status.is_purchasable()
    }
}

// =============================================================================
// Order Status
// =============================================================================

/// The status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Waiting for the buyer's transfer and staff approval.
    Pending,
    /// Approved by staff. Unlocks downloads.
    Paid,
    /// Rejected or superseded.
    Failed,
    /// Paid, then refunded.
    Refunded,
}

impl OrderStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [OrderStatus; 4] = [
        OrderStatus::Pending,
        OrderStatus::Paid,
        OrderStatus::Failed,
        OrderStatus::Refunded,
    ];

    /// Returns true if the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!((self, next), (Pending, Paid) | (Pending, Failed) | (Paid, Refunded))
    }

    /// Live orders block a second order for the same (user, item).
    #[inline]
    pub fn is_live(self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Paid)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Failed => "failed",
            OrderStatus::Refunded => "refunded",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "paid" => Ok(OrderStatus::Paid),
            "failed" => Ok(OrderStatus::Failed),
            "refunded" => Ok(OrderStatus::Refunded),
            other => Err(format!("Invalid order status: {other}")),
        }
    }
}

// =============================================================================
// Order
// =============================================================================

/// A purchase of one item by one user.
///
/// Orders created by one checkout share a `bundle_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Order {
    /// Ledger identifier, immutable once created.
    pub id: i64,

    /// Links the orders of one checkout.
    pub bundle_id: Option<String>,

    pub user_id: String,
    pub item_id: String,
    pub status: OrderStatus,

    /// Item price at order time.
    pub original_price_cents: i64,

    /// This order's share of the bundle discount.
    pub discount_cents: i64,

    /// `original_price_cents - discount_cents`, never negative.
    pub final_amount_cents: i64,

    /// PromptPay payload, set once a payment is requested.
    pub payment_payload: Option<String>,

    /// Staff-entered transfer reference.
    pub payment_reference: Option<String>,

    /// Staff member who approved, rejected or refunded the order.
    pub reviewed_by: Option<String>,

    /// Why the order failed.
    pub failure_reason: Option<String>,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "Option<String>")]
    pub paid_at: Option<DateTime<Utc>>,

    pub download_count: i64,

    #[ts(as = "Option<String>")]
    pub last_download_at: Option<DateTime<Utc>>,
}

impl Order {
    #[inline]
    pub fn original_price(&self) -> Money {
        Money::from_cents(self.original_price_cents)
    }

    #[inline]
    pub fn discount(&self) -> Money {
        Money::from_cents(self.discount_cents)
    }

    #[inline]
    pub fn final_amount(&self) -> Money {
        Money::from_cents(self.final_amount_cents)
    }

    /// Returns true if this order was placed by `user_id`.
    #[inline]
    pub fn belongs_to(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }
}

// =============================================================================
// Cart Entry
// =============================================================================

/// One pending selection in a user's cart.
///
/// Unique per (user, item). The price is not stored; snapshots re-read it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct CartEntry {
    pub id: i64,
    pub user_id: String,
    pub item_id: String,

    #[ts(as = "String")]
    pub added_at: DateTime<Utc>,
}

// =============================================================================
// Download Log
// =============================================================================

/// Result of one download attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum DownloadOutcome {
    /// The personalized file was produced and handed to the caller.
    Completed,
    /// Watermarking or staging failed; nothing was delivered.
    Failed,
}

impl fmt::Display for DownloadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadOutcome::Completed => f.write_str("completed"),
            DownloadOutcome::Failed => f.write_str("failed"),
        }
    }
}

/// Append-only record of a download attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct DownloadLogEntry {
    pub id: i64,

    /// Null for free items.
    pub order_id: Option<i64>,

    pub user_id: String,
    pub item_id: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub outcome: DownloadOutcome,

    /// Failure detail for operators.
    pub detail: Option<String>,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// A log entry before it is appended.
#[derive(Debug, Clone, PartialEq)]
pub struct NewDownloadLogEntry {
    pub order_id: Option<i64>,
    pub user_id: String,
    pub item_id: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub outcome: DownloadOutcome,
    pub detail: Option<String>,
}

// =============================================================================
// Caller Identity
// =============================================================================

/// Verified identity attached to each request by the authentication layer.
///
/// Trusted as-is; never re-derived here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Caller {
    pub user_id: String,
    pub display_name: String,
    pub email: String,
    pub is_admin: bool,
    pub is_staff: bool,
    pub is_seller: bool,
}

impl Caller {
    /// A plain buyer with no elevated roles.
    pub fn buyer(user_id: impl Into<String>, display_name: impl Into<String>, email: impl Into<String>) -> Self {
        Caller {
            user_id: user_id.into(),
            display_name: display_name.into(),
            email: email.into(),
            is_admin: false,
            is_staff: false,
            is_seller: false,
        }
    }

    /// Staff and admins may review payments.
    #[inline]
    pub fn can_review_payments(&self) -> bool {
        self.is_admin || self.is_staff
    }
}

/// Request metadata recorded in the download log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

// =============================================================================
// Listings
// =============================================================================

/// Criteria for purchase listings. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderFilter {
    pub user_id: Option<String>,
    pub item_id: Option<String>,
    pub bundle_id: Option<String>,
    /// Match any of these statuses. Empty means all.
    #[serde(default)]
    pub statuses: Vec<OrderStatus>,
    #[ts(as = "Option<String>")]
    pub since: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub until: Option<DateTime<Utc>>,
}

impl OrderFilter {
    /// Only orders waiting for staff review.
    pub fn pending() -> Self {
        OrderFilter {
            statuses: vec![OrderStatus::Pending],
            ..OrderFilter::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.user_id.is_none()
            && self.item_id.is_none()
            && self.bundle_id.is_none()
            && self.statuses.is_empty()
            && self.since.is_none()
            && self.until.is_none()
    }
}

/// One page of a listing. `page` starts at 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> u32 {
        if self.per_page == 0 {
            return 0;
        }
        ((self.total.max(0) as u64).div_ceil(self.per_page as u64)) as u32
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_transitions() {
        use OrderStatus::*;
        assert!(Pending.can_transition_to(Paid));
        assert!(Pending.can_transition_to(Failed));
        assert!(Paid.can_transition_to(Refunded));

        assert!(!Paid.can_transition_to(Paid));
        assert!(!Paid.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Paid));
        assert!(!Refunded.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Refunded));
    }

    #[test]
    fn test_live_statuses() {
        assert!(OrderStatus::Pending.is_live());
        assert!(OrderStatus::Paid.is_live());
        assert!(!OrderStatus::Failed.is_live());
        assert!(!OrderStatus::Refunded.is_live());
    }

    #[test]
    fn test_item_transitions() {
        use ItemStatus::*;
        assert!(Draft.can_transition_to(PendingReview));
        assert!(PendingReview.can_transition_to(Published));
        assert!(Published.can_transition_to(Deactivated));
        assert!(Deactivated.can_transition_to(Published));
        assert!(!Draft.can_transition_to(Published));
        assert!(!Rejected.can_transition_to(Published));
    }

    #[test]
    fn test_status_round_trip_strings() {
        for status in OrderStatus::ALL {
            assert_eq!(status.as_str().parse::<OrderStatus>(), Ok(status));
        }
        assert_eq!("pending_review".parse::<ItemStatus>(), Ok(ItemStatus::PendingReview));
        assert!("archived".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_page_count() {
        let page: Page<i64> = Page {
            items: vec![],
            total: 41,
            page: 1,
            per_page: 20,
        };
        assert_eq!(page.total_pages(), 3);
        assert!(OrderFilter::default().is_empty());
        assert!(!OrderFilter::pending().is_empty());
    }

    #[test]
    fn test_status_serde_names() {
        let json = serde_json::to_string(&ItemStatus::PendingReview).unwrap();
        assert_eq!(json, "\"pending_review\"");
        let json = serde_json::to_string(&OrderStatus::Refunded).unwrap();
        assert_eq!(json, "\"refunded\"");
    }
}
