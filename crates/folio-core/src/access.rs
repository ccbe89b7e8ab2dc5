//! # Catalog Access Guard
//!
//! Decides whether a requester may see the price-sensitive fields of an
//! item, and produces the redacted view sent to clients.
//!
//! ## Decision Table
//! ```text
//! ┌──────────────────────────────┬─────────┬──────────────────┐
//! │ Condition (first match wins) │ Granted │ Reason           │
//! ├──────────────────────────────┼─────────┼──────────────────┤
//! │ no requester                 │   no    │ anonymous        │
//! │ requester is the creator     │   yes   │ creator          │
//! │ requester holds a paid order │   yes   │ purchased        │
//! │ item not published           │   no    │ unavailable      │
//! │ item is free                 │   yes   │ free_item        │
//! │ requester has pending order  │   no    │ payment_pending  │
//! │ otherwise                    │   no    │ not_purchased    │
//! └──────────────────────────────┴─────────┴──────────────────┘
//! ```
//!
//! Buyers keep access after an item is deactivated. Anonymous callers see
//! free items as locked.

use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::types::{Item, ItemStatus, Order, OrderStatus};

/// Why access was granted or denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum AccessReason {
    Purchased,
    Creator,
    FreeItem,
    Anonymous,
    NotPurchased,
    PaymentPending,
    Unavailable,
}

impl fmt::Display for AccessReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccessReason::Purchased => "purchased",
            AccessReason::Creator => "creator",
            AccessReason::FreeItem => "free_item",
            AccessReason::Anonymous => "anonymous",
            AccessReason::NotPurchased => "not_purchased",
            AccessReason::PaymentPending => "payment_pending",
            AccessReason::Unavailable => "unavailable",
        };
        f.write_str(s)
    }
}

/// Outcome of an access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AccessDecision {
    pub granted: bool,
    pub reason: AccessReason,
}

impl AccessDecision {
    const fn grant(reason: AccessReason) -> Self {
        AccessDecision {
            granted: true,
            reason,
        }
    }

    const fn deny(reason: AccessReason) -> Self {
        AccessDecision {
            granted: false,
            reason,
        }
    }
}

/// Decides access for `requester` (a user id, or `None` when anonymous).
///
/// `purchase` is the requester's most relevant order for this item, if any.
/// Orders for other users or other items are ignored.
pub fn decide(item: &Item, requester: Option<&str>, purchase: Option<&Order>) -> AccessDecision {
    let Some(user_id) = requester else {
        return AccessDecision::deny(AccessReason::Anonymous);
    };

    if item.creator_id == user_id {
        return AccessDecision::grant(AccessReason::Creator);
    }

    let purchase = purchase.filter(|order| order.belongs_to(user_id) && order.item_id == item.id);

    if purchase.map(|o| o.status) == Some(OrderStatus::Paid) {
        return AccessDecision::grant(AccessReason::Purchased);
    }

    if item.status != ItemStatus::Published {
        return AccessDecision::deny(AccessReason::Unavailable);
    }

    if item.is_free() {
        return AccessDecision::grant(AccessReason::FreeItem);
    }

    if purchase.map(|o| o.status) == Some(OrderStatus::Pending) {
        return AccessDecision::deny(AccessReason::PaymentPending);
    }

    AccessDecision::deny(AccessReason::NotPurchased)
}

/// Client-facing item view with storage details removed unless granted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ItemView {
    pub id: String,
    pub title: String,
    pub creator_id: String,
    pub price_cents: i64,
    pub status: ItemStatus,
    pub purchase_count: i64,
    pub is_free: bool,
    pub owned: bool,
    pub access_reason: AccessReason,
    pub storage_path: Option<String>,
    pub bonus_url: Option<String>,
}

/// Builds the redacted view of `item` for `requester`.
pub fn view(item: &Item, requester: Option<&str>, purchase: Option<&Order>) -> ItemView {
    let decision = decide(item, requester, purchase);

    ItemView {
        id: item.id.clone(),
        title: item.title.clone(),
        creator_id: item.creator_id.clone(),
        price_cents: item.price_cents,
        status: item.status,
        purchase_count: item.purchase_count,
        is_free: item.is_free(),
        owned: decision.granted,
        access_reason: decision.reason,
        storage_path: decision.granted.then(|| item.storage_path.clone()),
        bonus_url: if decision.granted { item.bonus_url.clone() } else { None },
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn item(price_cents: i64, status: ItemStatus) -> Item {
        Item {
            id: "item-1".to_string(),
            title: "Field Notes".to_string(),
            creator_id: "seller-1".to_string(),
            price_cents,
            status,
            storage_path: "items/item-1.pdf".to_string(),
            bonus_url: Some("https://example.test/bonus".to_string()),
            purchase_count: 3,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn order(user_id: &str, status: OrderStatus) -> Order {
        Order {
            id: 1,
            bundle_id: None,
            user_id: user_id.to_string(),
            item_id: "item-1".to_string(),
            status,
            original_price_cents: 9_900,
            discount_cents: 0,
            final_amount_cents: 9_900,
            payment_payload: None,
            payment_reference: None,
            reviewed_by: None,
            failure_reason: None,
            created_at: Utc::now(),
            paid_at: None,
            download_count: 0,
            last_download_at: None,
        }
    }

    #[test]
    fn test_paid_buyer_sees_everything() {
        let paid = order("buyer", OrderStatus::Paid);
        let v = view(&item(9_900, ItemStatus::Published), Some("buyer"), Some(&paid));

        assert!(v.owned);
        assert_eq!(v.access_reason, AccessReason::Purchased);
        assert_eq!(v.storage_path.as_deref(), Some("items/item-1.pdf"));
        assert!(v.bonus_url.is_some());
    }

    #[test]
    fn test_stranger_is_redacted() {
        let v = view(&item(9_900, ItemStatus::Published), Some("stranger"), None);
        assert!(!v.owned);
        assert_eq!(v.access_reason, AccessReason::NotPurchased);
        assert_eq!(v.storage_path, None);
        assert_eq!(v.bonus_url, None);
    }

    #[test]
    fn test_someone_elses_order_is_ignored() {
        let paid = order("other", OrderStatus::Paid);
        let d = decide(&item(9_900, ItemStatus::Published), Some("buyer"), Some(&paid));
        assert_eq!(d.reason, AccessReason::NotPurchased);
    }

    #[test]
    fn test_free_item_locked_for_anonymous() {
        let free = item(0, ItemStatus::Published);
        assert_eq!(decide(&free, None, None).reason, AccessReason::Anonymous);

        let d = decide(&free, Some("buyer"), None);
        assert!(d.granted);
        assert_eq!(d.reason, AccessReason::FreeItem);
    }

    #[test]
    fn test_creator_and_pending() {
        let it = item(9_900, ItemStatus::PendingReview);
        assert_eq!(decide(&it, Some("seller-1"), None).reason, AccessReason::Creator);
        assert_eq!(decide(&it, Some("buyer"), None).reason, AccessReason::Unavailable);

        let pending = order("buyer", OrderStatus::Pending);
        let d = decide(&item(9_900, ItemStatus::Published), Some("buyer"), Some(&pending));
        assert!(!d.granted);
        assert_eq!(d.reason, AccessReason::PaymentPending);
    }

    #[test]
    fn test_buyer_keeps_access_after_deactivation() {
        let paid = order("buyer", OrderStatus::Paid);
        let d = decide(&item(9_900, ItemStatus::Deactivated), Some("buyer"), Some(&paid));
        assert!(d.granted);

        let refunded = order("buyer", OrderStatus::Refunded);
        let d = decide(&item(9_900, ItemStatus::Published), Some("buyer"), Some(&refunded));
        assert!(!d.granted);
    }
}
