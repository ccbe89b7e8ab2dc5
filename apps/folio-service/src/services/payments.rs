//! # Payment Requests
//!
//! Produces the PromptPay QR a buyer scans to pay for one order or a whole
//! bundle, and reports payment status.
//!
//! ## Payload Reuse
//! ```text
//! request ──► pending orders in scope ──► amount = Σ final_amount
//!   (one ledger transaction, re-read after every write)
//!                                           │
//!              stored payload on all of them, decoding to this amount
//!              and this payee?
//!                 │ yes                         │ no
//!                 ▼                             ▼
//!            reuse as-is               encode fresh payload,
//!                                      attach to every pending order
//! ```
//!
//! Repeated requests therefore return the same QR as long as nothing
//! changed, and a stale QR is replaced as soon as the payable amount moves.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::error::ServiceResult;
use crate::qr;
use folio_core::money::Money;
use folio_core::promptpay::{self, Payee};
use folio_core::{Caller, CoreError, Order, OrderStatus};
use folio_db::{Database, DbResult};

/// A payable QR for one order or one bundle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    /// Orders this payment settles (pending ones only).
    pub order_ids: Vec<i64>,
    pub bundle_id: Option<String>,
    pub amount_cents: i64,

    /// PromptPay payload string encoded in the QR.
    pub payload: String,

    /// `data:image/png;base64,...`
    pub qr_png: String,

    pub instructions: String,

    /// True when the stored payload was still valid and returned unchanged.
    pub reused: bool,
}

/// Payment status of one order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPaymentStatus {
    pub order_id: i64,
    pub item_id: String,
    pub bundle_id: Option<String>,
    pub status: OrderStatus,
    pub final_amount_cents: i64,
    pub payment_requested: bool,
    pub paid_at: Option<DateTime<Utc>>,
}

impl From<&Order> for OrderPaymentStatus {
    fn from(order: &Order) -> Self {
        OrderPaymentStatus {
            order_id: order.id,
            item_id: order.item_id.clone(),
            bundle_id: order.bundle_id.clone(),
            status: order.status,
            final_amount_cents: order.final_amount_cents,
            payment_requested: order.payment_payload.is_some(),
            paid_at: order.paid_at,
        }
    }
}

/// Aggregate state of a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleState {
    /// Nothing paid yet, something still pending.
    AwaitingPayment,
    /// Some orders paid, others still pending.
    PartiallyPaid,
    /// Nothing pending, at least one order paid.
    Paid,
    /// Nothing pending and nothing paid (failed, superseded or refunded).
    Closed,
}

impl BundleState {
    fn of(orders: &[Order]) -> Self {
        let pending = orders.iter().any(|o| o.status == OrderStatus::Pending);
        let paid = orders.iter().any(|o| o.status == OrderStatus::Paid);

        match (pending, paid) {
            (true, false) => BundleState::AwaitingPayment,
            (true, true) => BundleState::PartiallyPaid,
            (false, true) => BundleState::Paid,
            (false, false) => BundleState::Closed,
        }
    }
}

/// Payment status of a bundle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundlePaymentStatus {
    pub bundle_id: String,
    pub state: BundleState,
    pub outstanding_cents: i64,
    pub paid_cents: i64,
    pub orders: Vec<OrderPaymentStatus>,
}

/// Payment operations.
#[derive(Debug, Clone)]
pub struct PaymentService {
    db: Database,
    payee: Payee,
    qr_size: u32,
}

impl PaymentService {
    pub fn new(db: Database, payee: Payee, qr_size: u32) -> Self {
        PaymentService { db, payee, qr_size }
    }

    /// Payment request for one of the caller's orders.
    pub async fn for_order(&self, caller: &Caller, order_id: i64) -> ServiceResult<PaymentRequest> {
        let order = self.db.orders().get_owned(order_id, &caller.user_id).await?;
        self.request(vec![order], None).await
    }

    /// Payment request covering every still-pending order of a bundle.
    pub async fn for_bundle(&self, caller: &Caller, bundle_id: &str) -> ServiceResult<PaymentRequest> {
        let orders = self.bundle_orders(caller, bundle_id).await?;
        self.request(orders, Some(bundle_id.to_string())).await
    }

    pub async fn order_status(&self, caller: &Caller, order_id: i64) -> ServiceResult<OrderPaymentStatus> {
        let order = self.db.orders().get_owned(order_id, &caller.user_id).await?;
        Ok(OrderPaymentStatus::from(&order))
    }

    pub async fn bundle_status(&self, caller: &Caller, bundle_id: &str) -> ServiceResult<BundlePaymentStatus> {
        let orders = self.bundle_orders(caller, bundle_id).await?;

        let sum = |status: OrderStatus| -> i64 {
            orders
                .iter()
                .filter(|o| o.status == status)
                .map(|o| o.final_amount_cents)
                .sum()
        };

        Ok(BundlePaymentStatus {
            bundle_id: bundle_id.to_string(),
            state: BundleState::of(&orders),
            outstanding_cents: sum(OrderStatus::Pending),
            paid_cents: sum(OrderStatus::Paid),
            orders: orders.iter().map(OrderPaymentStatus::from).collect(),
        })
    }

    /// A bundle's orders, treated as missing unless they belong to the caller.
    async fn bundle_orders(&self, caller: &Caller, bundle_id: &str) -> ServiceResult<Vec<Order>> {
        let orders: Vec<Order> = self
            .db
            .orders()
            .list_by_bundle(bundle_id)
            .await?
            .into_iter()
            .filter(|o| o.belongs_to(&caller.user_id))
            .collect();

        if orders.is_empty() {
            return Err(CoreError::BundleNotFound(bundle_id.to_string()).into());
        }

        Ok(orders)
    }

    async fn request(&self, orders: Vec<Order>, bundle_id: Option<String>) -> ServiceResult<PaymentRequest> {
        let scope: Vec<i64> = orders.iter().map(|o| o.id).collect();

        let attachment = self
            .db
            .orders()
            .request_payment(&scope, |pending| self.payload_for(pending))
            .await?;

        let amount = attachment.amount();
        let order_ids = attachment.order_ids();
        let reused = attachment.reused;
        let payload = attachment.payload;

        info!(
            order_ids = ?order_ids,
            bundle_id = ?bundle_id,
            amount = %amount,
            reused,
            "Payment requested"
        );

        let size = self.qr_size;
        let encoded = payload.clone();
        let qr_png = tokio::task::spawn_blocking(move || qr::png_data_uri(&encoded, size)).await??;

        Ok(PaymentRequest {
            order_ids,
            instructions: instructions(amount, &self.payee, bundle_id.is_some()),
            bundle_id,
            amount_cents: amount.cents(),
            payload,
            qr_png,
            reused,
        })
    }

    /// Payload for exactly the `pending` orders: the one they already share
    /// if it still encodes their total to our payee, else a fresh one.
    fn payload_for(&self, pending: &[Order]) -> DbResult<String> {
        let amount = Money::from_cents(pending.iter().map(|o| o.final_amount_cents).sum());

        match self.reusable_payload(pending, amount) {
            Some(payload) => Ok(payload),
            None => Ok(promptpay::encode_for(&self.payee, amount)?),
        }
    }

    fn reusable_payload(&self, pending: &[Order], amount: Money) -> Option<String> {
        let first = pending.first()?.payment_payload.as_ref()?;

        if pending.iter().any(|o| o.payment_payload.as_ref() != Some(first)) {
            return None;
        }

        let decoded = promptpay::decode(first).ok()?;
        (decoded.amount == Some(amount) && decoded.payee == self.payee.as_str()).then(|| first.clone())
    }
}

fn instructions(amount: Money, payee: &Payee, bundle: bool) -> String {
    let digits = payee.as_str();
    let tail = &digits[digits.len().saturating_sub(4)..];
    let scope = if bundle { "all items in this bundle" } else { "this item" };

    format!(
        "Scan the QR code with any Thai banking app and transfer exactly {} to PromptPay ending in {}. \
         Downloads for {} unlock once staff confirm the transfer.",
        amount, tail, scope
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::services::test_support::{buyer, publish, services};

    #[tokio::test]
    async fn test_order_payment_is_amount_bound() {
        let (services, blobs) = services().await;
        publish(&services, &blobs, "a", 12_345).await;

        let alice = buyer("alice");
        let order = services.checkout().buy_now(&alice, "a").await.unwrap().order;

        let request = services.payments().for_order(&alice, order.id).await.unwrap();
        assert!(!request.reused);
        assert_eq!(request.amount_cents, 12_345);
        assert!(request.qr_png.starts_with("data:image/png;base64,"));
        assert!(request.instructions.contains("฿123.45"));

        let decoded = promptpay::decode(&request.payload).unwrap();
        assert_eq!(decoded.payee, "0812345678");
        assert_eq!(decoded.amount, Some(Money::from_cents(12_345)));

        let stored = services.db().orders().get(order.id).await.unwrap();
        assert_eq!(stored.payment_payload.as_deref(), Some(request.payload.as_str()));
    }

    #[tokio::test]
    async fn test_repeated_requests_reuse_the_payload() {
        let (services, blobs) = services().await;
        publish(&services, &blobs, "a", 9_900).await;

        let alice = buyer("alice");
        let order = services.checkout().buy_now(&alice, "a").await.unwrap().order;

        let first = services.payments().for_order(&alice, order.id).await.unwrap();
        let second = services.payments().for_order(&alice, order.id).await.unwrap();
        assert!(second.reused);
        assert_eq!(first.payload, second.payload);
    }

    #[tokio::test]
    async fn test_bundle_payment_is_regenerated_when_amount_changes() {
        let (services, blobs) = services().await;
        for (id, price) in [("a", 10_000), ("b", 15_000), ("c", 25_000)] {
            publish(&services, &blobs, id, price).await;
        }

        let alice = buyer("alice");
        for id in ["a", "b", "c"] {
            services.cart().add(&alice, id).await.unwrap();
        }
        let bundle = services.checkout().checkout_cart(&alice).await.unwrap();

        let first = services.payments().for_bundle(&alice, &bundle.bundle_id).await.unwrap();
        assert_eq!(first.order_ids.len(), 3);
        assert_eq!(first.amount_cents, bundle.summary.total_cents);

        // Staff approve one order on its own; the bundle QR must shrink
        let approved = bundle.orders[0].clone();
        services.admin().approve(approved.id, "staff-1", None).await.unwrap();

        let second = services.payments().for_bundle(&alice, &bundle.bundle_id).await.unwrap();
        assert!(!second.reused);
        assert_eq!(second.order_ids.len(), 2);
        assert_eq!(second.amount_cents, bundle.summary.total_cents - approved.final_amount_cents);
        assert_ne!(first.payload, second.payload);

        let status = services.payments().bundle_status(&alice, &bundle.bundle_id).await.unwrap();
        assert_eq!(status.state, BundleState::PartiallyPaid);
        assert_eq!(status.paid_cents, approved.final_amount_cents);
        assert_eq!(status.outstanding_cents, second.amount_cents);
    }

    #[tokio::test]
    async fn test_bundle_qr_never_includes_an_order_approved_mid_request() {
        let (services, blobs) = services().await;
        publish(&services, &blobs, "a", 10_000).await;
        publish(&services, &blobs, "b", 15_000).await;

        let alice = buyer("alice");
        services.cart().add(&alice, "a").await.unwrap();
        services.cart().add(&alice, "b").await.unwrap();
        let bundle = services.checkout().checkout_cart(&alice).await.unwrap();
        let (first, second) = (&bundle.orders[0], &bundle.orders[1]);

        // The second order is approved while the first one is being updated
        sqlx::query(&format!(
            r#"
            CREATE TRIGGER approve_during_request AFTER UPDATE OF payment_payload ON orders
            WHEN NEW.id = {}
            BEGIN
                UPDATE orders
                SET status = 'paid', paid_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now'), reviewed_by = 'staff-1'
                WHERE id = {} AND status = 'pending';
            END
            "#,
            first.id, second.id
        ))
        .execute(services.db().pool())
        .await
        .unwrap();

        let request = services.payments().for_bundle(&alice, &bundle.bundle_id).await.unwrap();
        assert_eq!(request.order_ids, vec![first.id]);
        assert_eq!(request.amount_cents, first.final_amount_cents);

        let decoded = promptpay::decode(&request.payload).unwrap();
        assert_eq!(decoded.amount, Some(Money::from_cents(first.final_amount_cents)));

        let status = services.payments().bundle_status(&alice, &bundle.bundle_id).await.unwrap();
        assert_eq!(status.state, BundleState::PartiallyPaid);
        assert_eq!(status.outstanding_cents, request.amount_cents);
    }

    #[tokio::test]
    async fn test_paid_and_foreign_orders() {
        let (services, blobs) = services().await;
        publish(&services, &blobs, "a", 9_900).await;

        let alice = buyer("alice");
        let order = services.checkout().buy_now(&alice, "a").await.unwrap().order;

        let foreign = services.payments().for_order(&buyer("mallory"), order.id).await.unwrap_err();
        assert_eq!(foreign.kind(), ErrorKind::NotFound);

        services.admin().approve(order.id, "staff-1", Some("REF1")).await.unwrap();

        let paid = services.payments().for_order(&alice, order.id).await.unwrap_err();
        assert!(matches!(paid.rule(), Some(CoreError::AlreadyPaid { .. })));

        let status = services.payments().order_status(&alice, order.id).await.unwrap();
        assert_eq!(status.status, OrderStatus::Paid);
        assert!(status.paid_at.is_some());
    }

    #[tokio::test]
    async fn test_unknown_bundle() {
        let (services, _) = services().await;
        let err = services.payments().bundle_status(&buyer("alice"), "bdl_missing").await.unwrap_err();
        assert!(matches!(err.rule(), Some(CoreError::BundleNotFound(_))));
    }
}
