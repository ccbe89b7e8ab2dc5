//! Checkout: turns a single item or the whole cart into pending orders.

use tracing::info;
use uuid::Uuid;

use crate::error::ServiceResult;
use folio_core::Caller;
use folio_db::{BundleCheckout, Database, SingleCheckout};

/// Checkout operations.
#[derive(Debug, Clone)]
pub struct CheckoutService {
    db: Database,
}

impl CheckoutService {
    pub fn new(db: Database) -> Self {
        CheckoutService { db }
    }

    /// Creates (or returns the existing) pending order for one item.
    ///
    /// Repeated clicks return the same order, so a buyer never ends up with
    /// two QR codes for one purchase.
    pub async fn buy_now(&self, caller: &Caller, item_id: &str) -> ServiceResult<SingleCheckout> {
        Ok(self.db.orders().create_single(&caller.user_id, item_id).await?)
    }

    /// Converts the caller's cart into one bundle of pending orders.
    ///
    /// All-or-nothing: on any error the cart is untouched and no order of
    /// this attempt exists. Each attempt gets a fresh bundle id.
    pub async fn checkout_cart(&self, caller: &Caller) -> ServiceResult<BundleCheckout> {
        let bundle_id = new_bundle_id();
        let checkout = self.db.orders().create_bundle(&caller.user_id, &bundle_id).await?;

        info!(
            user_id = %caller.user_id,
            bundle_id = %checkout.bundle_id,
            orders = checkout.orders.len(),
            total = %checkout.summary.total(),
            "Cart checked out"
        );

        Ok(checkout)
    }
}

fn new_bundle_id() -> String {
    format!("bdl_{}", Uuid::new_v4().simple())
}
