//! # Approval Workflow
//!
//! Staff operations over the order ledger. Callers are already authorized
//! by the routing layer; `staff_id` is recorded as the reviewer.
//!
//! ```text
//! pending ──approve()────────► paid ──refund()──► refunded
//!    │    ──approve_bundle()──►  (every pending order of the bundle, 1 tx)
//!    └────reject(reason)─────► failed
//! ```
//!
//! Each transition is a single ledger transaction. An approval that fails
//! inside it leaves the order pending and surfaces as a retryable error;
//! retrying `approve` after a lost commit yields `ALREADY_PAID`, never a
//! second purchase count.

use tracing::info;

use crate::error::{ServiceError, ServiceResult};
use folio_core::{Order, OrderFilter, Page};
use folio_db::Database;

/// Staff-side order operations.
#[derive(Debug, Clone)]
pub struct AdminService {
    db: Database,
}

impl AdminService {
    pub fn new(db: Database) -> Self {
        AdminService { db }
    }

    /// Orders waiting for review, newest first.
    pub async fn pending(&self, page: u32, per_page: u32) -> ServiceResult<Page<Order>> {
        Ok(self.db.orders().search(&OrderFilter::pending(), page, per_page).await?)
    }

    /// Confirms the transfer for one order.
    pub async fn approve(&self, order_id: i64, staff_id: &str, reference: Option<&str>) -> ServiceResult<Order> {
        self.db
            .orders()
            .mark_paid(order_id, staff_id, reference)
            .await
            .map_err(ServiceError::rolled_back)
    }

    /// Confirms one transfer covering every pending order of a bundle.
    pub async fn approve_bundle(
        &self,
        bundle_id: &str,
        staff_id: &str,
        reference: Option<&str>,
    ) -> ServiceResult<Vec<Order>> {
        self.db
            .orders()
            .mark_bundle_paid(bundle_id, staff_id, reference)
            .await
            .map_err(ServiceError::rolled_back)
    }

    /// Rejects a pending order. The reason is required.
    pub async fn reject(&self, order_id: i64, staff_id: &str, reason: &str) -> ServiceResult<Order> {
        Ok(self.db.orders().mark_failed(order_id, staff_id, reason).await?)
    }

    pub async fn refund(&self, order_id: i64, staff_id: &str) -> ServiceResult<Order> {
        Ok(self.db.orders().mark_refunded(order_id, staff_id).await?)
    }

    /// Corrects the payment reference recorded at approval.
    pub async fn amend_reference(&self, order_id: i64, staff_id: &str, reference: &str) -> ServiceResult<Order> {
        let order = self.db.orders().amend_reference(order_id, reference).await?;
        info!(order_id, staff_id = %staff_id, "Payment reference amended");
        Ok(order)
    }

    /// Filtered purchase history.
    pub async fn purchases(&self, filter: &OrderFilter, page: u32, per_page: u32) -> ServiceResult<Page<Order>> {
        Ok(self.db.orders().search(filter, page, per_page).await?)
    }
}
