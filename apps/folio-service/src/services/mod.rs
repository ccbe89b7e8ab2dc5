//! # Services
//!
//! The operation set exposed to the routing layer, one struct per area.
//!
//! ```text
//! services/
//! ├── cart.rs         add / remove / clear / snapshot / count
//! ├── checkout.rs     buy-now and cart → bundle
//! ├── payments.rs     PromptPay request per order or bundle, status
//! ├── admin.rs        pending list, approve, reject, refund, purchases
//! └── fulfillment.rs  paid and free downloads, access checks
//! ```
//!
//! Every service is a cheap clone over the shared `Database` pool. None of
//! them caches order state between calls; the database is the only
//! authority.

pub mod admin;
pub mod cart;
pub mod checkout;
pub mod fulfillment;
pub mod payments;

pub use admin::AdminService;
pub use cart::CartService;
pub use checkout::CheckoutService;
pub use fulfillment::{DownloadStream, FulfillmentService};
pub use payments::{BundlePaymentStatus, BundleState, OrderPaymentStatus, PaymentRequest, PaymentService};

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::Utc;
    use std::sync::Arc;

    use crate::blob::{BlobStore, MemoryBlobStore};
    use crate::config::ServiceConfig;
    use crate::pdf::tests::sample_pdf;
    use crate::Services;
    use folio_core::{Caller, Item, ItemStatus};
    use folio_db::{Database, DbConfig};

    pub(crate) fn test_config() -> ServiceConfig {
        ServiceConfig::from_lookup(|name| match name {
            "FOLIO_DB_PATH" => Some(":memory:".to_string()),
            "FOLIO_PROMPTPAY_ID" => Some("0812345678".to_string()),
            _ => None,
        })
        .unwrap()
    }

    pub(crate) async fn services() -> (Services, Arc<MemoryBlobStore>) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let blobs = Arc::new(MemoryBlobStore::new());
        let services = Services::new(db, blobs.clone(), test_config());
        (services, blobs)
    }

    pub(crate) fn buyer(user_id: &str) -> Caller {
        Caller::buyer(user_id, format!("Buyer {}", user_id), format!("{}@example.com", user_id))
    }

    /// Inserts a published item and stores a two-page PDF for it.
    pub(crate) async fn publish(services: &Services, blobs: &MemoryBlobStore, id: &str, price_cents: i64) -> Item {
        let now = Utc::now();
        let item = Item {
            id: id.to_string(),
            title: format!("Notes {}", id),
            creator_id: "creator-1".to_string(),
            price_cents,
            status: ItemStatus::Published,
            storage_path: format!("items/{}.pdf", id),
            bonus_url: None,
            purchase_count: 0,
            created_at: now,
            updated_at: now,
        };

        services.db().items().insert(&item).await.unwrap();
        blobs.put(sample_pdf(), &item.storage_path).await.unwrap();
        item
    }
}
