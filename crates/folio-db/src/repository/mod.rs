//! # Repository Module
//!
//! Database repository implementations for Folio.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Who Writes What                                      │
//! │                                                                         │
//! │  CartRepository         cart_entries      (owning user only)           │
//! │  OrderRepository ★      orders            (checkout, approval, refund) │
//! │                         items.purchase_count (paid transition only)    │
//! │                         cart_entries      (bundle checkout removes)    │
//! │                         download_log      (counter + log together)     │
//! │  DownloadLogRepository  download_log      (append only)                │
//! │  ItemRepository         items             (catalog seam, seed, tests)  │
//! │  TierRepository         bundle_discount_tiers (configuration)          │
//! │                                                                         │
//! │  Multi-statement sequences run inside one sqlx transaction. Helpers    │
//! │  shared between repositories take `&mut SqliteConnection`, so they     │
//! │  work on a pooled connection or inside a transaction (`&mut *tx`).     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`OrderRepository`](order::OrderRepository) - The order ledger
//! - [`CartRepository`](cart::CartRepository) - Cart entries and snapshots
//! - [`ItemRepository`](item::ItemRepository) - Catalog reads and state transitions
//! - [`TierRepository`](tier::TierRepository) - Bundle discount tiers
//! - [`DownloadLogRepository`](download_log::DownloadLogRepository) - Append-only log

pub mod cart;
pub mod download_log;
pub mod item;
pub mod order;
pub mod tier;

/// Fixtures shared by repository tests.
#[cfg(test)]
pub(crate) mod test_support {
    use chrono::Utc;
    use folio_core::{Item, ItemStatus};

    use crate::{Database, DbConfig};

    pub async fn db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    pub fn item(id: &str, price_cents: i64, status: ItemStatus) -> Item {
        let now = Utc::now();
        Item {
            id: id.to_string(),
            title: format!("Title of {id}"),
            creator_id: "creator-1".to_string(),
            price_cents,
            status,
            storage_path: format!("items/{id}.pdf"),
            bonus_url: None,
            purchase_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Inserts a published item and returns it.
    pub async fn published(db: &Database, id: &str, price_cents: i64) -> Item {
        let item = item(id, price_cents, ItemStatus::Published);
        db.items().insert(&item).await.unwrap();
        item
    }
}
