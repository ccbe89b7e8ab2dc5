//! Cart operations for the calling buyer.

use tracing::debug;

use crate::error::ServiceResult;
use folio_core::cart::CartSnapshot;
use folio_core::Caller;
use folio_db::{CartAdd, Database};

/// Per-user cart operations.
#[derive(Debug, Clone)]
pub struct CartService {
    db: Database,
}

impl CartService {
    pub fn new(db: Database) -> Self {
        CartService { db }
    }

    /// Adds an item. An item already in the cart is reported, not rejected.
    pub async fn add(&self, caller: &Caller, item_id: &str) -> ServiceResult<CartAdd> {
        let added = self.db.carts().add(&caller.user_id, item_id).await?;
        debug!(
            user_id = %caller.user_id,
            item_id,
            already_in_cart = added.already_in_cart(),
            "Cart add"
        );
        Ok(added)
    }

    pub async fn remove(&self, caller: &Caller, entry_id: i64) -> ServiceResult<()> {
        self.db.carts().remove(&caller.user_id, entry_id).await?;
        Ok(())
    }

    /// Empties the cart. Always succeeds, even on an empty cart.
    pub async fn clear(&self, caller: &Caller) -> ServiceResult<u64> {
        Ok(self.db.carts().clear(&caller.user_id).await?)
    }

    /// Current lines at current prices, with the bundle discount applied.
    pub async fn snapshot(&self, caller: &Caller) -> ServiceResult<CartSnapshot> {
        Ok(self.db.carts().snapshot(&caller.user_id).await?)
    }

    pub async fn count(&self, caller: &Caller) -> ServiceResult<i64> {
        Ok(self.db.carts().count(&caller.user_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::ErrorKind;
    use crate::services::test_support::{buyer, publish, services};
    use folio_core::cart::BundleDiscountTier;

    #[tokio::test]
    async fn test_snapshot_applies_bundle_tier() {
        let (services, blobs) = services().await;
        services
            .db()
            .tiers()
            .replace_all(&[BundleDiscountTier::new(2, 500), BundleDiscountTier::new(3, 1_000)])
            .await
            .unwrap();

        for (id, price) in [("a", 10_000), ("b", 15_000), ("c", 25_000)] {
            publish(&services, &blobs, id, price).await;
        }

        let cart = services.cart();
        let alice = buyer("alice");
        for id in ["a", "b", "c"] {
            assert!(!cart.add(&alice, id).await.unwrap().already_in_cart());
        }
        assert!(cart.add(&alice, "a").await.unwrap().already_in_cart());

        let snapshot = cart.snapshot(&alice).await.unwrap();
        assert_eq!(snapshot.summary.subtotal_cents, 50_000);
        assert_eq!(snapshot.summary.discount_cents, 5_000);
        assert_eq!(snapshot.summary.total_cents, 45_000);
        assert_eq!(cart.count(&alice).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_single_item_gets_no_discount() {
        let (services, blobs) = services().await;
        publish(&services, &blobs, "a", 10_000).await;

        let alice = buyer("alice");
        services.cart().add(&alice, "a").await.unwrap();

        let snapshot = services.cart().snapshot(&alice).await.unwrap();
        assert_eq!(snapshot.summary.discount_cents, 0);
        assert_eq!(snapshot.summary.total_cents, 10_000);
    }

    #[tokio::test]
    async fn test_entries_are_private_to_their_owner() {
        let (services, blobs) = services().await;
        publish(&services, &blobs, "a", 10_000).await;

        let cart = services.cart();
        let added = cart.add(&buyer("alice"), "a").await.unwrap();

        let err = cart.remove(&buyer("mallory"), added.entry().id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        assert_eq!(cart.clear(&buyer("alice")).await.unwrap(), 1);
        assert_eq!(cart.clear(&buyer("alice")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_free_items_cannot_be_carted() {
        let (services, blobs) = services().await;
        publish(&services, &blobs, "free", 0).await;

        let err = services.cart().add(&buyer("alice"), "free").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }
}
