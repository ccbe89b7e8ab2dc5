//! # Tier Repository
//!
//! The bundle discount table. Read on every snapshot and bundle checkout,
//! written only by configuration tooling.

use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;

use crate::error::DbResult;
use crate::retry::RetryPolicy;
use folio_core::cart::BundleDiscountTier;
use folio_core::validation::validate_discount_tiers;
use folio_core::CoreError;

/// Repository for bundle discount tiers.
#[derive(Debug, Clone)]
pub struct TierRepository {
    pool: SqlitePool,
    retry: RetryPolicy,
}

impl TierRepository {
    pub fn new(pool: SqlitePool, retry: RetryPolicy) -> Self {
        TierRepository { pool, retry }
    }

    /// Lists all tiers, smallest `min_item_count` first.
    pub async fn list(&self) -> DbResult<Vec<BundleDiscountTier>> {
        self.retry
            .run("list_tiers", || async move {
                let mut conn = self.pool.acquire().await?;
                load_tiers(&mut conn).await
            })
            .await
    }

    /// Replaces the whole table in one transaction.
    pub async fn replace_all(&self, tiers: &[BundleDiscountTier]) -> DbResult<()> {
        validate_discount_tiers(tiers).map_err(CoreError::from)?;

        self.retry
            .run("replace_tiers", || async move {
                let mut tx = self.pool.begin().await?;

                sqlx::query("DELETE FROM bundle_discount_tiers")
                    .execute(&mut *tx)
                    .await?;

                for tier in tiers {
                    sqlx::query("INSERT INTO bundle_discount_tiers (min_item_count, discount_bps) VALUES (?1, ?2)")
                        .bind(tier.min_item_count)
                        .bind(tier.discount_bps)
                        .execute(&mut *tx)
                        .await?;
                }

                tx.commit().await?;
                Ok(())
            })
            .await?;

        info!(tiers = tiers.len(), "Bundle discount tiers replaced");
        Ok(())
    }
}

/// Reads the tier table on an existing connection or transaction.
pub(crate) async fn load_tiers(conn: &mut SqliteConnection) -> DbResult<Vec<BundleDiscountTier>> {
    let tiers = sqlx::query_as::<_, BundleDiscountTier>(
        "SELECT min_item_count, discount_bps FROM bundle_discount_tiers ORDER BY min_item_count",
    )
    .fetch_all(conn)
    .await?;

    Ok(tiers)
}
