//! # Cart Math
//!
//! Subtotal, bundle tier selection, discount and per-line pro-rating.
//!
//! ## Snapshot Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  cart entries ──► re-read current item prices (never cached)            │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  item_count < 2 ? ──yes──► no discount                                  │
//! │        │ no                                                             │
//! │        ▼                                                                │
//! │  tier = largest min_item_count ≤ item_count                             │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  discount = subtotal × bps / 10000      total = subtotal − discount     │
//! │        │                                                                │
//! │        ▼  (checkout only)                                               │
//! │  prorate_discount ──► one share per line, shares sum to discount        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::ValidationError;
use crate::money::Money;
use crate::MIN_BUNDLE_ITEMS;

// =============================================================================
// Discount Tiers
// =============================================================================

/// One row of the bundle discount table.
///
/// `discount_bps` is in basis points: 500 = 5%.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct BundleDiscountTier {
    pub min_item_count: u32,
    pub discount_bps: u32,
}

impl BundleDiscountTier {
    pub const fn new(min_item_count: u32, discount_bps: u32) -> Self {
        BundleDiscountTier {
            min_item_count,
            discount_bps,
        }
    }

    /// Discount as a percentage (for display only).
    pub fn percentage(&self) -> f64 {
        self.discount_bps as f64 / 100.0
    }
}

/// Picks the tier with the largest `min_item_count` not exceeding `item_count`.
///
/// Carts with fewer than two items never match, whatever the table says.
pub fn select_tier(tiers: &[BundleDiscountTier], item_count: usize) -> Option<BundleDiscountTier> {
    if item_count < MIN_BUNDLE_ITEMS {
        return None;
    }

    tiers
        .iter()
        .filter(|tier| tier.min_item_count as usize <= item_count)
        .max_by_key(|tier| tier.min_item_count)
        .copied()
}

/// Checks a tier table before it is stored.
pub fn validate_tiers(tiers: &[BundleDiscountTier]) -> Result<(), ValidationError> {
    let mut seen = Vec::with_capacity(tiers.len());

    for tier in tiers {
        if (tier.min_item_count as usize) < MIN_BUNDLE_ITEMS {
            return Err(ValidationError::OutOfRange {
                field: "min_item_count".to_string(),
                min: MIN_BUNDLE_ITEMS as i64,
                max: u32::MAX as i64,
            });
        }
        if tier.discount_bps > 10_000 {
            return Err(ValidationError::OutOfRange {
                field: "discount_bps".to_string(),
                min: 0,
                max: 10_000,
            });
        }
        if seen.contains(&tier.min_item_count) {
            return Err(ValidationError::InvalidFormat {
                field: "min_item_count".to_string(),
                reason: format!("duplicate tier for {} items", tier.min_item_count),
            });
        }
        seen.push(tier.min_item_count);
    }

    Ok(())
}

// =============================================================================
// Summary
// =============================================================================

/// Computed totals of a cart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CartSummary {
    pub item_count: u32,
    pub subtotal_cents: i64,
    pub tier: Option<BundleDiscountTier>,
    pub discount_cents: i64,
    pub total_cents: i64,
}

impl CartSummary {
    #[inline]
    pub fn subtotal(&self) -> Money {
        Money::from_cents(self.subtotal_cents)
    }

    #[inline]
    pub fn discount(&self) -> Money {
        Money::from_cents(self.discount_cents)
    }

    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }
}

/// Summarizes a set of line prices against the tier table.
pub fn summarize(prices: &[Money], tiers: &[BundleDiscountTier]) -> CartSummary {
    let subtotal: Money = prices.iter().sum();
    let tier = select_tier(tiers, prices.len());
    let discount = tier
        .map(|t| subtotal.percentage(t.discount_bps))
        .unwrap_or_default();

    CartSummary {
        item_count: prices.len() as u32,
        subtotal_cents: subtotal.cents(),
        tier,
        discount_cents: discount.cents(),
        total_cents: (subtotal - discount).cents(),
    }
}

/// Splits `discount` across lines in proportion to their prices.
///
/// Each share starts at `floor(discount × price / subtotal)`. Leftover minor
/// units go one at a time to the most expensive lines that still have room,
/// so the shares add up to `discount` exactly and no share exceeds its price.
pub fn prorate_discount(prices: &[Money], discount: Money) -> Vec<Money> {
    let subtotal: Money = prices.iter().sum();
    if !discount.is_positive() || !subtotal.is_positive() {
        return vec![Money::zero(); prices.len()];
    }

    let mut shares: Vec<i64> = prices
        .iter()
        .map(|price| (discount.cents() as i128 * price.cents() as i128 / subtotal.cents() as i128) as i64)
        .collect();

    let mut remainder = discount.cents() - shares.iter().sum::<i64>();

    let mut by_price: Vec<usize> = (0..prices.len()).collect();
    by_price.sort_by(|&a, &b| prices[b].cmp(&prices[a]).then(a.cmp(&b)));

    while remainder > 0 {
        let mut progressed = false;
        for &idx in &by_price {
            if remainder == 0 {
                break;
            }
            if shares[idx] < prices[idx].cents() {
                shares[idx] += 1;
                remainder -= 1;
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }

    shares.into_iter().map(Money::from_cents).collect()
}

// =============================================================================
// Snapshot
// =============================================================================

/// A priced cart line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct CartLine {
    pub entry_id: i64,
    pub item_id: String,
    pub title: String,

    /// Current item price, read when the snapshot was taken.
    pub price_cents: i64,

    #[ts(as = "String")]
    pub added_at: DateTime<Utc>,
}

impl CartLine {
    #[inline]
    pub fn price(&self) -> Money {
        Money::from_cents(self.price_cents)
    }
}

/// Ordered live cart lines plus their summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CartSnapshot {
    pub user_id: String,
    pub lines: Vec<CartLine>,

    /// Items still in the cart that are no longer published. Excluded from pricing.
    pub unavailable_item_ids: Vec<String>,

    pub summary: CartSummary,
}

impl CartSnapshot {
    pub fn new(
        user_id: impl Into<String>,
        lines: Vec<CartLine>,
        unavailable_item_ids: Vec<String>,
        tiers: &[BundleDiscountTier],
    ) -> Self {
        let prices: Vec<Money> = lines.iter().map(CartLine::price).collect();
        let summary = summarize(&prices, tiers);

        CartSnapshot {
            user_id: user_id.into(),
            lines,
            unavailable_item_ids,
            summary,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
