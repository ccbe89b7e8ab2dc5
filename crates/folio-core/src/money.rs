//! # Money Module
//!
//! Provides the `Money` type for handling monetary values safely.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │    0.1 + 0.2 = 0.30000000000000004  ❌ WRONG!                           │
//! │                                                                         │
//! │  A bundle discount split across three orders must add back up to the    │
//! │  exact discount the buyer was shown, and the QR code must commit the    │
//! │  payer to exactly the amount the ledger expects.                        │
//! │                                                                         │
//! │  OUR SOLUTION: Integer minor units (satang)                             │
//! │    ฿123.45 == 12345                                                     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use folio_core::money::Money;
//!
//! let price = Money::from_cents(12_345);
//! assert_eq!(price.to_decimal_string(), "123.45");
//! assert_eq!(Money::parse_decimal("123.45"), Some(price));
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use ts_rs::TS;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit (satang for THB).
///
/// ## Where Money Flows
/// ```text
/// Item.price_cents ──► CartSummary.subtotal ──► discount ──► total
///                                                   │
///                             pro-rated per line ◄──┘
///                                     │
///                                     ▼
///                    Order.final_amount_cents ──► PromptPay amount field
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from minor units.
    ///
    /// ## Example
    /// ```rust
    /// use folio_core::money::Money;
    ///
    /// let price = Money::from_cents(9_900); // ฿99.00
    /// assert_eq!(price.cents(), 9_900);
    /// ```
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Creates a Money value from whole baht.
    #[inline]
    pub const fn from_major(major: i64) -> Self {
        Money(major * 100)
    }

    /// Returns the value in minor units.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the major unit (baht) portion.
    #[inline]
    pub const fn major(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the minor unit portion (always 0-99).
    #[inline]
    pub const fn minor(&self) -> i64 {
        (self.0 % 100).abs()
    }

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Checks if the value is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the value is positive (greater than zero).
    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Checks if the value is negative (less than zero).
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Returns the portion of this amount given by a rate in basis points.
    ///
    /// ## Rounding
    /// Half-up on the minor unit: `(amount * bps + 5000) / 10000`.
    ///
    /// ## Example
    /// ```rust
    /// use folio_core::money::Money;
    ///
    /// let subtotal = Money::from_cents(50_000); // ฿500.00
    /// assert_eq!(subtotal.percentage(1_000).cents(), 5_000); // 10%
    /// ```
    pub fn percentage(&self, bps: u32) -> Money {
        // i128 keeps large subtotals from overflowing during the multiply
        let portion = (self.0 as i128 * bps as i128 + 5000) / 10000;
        Money::from_cents(portion as i64)
    }

    /// Formats the amount as a plain decimal with two fraction digits.
    ///
    /// This is the form carried by the PromptPay amount field.
    pub fn to_decimal_string(&self) -> String {
        let sign = if self.0 < 0 { "-" } else { "" };
        format!("{}{}.{:02}", sign, self.major().abs(), self.minor())
    }

    /// Parses a plain decimal string such as `"123.45"`, `"99"` or `"0.5"`.
    ///
    /// Returns `None` for signs, more than two fraction digits or any
    /// non-digit character.
    pub fn parse_decimal(input: &str) -> Option<Money> {
        let (whole, fraction) = match input.split_once('.') {
            Some((w, f)) => (w, f),
            None => (input, ""),
        };

        if whole.is_empty() || fraction.len() > 2 {
            return None;
        }
        if !whole.bytes().all(|b| b.is_ascii_digit()) || !fraction.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        let major: i64 = whole.parse().ok()?;
        let minor: i64 = match fraction.len() {
            0 => 0,
            1 => fraction.parse::<i64>().ok()? * 10,
            _ => fraction.parse().ok()?,
        };

        major.checked_mul(100)?.checked_add(minor).map(Money)
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Display shows the amount with the baht sign, e.g. `฿123.45`.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}฿{}.{:02}", sign, self.major().abs(), self.minor())
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), Add::add)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Money::from_cents(12_345).to_string(), "฿123.45");
        assert_eq!(Money::from_cents(500).to_string(), "฿5.00");
        assert_eq!(Money::from_cents(-550).to_string(), "-฿5.50");
        assert_eq!(Money::zero().to_string(), "฿0.00");
    }

    #[test]
    fn test_decimal_string() {
        assert_eq!(Money::from_cents(12_345).to_decimal_string(), "123.45");
        assert_eq!(Money::from_cents(7).to_decimal_string(), "0.07");
        assert_eq!(Money::from_major(99).to_decimal_string(), "99.00");
    }

    #[test]
    fn test_parse_decimal() {
        assert_eq!(Money::parse_decimal("123.45"), Some(Money::from_cents(12_345)));
        assert_eq!(Money::parse_decimal("99"), Some(Money::from_cents(9_900)));
        assert_eq!(Money::parse_decimal("0.5"), Some(Money::from_cents(50)));
        assert_eq!(Money::parse_decimal("1."), Some(Money::from_cents(100)));
    }

    #[test]
    fn test_parse_decimal_rejects_garbage() {
        assert_eq!(Money::parse_decimal(""), None);
        assert_eq!(Money::parse_decimal(".50"), None);
        assert_eq!(Money::parse_decimal("-1.00"), None);
        assert_eq!(Money::parse_decimal("1.005"), None);
        assert_eq!(Money::parse_decimal("1,000.00"), None);
        assert_eq!(Money::parse_decimal("99999999999999999999"), None);
    }

    #[test]
    fn test_percentage_rounding() {
        // 5% of ฿0.30 = 1.5 satang → rounds half up to 2
        assert_eq!(Money::from_cents(30).percentage(500).cents(), 2);
        // 10% of ฿500.00
        assert_eq!(Money::from_cents(50_000).percentage(1_000).cents(), 5_000);
        assert_eq!(Money::from_cents(50_000).percentage(0).cents(), 0);
        assert_eq!(Money::from_cents(50_000).percentage(10_000).cents(), 50_000);
    }

    #[test]
    fn test_arithmetic_and_sum() {
        let a = Money::from_cents(1000);
        let b = Money::from_cents(500);
        assert_eq!((a + b).cents(), 1500);
        assert_eq!((a - b).cents(), 500);

        let total: Money = [a, b, b].iter().sum();
        assert_eq!(total.cents(), 2000);
    }

    #[test]
    fn test_checks() {
        assert!(Money::zero().is_zero());
        assert!(Money::from_cents(1).is_positive());
        assert!(Money::from_cents(-1).is_negative());
    }
}
