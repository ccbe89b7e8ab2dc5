//! # folio-core: Pure Purchase Lifecycle Logic
//!
//! This crate holds the rules of the Folio marketplace as pure functions
//! with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Folio Purchase Lifecycle                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 folio-service (orchestration)                   │   │
//! │  │   cart ──► checkout ──► payments ──► admin ──► downloads        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ folio-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌──────────┐ ┌────────┐  │   │
//! │  │   │  types  │ │  cart   │ │ access  │ │promptpay │ │watermk │  │   │
//! │  │   │ Order   │ │ tiers   │ │ ItemView│ │ EMV TLV  │ │ layout │  │   │
//! │  │   │ Item    │ │ prorate │ │ reasons │ │ CRC16    │ │ scale  │  │   │
//! │  │   └─────────┘ └─────────┘ └─────────┘ └──────────┘ └────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                  folio-db (Database Layer)                      │   │
//! │  │        SQLite queries, migrations, the order ledger             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Item, Order, CartEntry, DownloadLogEntry)
//! - [`money`] - Money type with integer arithmetic (minor units)
//! - [`cart`] - Cart summary, bundle tier selection and discount pro-rating
//! - [`access`] - Catalog access guard and redacted item views
//! - [`promptpay`] - PromptPay (EMVCo merchant QR) payload codec
//! - [`watermark`] - Page geometry for personalized download marks
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation
//!
//! ## Example Usage
//!
//! ```rust
//! use folio_core::cart::{summarize, BundleDiscountTier};
//! use folio_core::money::Money;
//!
//! let tiers = [BundleDiscountTier::new(2, 500), BundleDiscountTier::new(3, 1000)];
//! let prices = [Money::from_cents(10_000), Money::from_cents(15_000), Money::from_cents(25_000)];
//!
//! let summary = summarize(&prices, &tiers);
//! assert_eq!(summary.discount().cents(), 5_000);
//! assert_eq!(summary.total().cents(), 45_000);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod access;
pub mod cart;
pub mod error;
pub mod money;
pub mod promptpay;
pub mod types;
pub mod validation;
pub mod watermark;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Carts below this size never qualify for a bundle discount, whatever the
/// configured tier table says.
pub const MIN_BUNDLE_ITEMS: usize = 2;

/// Maximum entries a single cart may hold.
pub const MAX_CART_ITEMS: usize = 100;

/// Largest page size accepted by purchase listings.
pub const MAX_PAGE_SIZE: u32 = 100;
