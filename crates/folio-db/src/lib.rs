//! # folio-db: Database Layer for Folio
//!
//! This crate provides database access for the Folio purchase lifecycle.
//! It uses SQLite for storage with sqlx for async operations, and it owns
//! every transaction that moves an order through its states.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Folio Data Flow                                  │
//! │                                                                         │
//! │  folio-service (approve, checkout, download)                           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     folio-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ OrderRepo ★   │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ CartRepo      │    │ 001_init.sql │  │   │
//! │  │   │ RetryPolicy   │    │ ItemRepo      │    │              │  │   │
//! │  │   │               │    │ TierRepo      │    │              │  │   │
//! │  │   │               │    │ DownloadLog   │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database (WAL)                       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types and transient classification
//! - [`retry`] - Bounded exponential backoff for idempotent operations
//! - [`repository`] - Repository implementations (orders, cart, items, ...)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use folio_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("path/to/folio.db")).await?;
//!
//! let checkout = db.orders().create_single("user-1", "item-1").await?;
//! let order = db.orders().mark_paid(checkout.order.id, "staff-1", Some("REF1")).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod retry;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};
pub use retry::RetryPolicy;

// Repository re-exports for convenience
pub use repository::cart::{CartAdd, CartRepository};
pub use repository::download_log::DownloadLogRepository;
pub use repository::item::ItemRepository;
pub use repository::order::{BundleCheckout, OrderRepository, OrderUpdate, PaymentAttachment, SingleCheckout};
pub use repository::tier::TierRepository;
