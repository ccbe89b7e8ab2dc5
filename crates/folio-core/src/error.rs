//! # Error Types
//!
//! Domain-specific error types for folio-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  folio-core errors (this file)                                         │
//! │  ├── CoreError        - Purchase lifecycle rule violations             │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  folio-db errors (separate crate)                                      │
//! │  └── DbError          - Storage failures, wraps CoreError              │
//! │                                                                         │
//! │  folio-service errors (app)                                            │
//! │  └── ServiceError     - Taxonomy + redaction → ApiError                │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → ServiceError → ApiError │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::types::{ItemStatus, OrderStatus};

// =============================================================================
// Core Error
// =============================================================================

/// Purchase lifecycle rule violations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Item does not exist in the catalog.
    #[error("Item not found: {0}")]
    ItemNotFound(String),

    /// Item cannot be added to a cart or purchased.
    ///
    /// ## When This Occurs
    /// - Item is not `published` (draft, under review, rejected, deactivated)
    /// - Item is free and needs no purchase
    /// - The requester already owns the item
    #[error("Item {item_id} is unavailable: {reason}")]
    ItemUnavailable { item_id: String, reason: String },

    /// Order does not exist, or does not belong to the caller.
    #[error("Order not found: {0}")]
    OrderNotFound(i64),

    /// A bundle has no orders visible to the caller.
    #[error("Bundle not found: {0}")]
    BundleNotFound(String),

    /// Cart entry does not exist, or does not belong to the caller.
    #[error("Cart entry not found: {0}")]
    CartEntryNotFound(i64),

    /// The requester already holds a paid order for the item.
    #[error("Item {item_id} is already owned")]
    AlreadyOwned { item_id: String },

    /// Re-approval of an order that is already paid.
    #[error("Order {order_id} is already paid")]
    AlreadyPaid { order_id: i64 },

    /// Checkout found nothing purchasable in the cart.
    #[error("Cart has no purchasable items")]
    EmptyCart,

    /// Cart has reached the maximum number of entries.
    #[error("Cart cannot have more than {max} items")]
    CartTooLarge { max: usize },

    /// The order state machine does not allow this move.
    #[error("Order {order_id} cannot move from {from} to {to}")]
    InvalidTransition {
        order_id: i64,
        from: OrderStatus,
        to: OrderStatus,
    },

    /// The item state machine does not allow this move.
    #[error("Item {item_id} cannot move from {from} to {to}")]
    InvalidItemTransition {
        item_id: String,
        from: ItemStatus,
        to: ItemStatus,
    },

    /// Download requested before the order was paid.
    ///
    /// Carries the current status so clients can render "pending".
    #[error("Payment for order {order_id} is incomplete (status: {status})")]
    PaymentIncomplete { order_id: i64, status: OrderStatus },

    /// Payment amount is zero, negative or too large to encode.
    #[error("Invalid payment amount: {reason}")]
    InvalidAmount { reason: String },

    /// Payee identifier has the wrong digit count or format.
    #[error("Invalid payee: {reason}")]
    InvalidPayee { reason: String },

    /// A payment payload failed to decode.
    #[error("Malformed payment payload: {reason}")]
    MalformedPayload { reason: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These occur before any business logic runs.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    Negative { field: String },

    /// Invalid format (e.g., bad identifier).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::PaymentIncomplete {
            order_id: 42,
            status: OrderStatus::Pending,
        };
        assert_eq!(
            err.to_string(),
            "Payment for order 42 is incomplete (status: pending)"
        );

        let err = CoreError::InvalidTransition {
            order_id: 7,
            from: OrderStatus::Failed,
            to: OrderStatus::Paid,
        };
        assert_eq!(err.to_string(), "Order 7 cannot move from failed to paid");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "reason".to_string(),
        };
        assert_eq!(validation_err.to_string(), "reason is required");

        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
