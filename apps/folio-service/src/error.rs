//! # Service Errors
//!
//! One error type for every service operation, plus the serialized form
//! handed to the routing layer.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  CoreError ──┐                                                          │
//! │  DbError ────┤                                                          │
//! │  BlobError ──┼──► ServiceError ──► kind() ──► ApiError { code, message }│
//! │  QrError ────┤                      │                │                  │
//! │  Watermark ──┘                      │                └─ redacted in     │
//! │                                     ▼                   production for  │
//! │                       Validation | NotFound | Conflict   store/external │
//! │                       TransientStore | ExternalService   /internal      │
//! │                       Internal                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::Serialize;
use std::fmt;

use crate::blob::BlobError;
use crate::config::{ConfigError, Environment};
use crate::pdf::WatermarkError;
use crate::qr::QrError;
use folio_core::{CoreError, ValidationError};
use folio_db::DbError;

/// Errors from service operations.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Rule(#[from] CoreError),

    #[error(transparent)]
    Store(DbError),

    /// A store failure inside a transaction that was rolled back. Nothing
    /// changed, so the same request can be sent again.
    #[error("Nothing was saved: {0}")]
    RolledBack(DbError),

    #[error("Blob store failed: {0}")]
    Blob(#[from] BlobError),

    #[error("QR rendering failed: {0}")]
    Qr(#[from] QrError),

    #[error("Watermarking failed: {0}")]
    Watermark(#[from] WatermarkError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Background task failed: {0}")]
    Task(String),
}

/// Ledger rule violations surface as `Rule`, everything else as `Store`.
impl From<DbError> for ServiceError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Rule(rule) => ServiceError::Rule(rule),
            other => ServiceError::Store(other),
        }
    }
}

impl ServiceError {
    /// Classifies a failure of a single-transaction ledger write.
    ///
    /// Rule violations stay rules and transient faults stay transient; any
    /// other store fault becomes `RolledBack`.
    pub fn rolled_back(err: DbError) -> Self {
        match err {
            DbError::Rule(rule) => ServiceError::Rule(rule),
            err if err.is_transient() => ServiceError::Store(err),
            other => ServiceError::RolledBack(other),
        }
    }
}

impl From<ValidationError> for ServiceError {
    fn from(err: ValidationError) -> Self {
        ServiceError::Rule(CoreError::Validation(err))
    }
}

impl From<tokio::task::JoinError> for ServiceError {
    fn from(err: tokio::task::JoinError) -> Self {
        ServiceError::Task(err.to_string())
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Coarse error classes used for status mapping and retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad or missing input. Never retried.
    Validation,
    /// Entity absent, or not owned by the caller.
    NotFound,
    /// The entity is already in (or cannot reach) the requested state.
    Conflict,
    /// Store connectivity. Already retried internally; safe to retry later.
    TransientStore,
    /// Blob store or rendering failure. Not retried automatically.
    ExternalService,
    /// Anything else.
    Internal,
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Rule(rule) => rule_kind(rule),
            ServiceError::Store(db) => match db {
                err if err.is_transient() => ErrorKind::TransientStore,
                DbError::NotFound { .. } => ErrorKind::NotFound,
                DbError::UniqueViolation { .. } => ErrorKind::Conflict,
                DbError::ForeignKeyViolation { .. } => ErrorKind::Validation,
                _ => ErrorKind::Internal,
            },
            ServiceError::RolledBack(_) => ErrorKind::Internal,
            ServiceError::Blob(BlobError::InvalidPath(_)) => ErrorKind::Internal,
            ServiceError::Blob(_) | ServiceError::Qr(_) | ServiceError::Watermark(_) => {
                ErrorKind::ExternalService
            }
            ServiceError::Config(_) | ServiceError::Task(_) => ErrorKind::Internal,
        }
    }

    /// True when the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::RolledBack(_)) || self.kind() == ErrorKind::TransientStore
    }

    /// The domain rule behind this error, if any.
    pub fn rule(&self) -> Option<&CoreError> {
        match self {
            ServiceError::Rule(rule) => Some(rule),
            _ => None,
        }
    }
}

fn rule_kind(rule: &CoreError) -> ErrorKind {
    match rule {
        CoreError::ItemNotFound(_)
        | CoreError::OrderNotFound(_)
        | CoreError::BundleNotFound(_)
        | CoreError::CartEntryNotFound(_) => ErrorKind::NotFound,

        CoreError::ItemUnavailable { .. }
        | CoreError::AlreadyOwned { .. }
        | CoreError::AlreadyPaid { .. }
        | CoreError::EmptyCart
        | CoreError::InvalidTransition { .. }
        | CoreError::InvalidItemTransition { .. }
        | CoreError::PaymentIncomplete { .. } => ErrorKind::Conflict,

        CoreError::CartTooLarge { .. }
        | CoreError::InvalidAmount { .. }
        | CoreError::InvalidPayee { .. }
        | CoreError::MalformedPayload { .. }
        | CoreError::Validation(_) => ErrorKind::Validation,
    }
}

// =============================================================================
// API Error
// =============================================================================

/// Error returned to clients.
///
/// ## Serialization
/// ```json
/// {
///   "code": "ALREADY_PAID",
///   "message": "Order 42 is already paid",
///   "retryable": false
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    /// Machine-readable error code for programmatic handling
    pub code: ErrorCode,

    /// Human-readable error message for display
    pub message: String,

    pub retryable: bool,
}

/// Error codes for API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    NotFound,
    AlreadyOwned,
    AlreadyPaid,
    EmptyCart,
    ItemUnavailable,
    PaymentIncomplete,
    Conflict,
    StoreUnavailable,
    ExternalService,
    Internal,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        ApiError {
            code,
            message: message.into(),
            retryable: false,
        }
    }

    /// Builds the client-facing error.
    ///
    /// In production, store, external and internal failures get a generic
    /// message; the detail is logged instead.
    pub fn from_error(err: &ServiceError, environment: Environment) -> Self {
        let kind = err.kind();
        let code = match (kind, err.rule()) {
            (_, Some(CoreError::AlreadyOwned { .. })) => ErrorCode::AlreadyOwned,
            (_, Some(CoreError::AlreadyPaid { .. })) => ErrorCode::AlreadyPaid,
            (_, Some(CoreError::EmptyCart)) => ErrorCode::EmptyCart,
            (_, Some(CoreError::ItemUnavailable { .. })) => ErrorCode::ItemUnavailable,
            (_, Some(CoreError::PaymentIncomplete { .. })) => ErrorCode::PaymentIncomplete,
            (ErrorKind::Validation, _) => ErrorCode::ValidationError,
            (ErrorKind::NotFound, _) => ErrorCode::NotFound,
            (ErrorKind::Conflict, _) => ErrorCode::Conflict,
            (ErrorKind::TransientStore, _) => ErrorCode::StoreUnavailable,
            (ErrorKind::ExternalService, _) => ErrorCode::ExternalService,
            (ErrorKind::Internal, _) => ErrorCode::Internal,
        };

        let redact = environment.is_production()
            && matches!(
                kind,
                ErrorKind::TransientStore | ErrorKind::ExternalService | ErrorKind::Internal
            );

        let message = if redact {
            tracing::error!(error = %err, ?kind, "Request failed");
            match kind {
                ErrorKind::TransientStore => "Service temporarily unavailable, please retry".to_string(),
                _ if err.is_retryable() => "Nothing was changed, please retry".to_string(),
                ErrorKind::ExternalService => "A downstream service failed".to_string(),
                _ => "Internal error".to_string(),
            }
        } else {
            err.to_string()
        };

        ApiError {
            code,
            message,
            retryable: err.is_retryable(),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::OrderStatus;

    #[test]
    fn test_kinds() {
        let cases: Vec<(ServiceError, ErrorKind)> = vec![
            (CoreError::OrderNotFound(1).into(), ErrorKind::NotFound),
            (CoreError::AlreadyPaid { order_id: 1 }.into(), ErrorKind::Conflict),
            (CoreError::EmptyCart.into(), ErrorKind::Conflict),
            (
                ValidationError::Required { field: "reason".into() }.into(),
                ErrorKind::Validation,
            ),
            (DbError::Busy("locked".into()).into(), ErrorKind::TransientStore),
            (DbError::PoolExhausted.into(), ErrorKind::TransientStore),
            (DbError::QueryFailed("syntax".into()).into(), ErrorKind::Internal),
            (BlobError::NotFound("a.pdf".into()).into(), ErrorKind::ExternalService),
            (
                WatermarkError::NoPages.into(),
                ErrorKind::ExternalService,
            ),
        ];

        for (err, kind) in cases {
            assert_eq!(err.kind(), kind, "{err}");
        }
    }

    #[test]
    fn test_ledger_rules_unwrap_from_db_errors() {
        let err: ServiceError = DbError::Rule(CoreError::AlreadyOwned { item_id: "a".into() }).into();
        assert!(matches!(err, ServiceError::Rule(CoreError::AlreadyOwned { .. })));
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_api_error_codes() {
        let err: ServiceError = CoreError::PaymentIncomplete {
            order_id: 7,
            status: OrderStatus::Pending,
        }
        .into();
        let api = ApiError::from_error(&err, Environment::Production);
        assert_eq!(api.code, ErrorCode::PaymentIncomplete);
        assert!(api.message.contains("pending"));
        assert!(!api.retryable);

        let json = serde_json::to_value(&api).unwrap();
        assert_eq!(json["code"], "PAYMENT_INCOMPLETE");
    }

    #[test]
    fn test_production_redacts_store_detail() {
        let err: ServiceError = DbError::Busy("database is locked: /srv/folio.db".into()).into();

        let dev = ApiError::from_error(&err, Environment::Development);
        assert!(dev.message.contains("/srv/folio.db"));
        assert!(dev.retryable);

        let prod = ApiError::from_error(&err, Environment::Production);
        assert_eq!(prod.code, ErrorCode::StoreUnavailable);
        assert!(!prod.message.contains("/srv/folio.db"));
        assert!(prod.retryable);
    }

    #[test]
    fn test_rolled_back_writes_are_retryable() {
        let err = ServiceError::rolled_back(DbError::QueryFailed("simulated failure".into()));
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.is_retryable());

        let prod = ApiError::from_error(&err, Environment::Production);
        assert_eq!(prod.code, ErrorCode::Internal);
        assert!(prod.retryable);
        assert!(!prod.message.contains("simulated"));

        let rule = ServiceError::rolled_back(DbError::Rule(CoreError::AlreadyPaid { order_id: 1 }));
        assert!(matches!(rule, ServiceError::Rule(CoreError::AlreadyPaid { .. })));
        assert!(!rule.is_retryable());

        let busy = ServiceError::rolled_back(DbError::Busy("locked".into()));
        assert_eq!(busy.kind(), ErrorKind::TransientStore);
    }
}
