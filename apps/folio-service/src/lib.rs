//! # folio-service: Purchase Lifecycle Orchestration
//!
//! Wires the ledger (`folio-db`) and the pure rules (`folio-core`) to the
//! outside world: the blob store, QR rendering and PDF watermarking.
//!
//! ## Module Organization
//! ```text
//! folio_service/
//! ├── lib.rs          ◄─── You are here (Services container, tracing)
//! ├── config.rs       ◄─── FOLIO_* environment configuration
//! ├── error.rs        ◄─── ServiceError, ErrorKind, ApiError
//! ├── blob.rs         ◄─── BlobStore trait, local and in-memory stores
//! ├── qr.rs           ◄─── PromptPay QR as PNG data URI or terminal text
//! ├── pdf.rs          ◄─── Per-page watermarking with lopdf
//! ├── auth_state.rs   ◄─── TTL-expiring nonce store for login round trips
//! └── services/
//!     ├── cart.rs        checkout.rs     payments.rs
//!     └── admin.rs       fulfillment.rs
//! ```
//!
//! ## Request Path
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  routing layer (out of scope)                                          │
//! │     │  Caller { user_id, display_name, email, roles }                  │
//! │     │  RequestContext { ip, user_agent }                               │
//! │     ▼                                                                   │
//! │  Services ──► cart() / checkout() / payments() / admin() / downloads() │
//! │     │                                                                   │
//! │     ├──► Database (SQLite, the only authority on order state)          │
//! │     └──► BlobStore (read-only on the download path)                    │
//! │                                                                         │
//! │  ServiceError ──► api_error() ──► ApiError { code, message }           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod auth_state;
pub mod blob;
pub mod config;
pub mod error;
pub mod pdf;
pub mod qr;
pub mod services;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use auth_state::{AuthStateStore, SweeperHandle};
use blob::{BlobStore, LocalBlobStore};
use config::{ConfigError, ServiceConfig};
use error::{ApiError, ServiceError, ServiceResult};
use folio_db::Database;
use services::{AdminService, CartService, CheckoutService, FulfillmentService, PaymentService};

pub use error::{ErrorCode, ErrorKind};

/// State held between the start of an OAuth login and its callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLogin {
    /// PKCE code verifier sent with the token exchange.
    pub code_verifier: String,

    /// Where to send the user once signed in.
    pub return_to: Option<String>,
}

/// Every service, sharing one pool and one blob store.
#[derive(Clone)]
pub struct Services {
    db: Database,
    blobs: Arc<dyn BlobStore>,
    config: Arc<ServiceConfig>,
    login_states: AuthStateStore<PendingLogin>,
}

impl Services {
    pub fn new(db: Database, blobs: Arc<dyn BlobStore>, config: ServiceConfig) -> Self {
        let login_states = AuthStateStore::new(config.auth_state_ttl);
        Services {
            db,
            blobs,
            config: Arc::new(config),
            login_states,
        }
    }

    /// Opens the database and the local blob store named by `config`.
    ///
    /// Parent directories are created as needed and migrations run.
    pub async fn connect(config: ServiceConfig) -> ServiceResult<Self> {
        if let Some(dir) = config.db_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            create_dir(dir).await?;
        }
        create_dir(&config.blob_root).await?;

        let db = Database::new(config.db_config()).await?;
        let blobs = Arc::new(LocalBlobStore::new(config.blob_root.clone()));

        info!(
            db_path = %config.db_path.display(),
            blob_root = %config.blob_root.display(),
            environment = %config.environment,
            "Services connected"
        );

        Ok(Services::new(db, blobs, config))
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn cart(&self) -> CartService {
        CartService::new(self.db.clone())
    }

    pub fn checkout(&self) -> CheckoutService {
        CheckoutService::new(self.db.clone())
    }

    pub fn payments(&self) -> PaymentService {
        PaymentService::new(self.db.clone(), self.config.payee.clone(), self.config.qr_size)
    }

    pub fn admin(&self) -> AdminService {
        AdminService::new(self.db.clone())
    }

    pub fn downloads(&self) -> FulfillmentService {
        FulfillmentService::new(self.db.clone(), Arc::clone(&self.blobs))
    }

    /// Pending OAuth logins, keyed by the `state` nonce.
    pub fn login_states(&self) -> &AuthStateStore<PendingLogin> {
        &self.login_states
    }

    /// Starts background housekeeping. Shut the handle down before exit.
    pub fn start_background(&self) -> SweeperHandle {
        let every = (self.config.auth_state_ttl / 2).max(Duration::from_secs(1));
        self.login_states.spawn_sweeper(every)
    }

    /// Client-facing form of `err` for the configured environment.
    pub fn api_error(&self, err: &ServiceError) -> ApiError {
        ApiError::from_error(err, self.config.environment)
    }

    /// Closes the pool.
    pub async fn close(&self) {
        self.db.close().await;
    }
}

async fn create_dir(path: &Path) -> Result<(), ConfigError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|source| ConfigError::CreateDir {
            path: path.to_path_buf(),
            source,
        })
}

/// Initializes the tracing subscriber for structured logging.
///
/// `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,folio=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use crate::services::test_support::{services, test_config};
    use folio_core::CoreError;

    #[tokio::test]
    async fn test_connect_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config();
        config.db_path = dir.path().join("data").join("folio.db");
        config.blob_root = dir.path().join("blobs");

        let services = Services::connect(config).await.unwrap();
        assert!(services.db().health_check().await);
        assert!(dir.path().join("blobs").is_dir());

        services.close().await;
    }

    #[tokio::test]
    async fn test_login_state_round_trip() {
        let (services, _) = services().await;
        let pending = PendingLogin {
            code_verifier: "verifier".to_string(),
            return_to: Some("/items/a".to_string()),
        };

        let nonce = services.login_states().issue(pending.clone()).await;
        assert_eq!(services.login_states().take(&nonce).await, Some(pending));
        assert_eq!(services.login_states().take(&nonce).await, None);

        services.start_background().shutdown().await;
    }

    #[tokio::test]
    async fn test_api_error_follows_environment() {
        let (services, _) = services().await;
        assert_eq!(services.config().environment, Environment::Development);

        let err: ServiceError = CoreError::EmptyCart.into();
        let api = services.api_error(&err);
        assert_eq!(api.code, ErrorCode::EmptyCart);
    }
}
