//! Service configuration.
//!
//! Configuration is loaded from `FOLIO_*` environment variables with
//! fallback to defaults. A `.env` file in the working directory is read
//! first when present.
//!
//! ## Variables
//! ```text
//! FOLIO_DB_PATH              SQLite file      (default: <data dir>/folio.db)
//! FOLIO_BLOB_ROOT            blob directory   (default: <db dir>/blobs)
//! FOLIO_PROMPTPAY_ID         payee id         (required)
//! FOLIO_ENV                  development | production
//! FOLIO_DB_MAX_CONNECTIONS   pool size        (default: 5)
//! FOLIO_RETRY_ATTEMPTS       store retries    (default: 3)
//! FOLIO_RETRY_INITIAL_MS     first backoff    (default: 50)
//! FOLIO_RETRY_MAX_MS         backoff ceiling  (default: 1000)
//! FOLIO_QR_SIZE              QR image px      (default: 320)
//! FOLIO_AUTH_STATE_TTL_SECS  login nonce TTL  (default: 600)
//! ```

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use folio_core::promptpay::Payee;
use folio_db::{DbConfig, RetryPolicy};

/// Deployment environment. Controls error redaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn is_production(self) -> bool {
        self == Environment::Production
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => f.write_str("development"),
            Environment::Production => f.write_str("production"),
        }
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            _ => Err(ConfigError::InvalidValue("FOLIO_ENV".to_string())),
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// SQLite database file
    pub db_path: PathBuf,

    /// Root directory of the local blob store
    pub blob_root: PathBuf,

    /// PromptPay identifier that receives transfers
    pub payee: Payee,

    pub environment: Environment,

    pub db_max_connections: u32,

    /// Store retry attempts, including the first one
    pub retry_attempts: u32,
    pub retry_initial: Duration,
    pub retry_max: Duration,

    /// Side length of rendered QR images in pixels
    pub qr_size: u32,

    /// Lifetime of pending login state
    pub auth_state_ttl: Duration,
}

impl ServiceConfig {
    /// Load configuration from the environment (and `.env`, if present).
    pub fn load() -> Result<Self, ConfigError> {
        // A missing .env file is fine; real deployments set variables directly
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db_path = match lookup("FOLIO_DB_PATH") {
            Some(path) => PathBuf::from(path),
            None => default_db_path()?,
        };

        let blob_root = match lookup("FOLIO_BLOB_ROOT") {
            Some(root) => PathBuf::from(root),
            None => default_blob_root(&db_path),
        };

        let payee_id = lookup("FOLIO_PROMPTPAY_ID")
            .ok_or_else(|| ConfigError::MissingRequired("FOLIO_PROMPTPAY_ID".to_string()))?;
        let payee = Payee::parse(&payee_id)
            .map_err(|_| ConfigError::InvalidValue("FOLIO_PROMPTPAY_ID".to_string()))?;

        let environment = match lookup("FOLIO_ENV") {
            Some(value) => value.parse()?,
            None => Environment::default(),
        };

        let config = ServiceConfig {
            db_path,
            blob_root,
            payee,
            environment,
            db_max_connections: parse_or(&lookup, "FOLIO_DB_MAX_CONNECTIONS", 5)?,
            retry_attempts: parse_or(&lookup, "FOLIO_RETRY_ATTEMPTS", 3)?,
            retry_initial: Duration::from_millis(parse_or(&lookup, "FOLIO_RETRY_INITIAL_MS", 50)?),
            retry_max: Duration::from_millis(parse_or(&lookup, "FOLIO_RETRY_MAX_MS", 1000)?),
            qr_size: parse_or(&lookup, "FOLIO_QR_SIZE", 320)?,
            auth_state_ttl: Duration::from_secs(parse_or(&lookup, "FOLIO_AUTH_STATE_TTL_SECS", 600)?),
        };

        if config.db_max_connections == 0 {
            return Err(ConfigError::InvalidValue("FOLIO_DB_MAX_CONNECTIONS".to_string()));
        }
        if config.retry_initial > config.retry_max {
            return Err(ConfigError::InvalidValue("FOLIO_RETRY_INITIAL_MS".to_string()));
        }

        Ok(config)
    }

    /// Store retry policy derived from the retry settings.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .max_attempts(self.retry_attempts)
            .backoff(self.retry_initial, self.retry_max)
    }

    /// Database configuration for this service.
    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(&self.db_path)
            .max_connections(self.db_max_connections)
            .retry(self.retry_policy())
    }
}

fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(name.to_string())),
        None => Ok(default),
    }
}

/// Platform data directory, e.g. `~/.local/share/folio/folio.db` on Linux.
fn default_db_path() -> Result<PathBuf, ConfigError> {
    let dirs = ProjectDirs::from("com", "folio", "folio").ok_or(ConfigError::NoDataDir)?;
    Ok(dirs.data_dir().join("folio.db"))
}

fn default_blob_root(db_path: &Path) -> PathBuf {
    db_path
        .parent()
        .map(|dir| dir.join("blobs"))
        .unwrap_or_else(|| PathBuf::from("blobs"))
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}")]
    InvalidValue(String),

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Could not determine the platform data directory")]
    NoDataDir,

    #[error("Cannot create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::from_lookup(lookup(&[
            ("FOLIO_DB_PATH", "/srv/folio/folio.db"),
            ("FOLIO_PROMPTPAY_ID", "081-234-5678"),
        ]))
        .unwrap();

        assert_eq!(config.blob_root, PathBuf::from("/srv/folio/blobs"));
        assert_eq!(config.payee.as_str(), "0812345678");
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.db_max_connections, 5);
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.retry_initial, Duration::from_millis(50));
        assert_eq!(config.qr_size, 320);
        assert_eq!(config.auth_state_ttl, Duration::from_secs(600));
    }

    #[test]
    fn test_overrides() {
        let config = ServiceConfig::from_lookup(lookup(&[
            ("FOLIO_DB_PATH", "folio.db"),
            ("FOLIO_BLOB_ROOT", "/data/pdfs"),
            ("FOLIO_PROMPTPAY_ID", "0812345678"),
            ("FOLIO_ENV", "production"),
            ("FOLIO_RETRY_ATTEMPTS", "5"),
            ("FOLIO_QR_SIZE", "512"),
        ]))
        .unwrap();

        assert!(config.environment.is_production());
        assert_eq!(config.blob_root, PathBuf::from("/data/pdfs"));
        assert_eq!(config.retry_policy().max_attempts, 5);
        assert_eq!(config.qr_size, 512);
        assert_eq!(config.db_config().max_connections, 5);
    }

    #[test]
    fn test_payee_is_required_and_validated() {
        let missing = ServiceConfig::from_lookup(lookup(&[("FOLIO_DB_PATH", "folio.db")]));
        assert!(matches!(missing, Err(ConfigError::MissingRequired(_))));

        let bad = ServiceConfig::from_lookup(lookup(&[
            ("FOLIO_DB_PATH", "folio.db"),
            ("FOLIO_PROMPTPAY_ID", "12345"),
        ]));
        assert!(matches!(bad, Err(ConfigError::InvalidValue(name)) if name == "FOLIO_PROMPTPAY_ID"));
    }

    #[test]
    fn test_unparseable_values() {
        let result = ServiceConfig::from_lookup(lookup(&[
            ("FOLIO_DB_PATH", "folio.db"),
            ("FOLIO_PROMPTPAY_ID", "0812345678"),
            ("FOLIO_QR_SIZE", "huge"),
        ]));
        assert!(matches!(result, Err(ConfigError::InvalidValue(name)) if name == "FOLIO_QR_SIZE"));

        let result = ServiceConfig::from_lookup(lookup(&[
            ("FOLIO_DB_PATH", "folio.db"),
            ("FOLIO_PROMPTPAY_ID", "0812345678"),
            ("FOLIO_ENV", "staging"),
        ]));
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }
}
