//! # Configuration
//!
//! Runtime knobs for the synchronization core, loadable from TOML.
//!
//! ```toml
//! database_path = "/data/murmur.db"
//! reconcile_interval_secs = 15
//! operation_timeout_ms = 10000
//! max_remote_attempts = 3
//!
//! [notifications]
//! use_emulator = false
//! production_url = "https://push.example.com/sendNotification"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::remote::RetryPolicy;

/// Maximum message content size (64KB)
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 64 * 1024;

/// Configuration for a [`crate::ChatClient`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Path to the local database file (None for in-memory)
    pub database_path: Option<String>,
    /// Background reconciliation interval
    pub reconcile_interval_secs: u64,
    /// Per-operation timeout for remote calls
    pub operation_timeout_ms: u64,
    /// Attempts per remote call, including the first one
    pub max_remote_attempts: u32,
    /// Base delay between attempts (multiplied by the attempt number)
    pub retry_backoff_ms: u64,
    /// Re-subscriptions allowed on transient failure of a live stream
    pub stream_retry_limit: u32,
    /// Upper bound on message text size in bytes
    pub max_message_bytes: usize,
    /// Default tracing filter, overridden by `RUST_LOG`
    pub log_filter: String,
    /// Push delivery settings
    pub notifications: NotificationConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            reconcile_interval_secs: 15,
            operation_timeout_ms: 10_000,
            max_remote_attempts: 3,
            retry_backoff_ms: 250,
            stream_retry_limit: 3,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            log_filter: "murmur_core=info".to_string(),
            notifications: NotificationConfig::default(),
        }
    }
}

impl CoreConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&source)
    }

    /// Reject values that would stall or spin the background loops.
    pub fn validate(&self) -> Result<()> {
        if self.reconcile_interval_secs == 0 {
            return Err(Error::Config("reconcile_interval_secs must be > 0".into()));
        }
        if self.operation_timeout_ms == 0 {
            return Err(Error::Config("operation_timeout_ms must be > 0".into()));
        }
        if self.max_remote_attempts == 0 {
            return Err(Error::Config("max_remote_attempts must be >= 1".into()));
        }
        Ok(())
    }

    /// Polling interval of the reconciliation loop
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    /// Timeout and retry policy applied to every remote call
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(self.operation_timeout_ms),
            max_attempts: self.max_remote_attempts,
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

/// Push delivery endpoint selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Route calls to the local emulator instead of production
    pub use_emulator: bool,
    /// Callable endpoint on the local emulator
    pub emulator_url: String,
    /// Callable endpoint in production
    pub production_url: String,
    /// HTTP timeout for a single call
    pub timeout_ms: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            use_emulator: false,
            emulator_url: "http://127.0.0.1:5001/murmur/us-central1/sendNotification".to_string(),
            production_url: "https://us-central1-murmur.cloudfunctions.net/sendNotification"
                .to_string(),
            timeout_ms: 10_000,
        }
    }
}

impl NotificationConfig {
    /// The endpoint selected by `use_emulator`
    pub fn endpoint(&self) -> &str {
        if self.use_emulator {
            &self.emulator_url
        } else {
            &self.production_url
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoreConfig::default();
        assert_eq!(config.reconcile_interval(), Duration::from_secs(15));
        assert_eq!(config.retry_policy().max_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = CoreConfig::from_toml_str(
            r#"
            reconcile_interval_secs = 2

            [notifications]
            use_emulator = true
            "#,
        )
        .unwrap();

        assert_eq!(config.reconcile_interval_secs, 2);
        assert_eq!(config.operation_timeout_ms, 10_000);
        assert_eq!(config.notifications.endpoint(), config.notifications.emulator_url);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let err = CoreConfig::from_toml_str("reconcile_interval_secs = 0").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("murmur.toml");
        std::fs::write(&path, "max_remote_attempts = 5\n").unwrap();

        let config = CoreConfig::load(&path).unwrap();
        assert_eq!(config.max_remote_attempts, 5);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = CoreConfig::load("/nonexistent/murmur.toml").unwrap_err();
        assert_eq!(err.code(), 300);
    }
}
