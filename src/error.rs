//! # Error Handling
//!
//! Error types shared by every repository and the synchronization core.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                                                     │
//! │  │                                                                      │
//! │  ├── Validation (100-199)      - rejected before any I/O               │
//! │  ├── Identity (200-299)        - auth / profile state                  │
//! │  ├── Configuration (300-399)   - config file problems                  │
//! │  ├── Local Store (400-499)     - SQLite cache                          │
//! │  ├── Remote Store (500-599)                                            │
//! │  │   ├── RemoteUnavailable     - transient, retried                    │
//! │  │   ├── Timeout               - transient, retried                    │
//! │  │   ├── PermissionDenied      - logged as its own category            │
//! │  │   ├── DocumentNotFound      - often a valid state transition        │
//! │  │   └── RemoteError           - anything else                         │
//! │  ├── Contacts (600-699)                                                │
//! │  ├── Messaging (700-799)                                               │
//! │  ├── Notifications (800-899)                                           │
//! │  └── Internal (900-999)                                                │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Failure Policy
//!
//! Read paths degrade to `None`/`false` at the repository boundary; write
//! paths propagate. Errors that the UI should see are additionally pushed
//! through [`crate::notice::ErrorChannel`].

use thiserror::Error;

/// Result type alias for murmur-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for murmur-core
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // ========================================================================
    // Validation Errors (100-199)
    // ========================================================================

    /// Input rejected locally before any I/O (blank or oversized message,
    /// invalid profile field)
    #[error("Validation failed: {0}")]
    Validation(String),

    // ========================================================================
    // Identity Errors (200-299)
    // ========================================================================

    /// No authenticated user is available
    #[error("No authenticated user.")]
    NotAuthenticated,

    /// Profile update rejected
    #[error("Failed to update profile: {0}")]
    ProfileUpdateFailed(String),

    // ========================================================================
    // Configuration Errors (300-399)
    // ========================================================================

    /// Configuration could not be parsed or read
    #[error("Invalid configuration: {0}")]
    Config(String),

    // ========================================================================
    // Local Store Errors (400-499)
    // ========================================================================

    /// Database error
    #[error("Database error: {0}")]
    DatabaseError(String),

    // ========================================================================
    // Remote Store Errors (500-599)
    // ========================================================================

    /// Remote store unreachable or temporarily failing
    #[error("Remote store unavailable: {0}")]
    RemoteUnavailable(String),

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Caller lacks permission for the remote operation
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Remote document does not exist
    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    /// Any other remote failure
    #[error("Remote store error: {0}")]
    RemoteError(String),

    // ========================================================================
    // Contact Errors (600-699)
    // ========================================================================

    /// Cannot add yourself as a contact
    #[error("Cannot add yourself as a contact.")]
    CannotAddSelf,

    // ========================================================================
    // Message Errors (700-799)
    // ========================================================================

    /// Message delivery failed
    #[error("Failed to deliver message: {0}")]
    DeliveryFailed(String),

    // ========================================================================
    // Notification Errors (800-899)
    // ========================================================================

    /// Push notification call failed
    #[error("Notification dispatch failed: {0}")]
    NotificationFailed(String),

    // ========================================================================
    // Internal Errors (900-999)
    // ========================================================================

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

impl Error {
    /// Numeric error code, grouped by category:
    /// - 100-199: Validation
    /// - 200-299: Identity
    /// - 300-399: Configuration
    /// - 400-499: Local store
    /// - 500-599: Remote store
    /// - 600-699: Contacts
    /// - 700-799: Messages
    /// - 800-899: Notifications
    /// - 900-999: Internal
    pub fn code(&self) -> i32 {
        match self {
            Error::Validation(_) => 100,

            Error::NotAuthenticated => 200,
            Error::ProfileUpdateFailed(_) => 201,

            Error::Config(_) => 300,

            Error::DatabaseError(_) => 402,

            Error::RemoteUnavailable(_) => 500,
            Error::Timeout(_) => 501,
            Error::PermissionDenied(_) => 502,
            Error::DocumentNotFound(_) => 503,
            Error::RemoteError(_) => 504,

            Error::CannotAddSelf => 600,

            Error::DeliveryFailed(_) => 702,

            Error::NotificationFailed(_) => 800,

            Error::SerializationError(_) => 901,
            Error::DeserializationError(_) => 902,
        }
    }

    /// The designated transient class: retried by subscriptions and by
    /// [`crate::remote::with_retry`].
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::RemoteUnavailable(_) | Error::Timeout(_))
    }

    /// Permission failures are reported separately from generic failures.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Error::PermissionDenied(_))
    }

    /// Check if this error is recoverable
    ///
    /// Recoverable errors can potentially be resolved by retrying
    /// or by user action.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::RemoteUnavailable(_)
                | Error::Timeout(_)
                | Error::DeliveryFailed(_)
                | Error::NotificationFailed(_)
        )
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout(err.to_string())
        } else {
            Error::NotificationFailed(err.to_string())
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::Validation("blank".into()).code(), 100);
        assert_eq!(Error::NotAuthenticated.code(), 200);
        assert_eq!(Error::Config("bad".into()).code(), 300);
        assert_eq!(Error::DatabaseError("x".into()).code(), 402);
        assert_eq!(Error::RemoteUnavailable("x".into()).code(), 500);
        assert_eq!(Error::CannotAddSelf.code(), 600);
        assert_eq!(Error::DeliveryFailed("x".into()).code(), 702);
        assert_eq!(Error::NotificationFailed("x".into()).code(), 800);
        assert_eq!(Error::SerializationError("x".into()).code(), 901);
    }

    #[test]
    fn test_transient_errors() {
        assert!(Error::RemoteUnavailable("offline".into()).is_transient());
        assert!(Error::Timeout("get".into()).is_transient());
        assert!(!Error::PermissionDenied("users/u1".into()).is_transient());
        assert!(!Error::DocumentNotFound("users/u1".into()).is_transient());
    }

    #[test]
    fn test_permission_denied_is_distinct() {
        assert!(Error::PermissionDenied("users/u1".into()).is_permission_denied());
        assert!(!Error::RemoteError("boom".into()).is_permission_denied());
        assert!(!Error::PermissionDenied("users/u1".into()).is_recoverable());
    }

    #[test]
    fn test_toml_error_maps_to_config() {
        let err = toml::from_str::<toml::Value>("= broken").unwrap_err();
        let err: Error = err.into();
        assert_eq!(err.code(), 300);
    }
}
