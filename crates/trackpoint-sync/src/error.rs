//! # Sync Error Types
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Capture       │  │     Auth                │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Capture(..)    │  │  NotAuthenticated       │ │
//! │  │  InvalidUrl     │  │                 │  │  AuthFailed             │ │
//! │  │  ConfigLoad/Save│  │                 │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │    Network      │  │     Server      │  │      Storage            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  ConnectionFail │  │  Server{status} │  │  Storage                │ │
//! │  │  Timeout        │  │  InvalidResponse│  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Propagation
//! - Automatic cycles log these and move on; the next trigger retries.
//! - Manual sends surface them to the caller.
//! - There is no internal backoff loop.

use thiserror::Error;

use trackpoint_core::{CaptureError, CoreError, ValidationError};
use trackpoint_store::StorageError;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering capture, auth, network, server and storage failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid endpoint or probe URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Capture Errors
    // =========================================================================
    /// Position could not be acquired.
    #[error("Capture failed: {0}")]
    Capture(#[from] CaptureError),

    // =========================================================================
    // Auth Errors
    // =========================================================================
    /// No session token; no request was made.
    #[error("No active session")]
    NotAuthenticated,

    /// Login rejected by the server.
    #[error("{0}")]
    AuthFailed(String),

    // =========================================================================
    // Network Errors
    // =========================================================================
    /// Transport-level failure (DNS, refused, reset).
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Request exceeded its timeout.
    #[error("Request timed out")]
    Timeout,

    // =========================================================================
    // Server Errors
    // =========================================================================
    /// Non-2xx response.
    #[error("Server responded {status}: {message}")]
    Server { status: u16, message: String },

    /// 2xx response whose body is not JSON.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// Store open/read/write failure.
    #[error("Storage error: {0}")]
    Storage(String),

    // =========================================================================
    // Trigger Errors
    // =========================================================================
    /// A platform wake primitive refused registration.
    #[error("Trigger registration failed: {0}")]
    RegistrationFailed(String),

    /// The keep-alive resource could not be acquired.
    #[error("Keep-alive unavailable: {0}")]
    KeepAliveUnavailable(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Serialization of a payload or message failed.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<StorageError> for SyncError {
    fn from(err: StorageError) -> Self {
        SyncError::Storage(err.to_string())
    }
}

impl From<ValidationError> for SyncError {
    fn from(err: ValidationError) -> Self {
        SyncError::InvalidConfig(err.to_string())
    }
}

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(v) => v.into(),
            CoreError::MalformedDocument(msg) => SyncError::SerializationFailed(msg),
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SyncError::Timeout
        } else if err.is_decode() {
            SyncError::InvalidResponse(err.to_string())
        } else if err.is_builder() {
            SyncError::InvalidUrl(err.to_string())
        } else {
            SyncError::ConnectionFailed(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Returns true if the failure is transient and the event stays queued
    /// for the next trigger.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::ConnectionFailed(_)
                | SyncError::Timeout
                | SyncError::Server { .. }
                | SyncError::InvalidResponse(_)
                | SyncError::Storage(_)
        )
    }

    /// Returns true for transport failures (the NetworkError class).
    pub fn is_network_error(&self) -> bool {
        matches!(self, SyncError::ConnectionFailed(_) | SyncError::Timeout)
    }

    /// Returns true if the session is missing or was rejected.
    pub fn is_auth_error(&self) -> bool {
        matches!(self, SyncError::NotAuthenticated | SyncError::AuthFailed(_))
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::ConnectionFailed("refused".into()).is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(SyncError::Server {
            status: 500,
            message: "boom".into()
        }
        .is_retryable());

        assert!(!SyncError::NotAuthenticated.is_retryable());
        assert!(!SyncError::InvalidConfig("bad".into()).is_retryable());
        assert!(!SyncError::Capture(CaptureError::PermissionDenied).is_retryable());
    }

    #[test]
    fn test_categories() {
        assert!(SyncError::Timeout.is_network_error());
        assert!(SyncError::AuthFailed("bad password".into()).is_auth_error());
        assert!(SyncError::InvalidUrl("x".into()).is_config_error());
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::Server {
            status: 422,
            message: "Invalid coordinates".into(),
        };
        assert_eq!(err.to_string(), "Server responded 422: Invalid coordinates");
        assert_eq!(SyncError::NotAuthenticated.to_string(), "No active session");
    }

    #[test]
    fn test_storage_error_converts() {
        let err: SyncError = StorageError::PoolExhausted.into();
        assert!(matches!(err, SyncError::Storage(_)));
    }
}
