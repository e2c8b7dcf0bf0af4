//! # Error Types
//!
//! Domain-specific error types for trackpoint-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  trackpoint-core errors (this file)                                    │
//! │  ├── CoreError        - General domain errors                          │
//! │  ├── ValidationError  - Input/config validation failures               │
//! │  └── CaptureError     - Position could not be acquired                 │
//! │                                                                         │
//! │  trackpoint-store errors (separate crate)                              │
//! │  └── StorageError     - Store open/read/write failures                 │
//! │                                                                         │
//! │  trackpoint-sync errors (separate crate)                               │
//! │  └── SyncError        - Auth, network, server, storage, capture        │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → SyncError → caller / log          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A stored or received document could not be interpreted.
    #[error("Malformed document: {0}")]
    MalformedDocument(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::MalformedDocument(err.to_string())
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before a config is persisted or a position is turned into an event.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Integer value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Coordinate component is outside its valid range or not finite.
    #[error("{field} must be a finite value between -{limit} and {limit}, got {value}")]
    CoordinateOutOfRange { field: String, value: f64, limit: f64 },

    /// Invalid format (e.g., relative URL, unsupported scheme).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Capture Error
// =============================================================================

/// Failure to acquire a position reading.
///
/// ## Handling
/// ```text
/// automatic cycle ──► log + skip (nothing to enqueue)
/// manual cycle    ──► returned to the caller
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    /// The user or OS denied access to location.
    #[error("Location permission denied")]
    PermissionDenied,

    /// No position source is available right now.
    #[error("Location unavailable: {0}")]
    Unavailable(String),

    /// The reading did not arrive within the configured timeout.
    #[error("Location request timed out after {0} ms")]
    Timeout(u64),

    /// The newest available reading is older than the allowed maximum age.
    #[error("Location fix is stale ({age_ms} ms old, max {max_age_ms} ms)")]
    Stale { age_ms: u64, max_age_ms: u64 },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::OutOfRange {
            field: "trackingIntervalMinutes".to_string(),
            min: 1,
            max: 60,
        };
        assert_eq!(
            err.to_string(),
            "trackingIntervalMinutes must be between 1 and 60"
        );

        let err = ValidationError::Required {
            field: "email".to_string(),
        };
        assert_eq!(err.to_string(), "email is required");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let err: CoreError = ValidationError::Required {
            field: "routesUrl".to_string(),
        }
        .into();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn test_capture_error_display() {
        assert_eq!(
            CaptureError::Timeout(15_000).to_string(),
            "Location request timed out after 15000 ms"
        );
        let stale = CaptureError::Stale {
            age_ms: 70_000,
            max_age_ms: 60_000,
        };
        assert!(stale.to_string().contains("70000"));
    }
}
