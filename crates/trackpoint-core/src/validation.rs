//! # Validation
//!
//! Checks applied before configuration is persisted, before credentials are
//! sent, and before a captured position becomes an event.
//!
//! ## Example
//! ```rust
//! use trackpoint_core::validation::{validate_coordinates, validate_interval_minutes};
//!
//! assert!(validate_interval_minutes(5).is_ok());
//! assert!(validate_interval_minutes(0).is_err());
//! assert!(validate_coordinates(91.0, 0.0).is_err());
//! ```

use url::Url;

use crate::config::{MAX_TRACKING_INTERVAL_MINUTES, MIN_TRACKING_INTERVAL_MINUTES};
use crate::error::ValidationError;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validates the automatic capture interval (1..=60 minutes).
pub fn validate_interval_minutes(minutes: u32) -> ValidationResult<()> {
    if !(MIN_TRACKING_INTERVAL_MINUTES..=MAX_TRACKING_INTERVAL_MINUTES).contains(&minutes) {
        return Err(ValidationError::OutOfRange {
            field: "trackingIntervalMinutes".to_string(),
            min: MIN_TRACKING_INTERVAL_MINUTES as i64,
            max: MAX_TRACKING_INTERVAL_MINUTES as i64,
        });
    }
    Ok(())
}

/// Validates that `value` is an absolute `http` or `https` URL with a host.
pub fn validate_http_url(field: &str, value: &str) -> ValidationResult<Url> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    let url = Url::parse(value).map_err(|e| ValidationError::InvalidFormat {
        field: field.to_string(),
        reason: e.to_string(),
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }

    if url.host_str().is_none() {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: "missing host".to_string(),
        });
    }

    Ok(url)
}

/// Validates a WGS84 latitude/longitude pair.
pub fn validate_coordinates(latitude: f64, longitude: f64) -> ValidationResult<()> {
    check_component("latitude", latitude, 90.0)?;
    check_component("longitude", longitude, 180.0)
}

fn check_component(field: &str, value: f64, limit: f64) -> ValidationResult<()> {
    if !value.is_finite() || value.abs() > limit {
        return Err(ValidationError::CoordinateOutOfRange {
            field: field.to_string(),
            value,
            limit,
        });
    }
    Ok(())
}

/// Validates login credentials before they are sent.
pub fn validate_credentials(email: &str, password: &str) -> ValidationResult<()> {
    if email.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "email".to_string(),
        });
    }
    if password.is_empty() {
        return Err(ValidationError::Required {
            field: "password".to_string(),
        });
    }
    Ok(())
}
