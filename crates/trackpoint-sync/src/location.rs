//! # Location Providers
//!
//! Position sources for the producers. A capture is one reading under a
//! [`CaptureOptions`] budget: it either yields a fresh, valid position or a
//! [`CaptureError`].

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use trackpoint_core::validation::validate_coordinates;
use trackpoint_core::{CaptureError, CaptureOptions, Position};

/// A source of position readings.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn current_position(&self, options: &CaptureOptions) -> Result<Position, CaptureError>;
}

/// Takes one reading, bounded by `options.timeout`, and validates it.
pub async fn capture(
    provider: &dyn LocationProvider,
    options: &CaptureOptions,
) -> Result<Position, CaptureError> {
    let position = tokio::time::timeout(options.timeout, provider.current_position(options))
        .await
        .map_err(|_| CaptureError::Timeout(options.timeout.as_millis() as u64))??;

    validate_coordinates(position.latitude, position.longitude)
        .map_err(|e| CaptureError::Unavailable(e.to_string()))?;

    debug!(
        latitude = position.latitude,
        longitude = position.longitude,
        accuracy_m = ?position.accuracy_m,
        "Captured position"
    );
    Ok(position)
}

// =============================================================================
// Fixed Provider
// =============================================================================

/// Static coordinates, stamped with the capture time.
#[derive(Debug, Clone)]
pub struct FixedLocationProvider {
    latitude: f64,
    longitude: f64,
    enabled: bool,
}

impl FixedLocationProvider {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        FixedLocationProvider {
            latitude,
            longitude,
            enabled: true,
        }
    }

    /// A provider whose every capture is denied.
    pub fn denied() -> Self {
        FixedLocationProvider {
            latitude: 0.0,
            longitude: 0.0,
            enabled: false,
        }
    }
}

#[async_trait]
impl LocationProvider for FixedLocationProvider {
    async fn current_position(&self, _options: &CaptureOptions) -> Result<Position, CaptureError> {
        if !self.enabled {
            return Err(CaptureError::PermissionDenied);
        }
        Ok(Position {
            latitude: self.latitude,
            longitude: self.longitude,
            accuracy_m: None,
            captured_at: Utc::now(),
        })
    }
}

// =============================================================================
// File Provider
// =============================================================================

/// Fix file contents written by a GPS daemon.
#[derive(Debug, Deserialize)]
struct FixDocument {
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    accuracy: Option<f64>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

/// Reads the latest fix from a JSON file.
///
/// The fix time is the document's `timestamp`, else the file mtime.
#[derive(Debug, Clone)]
pub struct FileLocationProvider {
    path: PathBuf,
}

impl FileLocationProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileLocationProvider { path: path.into() }
    }
}

#[async_trait]
impl LocationProvider for FileLocationProvider {
    async fn current_position(&self, options: &CaptureOptions) -> Result<Position, CaptureError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(CaptureError::PermissionDenied)
            }
            Err(e) => {
                return Err(CaptureError::Unavailable(format!(
                    "{}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        let fix: FixDocument = serde_json::from_str(&contents)
            .map_err(|e| CaptureError::Unavailable(format!("malformed fix: {}", e)))?;

        let captured_at = match fix.timestamp {
            Some(ts) => ts,
            None => {
                let modified = tokio::fs::metadata(&self.path)
                    .await
                    .and_then(|m| m.modified())
                    .map_err(|e| CaptureError::Unavailable(e.to_string()))?;
                DateTime::<Utc>::from(modified)
            }
        };

        let age = Utc::now()
            .signed_duration_since(captured_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        if age > options.maximum_age {
            return Err(CaptureError::Stale {
                age_ms: age.as_millis() as u64,
                max_age_ms: options.maximum_age.as_millis() as u64,
            });
        }

        Ok(Position {
            latitude: fix.latitude,
            longitude: fix.longitude,
            accuracy_m: fix.accuracy,
            captured_at,
        })
    }
}
