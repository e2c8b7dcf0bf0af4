//! # Tracking Configuration
//!
//! The user-facing tracking settings: endpoints, auto-tracking toggle and
//! capture interval.
//!
//! ## Copies
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  One logical config, two physical copies                               │
//! │                                                                         │
//! │  foreground scope ── update_config(patch) / reset_config()             │
//! │        │                                                                │
//! │        │ BackgroundMessage::ConfigUpdate (explicit push, never pulled) │
//! │        ▼                                                                │
//! │  background scope ── read by drains and wake-time captures             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::validation::{validate_http_url, validate_interval_minutes, ValidationResult};

/// Default login endpoint.
pub const DEFAULT_LOGIN_URL: &str = "http://localhost:5000/api/login";

/// Default route ingestion endpoint.
pub const DEFAULT_ROUTES_URL: &str = "http://localhost:5000/api/routes";

/// Default interval between automatic captures.
pub const DEFAULT_TRACKING_INTERVAL_MINUTES: u32 = 5;

/// Bounds for `tracking_interval_minutes`.
pub const MIN_TRACKING_INTERVAL_MINUTES: u32 = 1;
pub const MAX_TRACKING_INTERVAL_MINUTES: u32 = 60;

// =============================================================================
// Tracking Config
// =============================================================================

/// Tracking settings.
///
/// Fields missing from a stored document deserialize to their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase", default)]
#[ts(export)]
pub struct TrackingConfig {
    pub login_url: String,
    pub routes_url: String,
    pub auto_tracking: bool,
    pub tracking_interval_minutes: u32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        TrackingConfig {
            login_url: DEFAULT_LOGIN_URL.to_string(),
            routes_url: DEFAULT_ROUTES_URL.to_string(),
            auto_tracking: false,
            tracking_interval_minutes: DEFAULT_TRACKING_INTERVAL_MINUTES,
        }
    }
}

impl TrackingConfig {
    /// Returns a copy with every field present in `patch` replaced.
    pub fn merged(&self, patch: &ConfigPatch) -> Self {
        TrackingConfig {
            login_url: patch
                .login_url
                .clone()
                .unwrap_or_else(|| self.login_url.clone()),
            routes_url: patch
                .routes_url
                .clone()
                .unwrap_or_else(|| self.routes_url.clone()),
            auto_tracking: patch.auto_tracking.unwrap_or(self.auto_tracking),
            tracking_interval_minutes: patch
                .tracking_interval_minutes
                .unwrap_or(self.tracking_interval_minutes),
        }
    }

    /// Checks the interval bounds and that both endpoints are absolute http(s) URLs.
    pub fn validate(&self) -> ValidationResult<()> {
        validate_http_url("loginUrl", &self.login_url)?;
        validate_http_url("routesUrl", &self.routes_url)?;
        validate_interval_minutes(self.tracking_interval_minutes)?;
        Ok(())
    }
}

// =============================================================================
// Config Patch
// =============================================================================

/// Partial update for [`TrackingConfig`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigPatch {
    pub login_url: Option<String>,
    pub routes_url: Option<String>,
    pub auto_tracking: Option<bool>,
    pub tracking_interval_minutes: Option<u32>,
}

impl ConfigPatch {
    pub fn is_empty(&self) -> bool {
        self.login_url.is_none()
            && self.routes_url.is_none()
            && self.auto_tracking.is_none()
            && self.tracking_interval_minutes.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TrackingConfig::default();
        assert_eq!(config.routes_url, "http://localhost:5000/api/routes");
        assert!(!config.auto_tracking);
        assert_eq!(config.tracking_interval_minutes, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_merge_keeps_untouched_fields() {
        let base = TrackingConfig {
            routes_url: "https://ingest.example.com/api/routes".into(),
            ..Default::default()
        };
        let patch = ConfigPatch {
            auto_tracking: Some(true),
            ..Default::default()
        };

        let merged = base.merged(&patch);
        assert!(merged.auto_tracking);
        assert_eq!(merged.routes_url, base.routes_url);
        assert_eq!(merged.login_url, base.login_url);
        assert_eq!(merged.tracking_interval_minutes, 5);
    }

    #[test]
    fn test_partial_document_fills_defaults() {
        let config: TrackingConfig =
            serde_json::from_str(r#"{"autoTracking": true}"#).unwrap();
        assert!(config.auto_tracking);
        assert_eq!(config.login_url, DEFAULT_LOGIN_URL);
        assert_eq!(config.tracking_interval_minutes, 5);
    }

    #[test]
    fn test_validate_interval_bounds() {
        let mut config = TrackingConfig::default();
        config.tracking_interval_minutes = 0;
        assert!(config.validate().is_err());
        config.tracking_interval_minutes = 61;
        assert!(config.validate().is_err());
        config.tracking_interval_minutes = 60;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_patch_wire_names() {
        let patch: ConfigPatch =
            serde_json::from_str(r#"{"trackingIntervalMinutes": 10}"#).unwrap();
        assert_eq!(patch.tracking_interval_minutes, Some(10));
        assert!(!patch.is_empty());
        assert!(ConfigPatch::default().is_empty());
    }
}
