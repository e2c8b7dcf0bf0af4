//! # Agent Configuration
//!
//! Process-level settings for the TrackPoint agent. These are distinct from
//! the user-facing [`TrackingConfig`](trackpoint_core::TrackingConfig), which
//! lives in the store and is managed by the config service.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TRACKPOINT_DB_PATH=/var/lib/trackpoint/trackpoint.db               │
//! │     TRACKPOINT_ROUTES_URL=https://ingest.example.com/api/routes        │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/trackpoint/agent.toml (Linux)                            │
//! │     ~/Library/Application Support/dev.trackpoint.agent/agent.toml      │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [store]
//! path = "/var/lib/trackpoint/trackpoint.db"
//!
//! [delivery]
//! request_timeout_secs = 8
//!
//! [triggers]
//! connectivity_signal = false
//! periodic_wake = true
//! keep_alive = true
//! probe_interval_secs = 30
//!
//! [location]
//! source = "file"
//! path = "/run/gpsd/fix.json"
//!
//! [account]
//! email = "driver@example.com"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use trackpoint_core::validation::{validate_coordinates, validate_http_url};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Store Settings
// =============================================================================

/// Where the SQLite store lives.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Database file. Defaults to the platform data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

// =============================================================================
// Delivery Settings
// =============================================================================

/// HTTP delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliverySettings {
    /// Per-request timeout (seconds). Bounds every login and route POST.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    8
}

impl Default for DeliverySettings {
    fn default() -> Self {
        DeliverySettings {
            request_timeout_secs: default_request_timeout(),
        }
    }
}

// =============================================================================
// Trigger Settings
// =============================================================================

/// Which wake primitives the local platform offers, and how connectivity is probed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerSettings {
    /// Offer the one-shot "connectivity restored" registration.
    ///
    /// It fires only on an Offline/Unknown to Online transition, so a queue
    /// that fails against a reachable server waits for the next transition.
    #[serde(default)]
    pub connectivity_signal: bool,

    /// Offer periodic wakes.
    #[serde(default = "default_true")]
    pub periodic_wake: bool,

    /// Offer a keep-alive resource for the timer fallback.
    #[serde(default = "default_true")]
    pub keep_alive: bool,

    /// Interval between connectivity probes (seconds).
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,

    /// Timeout of one connectivity probe (seconds).
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    /// `host:port` to probe. Derived from the routes URL when unset.
    #[serde(default)]
    pub probe_target: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_probe_interval() -> u64 {
    30
}

fn default_probe_timeout() -> u64 {
    3
}

impl Default for TriggerSettings {
    fn default() -> Self {
        TriggerSettings {
            connectivity_signal: false,
            periodic_wake: true,
            keep_alive: true,
            probe_interval_secs: default_probe_interval(),
            probe_timeout_secs: default_probe_timeout(),
            probe_target: None,
        }
    }
}

// =============================================================================
// Location Settings
// =============================================================================

/// Source of position readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationSource {
    /// Static coordinates from this config.
    #[default]
    Fixed,

    /// JSON fix file written by an external GPS daemon.
    File,
}

impl std::fmt::Display for LocationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LocationSource::Fixed => write!(f, "fixed"),
            LocationSource::File => write!(f, "file"),
        }
    }
}

impl std::str::FromStr for LocationSource {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fixed" | "static" => Ok(LocationSource::Fixed),
            "file" | "gpsd" => Ok(LocationSource::File),
            other => Err(SyncError::InvalidConfig(format!(
                "Unknown location source: '{}'. Valid options: fixed, file",
                other
            ))),
        }
    }
}

/// Location provider settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocationSettings {
    #[serde(default)]
    pub source: LocationSource,

    /// Used by the fixed source.
    #[serde(default)]
    pub latitude: f64,

    /// Used by the fixed source.
    #[serde(default)]
    pub longitude: f64,

    /// Fix file for the file source.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

// =============================================================================
// Account / Notifications / Seed
// =============================================================================

/// Credentials used to log in at startup when no session is stored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountSettings {
    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub password: Option<String>,
}

impl AccountSettings {
    /// Returns `(email, password)` when both are configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.email, &self.password) {
            (Some(email), Some(password)) => Some((email.as_str(), password.as_str())),
            _ => None,
        }
    }
}

/// Sync notification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationSettings {
    /// Emit "synced N locations" notifications.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        NotificationSettings { enabled: true }
    }
}

/// Endpoint values written into the stored tracking config at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedSettings {
    #[serde(default)]
    pub login_url: Option<String>,

    #[serde(default)]
    pub routes_url: Option<String>,
}

// =============================================================================
// Main Agent Configuration
// =============================================================================

/// Complete agent configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default)]
    pub delivery: DeliverySettings,

    #[serde(default)]
    pub triggers: TriggerSettings,

    #[serde(default)]
    pub location: LocationSettings,

    #[serde(default)]
    pub account: AccountSettings,

    #[serde(default)]
    pub notifications: NotificationSettings,

    #[serde(default)]
    pub seed: SeedSettings,
}

impl AgentConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (agent.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading agent config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load agent config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Agent config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if !(1..=60).contains(&self.delivery.request_timeout_secs) {
            return Err(SyncError::InvalidConfig(
                "request_timeout_secs must be between 1 and 60".into(),
            ));
        }

        if self.triggers.probe_interval_secs == 0 || self.triggers.probe_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "probe intervals must be greater than 0".into(),
            ));
        }

        if let Some(ref target) = self.triggers.probe_target {
            parse_host_port(target)?;
        }

        match self.location.source {
            LocationSource::Fixed => {
                validate_coordinates(self.location.latitude, self.location.longitude)?;
            }
            LocationSource::File => {
                if self.location.path.is_none() {
                    return Err(SyncError::InvalidConfig(
                        "location.path is required for the file source".into(),
                    ));
                }
            }
        }

        if let Some(ref url) = self.seed.login_url {
            validate_http_url("loginUrl", url)?;
        }
        if let Some(ref url) = self.seed.routes_url {
            validate_http_url("routesUrl", url)?;
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("TRACKPOINT_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.store.path = Some(PathBuf::from(path));
        }

        if let Ok(timeout) = std::env::var("TRACKPOINT_REQUEST_TIMEOUT_SECS") {
            match timeout.parse::<u64>() {
                Ok(secs) => self.delivery.request_timeout_secs = secs,
                Err(_) => warn!(value = %timeout, "Ignoring invalid TRACKPOINT_REQUEST_TIMEOUT_SECS"),
            }
        }

        if let Ok(email) = std::env::var("TRACKPOINT_EMAIL") {
            self.account.email = Some(email);
        }

        if let Ok(password) = std::env::var("TRACKPOINT_PASSWORD") {
            self.account.password = Some(password);
        }

        if let Ok(url) = std::env::var("TRACKPOINT_LOGIN_URL") {
            debug!(url = %url, "Overriding login URL from environment");
            self.seed.login_url = Some(url);
        }

        if let Ok(url) = std::env::var("TRACKPOINT_ROUTES_URL") {
            debug!(url = %url, "Overriding routes URL from environment");
            self.seed.routes_url = Some(url);
        }

        if let Ok(path) = std::env::var("TRACKPOINT_LOCATION_FILE") {
            self.location.source = LocationSource::File;
            self.location.path = Some(PathBuf::from(path));
        }

        if let Ok(target) = std::env::var("TRACKPOINT_PROBE_TARGET") {
            self.triggers.probe_target = Some(target);
        }
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("dev", "trackpoint", "agent")
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("agent.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Resolved database path: configured, or `<data dir>/trackpoint.db`.
    pub fn database_path(&self) -> SyncResult<PathBuf> {
        if let Some(ref path) = self.store.path {
            return Ok(path.clone());
        }
        Self::project_dirs()
            .map(|dirs| dirs.data_dir().join("trackpoint.db"))
            .ok_or_else(|| SyncError::InvalidConfig("No data directory available".into()))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery.request_timeout_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.triggers.probe_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.triggers.probe_timeout_secs)
    }
}

/// Splits `host:port`, rejecting a missing or non-numeric port.
pub(crate) fn parse_host_port(target: &str) -> SyncResult<(String, u16)> {
    let (host, port) = target
        .rsplit_once(':')
        .ok_or_else(|| SyncError::InvalidUrl(format!("expected host:port, got '{}'", target)))?;
    let port = port
        .parse::<u16>()
        .map_err(|_| SyncError::InvalidUrl(format!("invalid port in '{}'", target)))?;
    if host.is_empty() {
        return Err(SyncError::InvalidUrl(format!("missing host in '{}'", target)));
    }
    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AgentConfig::default();
        assert_eq!(config.delivery.request_timeout_secs, 8);
        assert!(!config.triggers.connectivity_signal);
        assert!(config.triggers.periodic_wake);
        assert!(config.notifications.enabled);
        assert_eq!(config.location.source, LocationSource::Fixed);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AgentConfig::default();

        config.delivery.request_timeout_secs = 0;
        assert!(config.validate().is_err());
        config.delivery.request_timeout_secs = 5;

        config.location.source = LocationSource::File;
        assert!(config.validate().is_err());
        config.location.path = Some(PathBuf::from("/tmp/fix.json"));
        assert!(config.validate().is_ok());

        config.seed.routes_url = Some("not a url".into());
        assert!(config.validate().is_err());
        config.seed.routes_url = Some("http://10.0.0.2:5000/api/routes".into());
        assert!(config.validate().is_ok());

        config.triggers.probe_target = Some("example.com".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_location_source_parsing() {
        assert_eq!("fixed".parse::<LocationSource>().unwrap(), LocationSource::Fixed);
        assert_eq!("GPSD".parse::<LocationSource>().unwrap(), LocationSource::File);
        assert!("satellite".parse::<LocationSource>().is_err());
    }

    #[test]
    fn test_parse_host_port() {
        assert_eq!(
            parse_host_port("10.0.0.2:5000").unwrap(),
            ("10.0.0.2".to_string(), 5000)
        );
        assert!(parse_host_port(":80").is_err());
        assert!(parse_host_port("host:http").is_err());
    }

    #[test]
    fn test_credentials_require_both_fields() {
        let mut account = AccountSettings {
            email: Some("a@b.c".into()),
            password: None,
        };
        assert!(account.credentials().is_none());
        account.password = Some("pw".into());
        assert_eq!(account.credentials(), Some(("a@b.c", "pw")));
    }

    #[test]
    fn test_toml_serialization() {
        let mut config = AgentConfig::default();
        config.triggers.connectivity_signal = true;
        config.location.latitude = -34.6;

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AgentConfig = toml::from_str(&toml_str).unwrap();

        assert!(parsed.triggers.connectivity_signal);
        assert_eq!(parsed.location.latitude, -34.6);
        assert_eq!(parsed.delivery.request_timeout_secs, 8);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: AgentConfig = toml::from_str("[delivery]\nrequest_timeout_secs = 3\n").unwrap();
        assert_eq!(parsed.delivery.request_timeout_secs, 3);
        assert_eq!(parsed.triggers.probe_interval_secs, 30);
    }
}
