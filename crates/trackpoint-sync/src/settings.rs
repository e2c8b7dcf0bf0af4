//! # Config Service
//!
//! Read-modify-write of the foreground tracking config, and the push message
//! that copies it to the background context.

use tracing::info;

use trackpoint_core::{BackgroundMessage, ConfigPatch, TrackingConfig};
use trackpoint_store::{Database, StoreScope};

use crate::error::SyncResult;

/// Tracking config management on the foreground scope.
#[derive(Debug, Clone)]
pub struct ConfigService {
    db: Database,
}

impl ConfigService {
    pub fn new(db: Database) -> Self {
        ConfigService { db }
    }

    /// The stored config with defaults for anything never set.
    pub async fn get_config(&self) -> SyncResult<TrackingConfig> {
        Ok(self
            .db
            .settings()
            .load_config(StoreScope::Foreground)
            .await?
            .unwrap_or_default())
    }

    /// Merges `patch` over the stored config, validates, and saves.
    ///
    /// Nothing is written if the merged config is invalid.
    pub async fn update_config(&self, patch: &ConfigPatch) -> SyncResult<TrackingConfig> {
        let merged = self.get_config().await?.merged(patch);
        merged.validate()?;

        self.db
            .settings()
            .save_config(StoreScope::Foreground, &merged)
            .await?;

        info!(
            auto_tracking = merged.auto_tracking,
            interval_minutes = merged.tracking_interval_minutes,
            "Tracking config updated"
        );
        Ok(merged)
    }

    /// Restores the defaults.
    pub async fn reset_config(&self) -> SyncResult<TrackingConfig> {
        let config = TrackingConfig::default();
        self.db
            .settings()
            .save_config(StoreScope::Foreground, &config)
            .await?;

        info!("Tracking config reset to defaults");
        Ok(config)
    }

    /// Push message carrying the current foreground config and session.
    pub async fn background_message(&self) -> SyncResult<BackgroundMessage> {
        let config = self.get_config().await?;
        let auth = self.db.settings().load_auth(StoreScope::Foreground).await?;
        Ok(BackgroundMessage::ConfigUpdate { config, auth })
    }
}
