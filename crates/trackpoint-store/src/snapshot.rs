//! # Whole-Document Snapshots
//!
//! `load`/`save` view one execution context's state as a single document:
//! its config, its auth session and the shared pending queue.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Snapshot (scope = Background)                                          │
//! │                                                                         │
//! │  config ◄── settings[background, config]   (default if never written)  │
//! │  auth   ◄── settings[background, auth]     (None if never written)     │
//! │  queue  ◄── pending_events ORDER BY seq    (shared by both scopes)     │
//! │                                                                         │
//! │  save(scope, snapshot): one transaction, last writer wins              │
//! │  apply_message(ConfigUpdate): config + auth only, queue untouched      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use tracing::{debug, info};

use trackpoint_core::{AuthSession, BackgroundMessage, PendingLocationEvent, TrackingConfig};

use crate::error::{StorageError, StorageResult};
use crate::pool::Database;
use crate::repository::pending::{list_events, replace_events};
use crate::repository::settings::{
    delete_document, put_document, StoreScope, AUTH_KEY, CONFIG_KEY,
};

/// One context's view of the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub config: TrackingConfig,
    pub auth: Option<AuthSession>,
    pub queue: Vec<PendingLocationEvent>,
}

impl Snapshot {
    /// The bearer token, if a usable session is stored.
    pub fn token(&self) -> Option<&str> {
        self.auth.as_ref().and_then(AuthSession::bearer)
    }
}

impl Database {
    /// Reads a consistent snapshot for `scope`.
    ///
    /// Missing documents are filled with defaults.
    pub async fn load(&self, scope: StoreScope) -> StorageResult<Snapshot> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| StorageError::TransactionFailed(e.to_string()))?;

        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM settings WHERE scope = ?1")
                .bind(scope.as_str())
                .fetch_all(&mut *tx)
                .await?;

        let mut snapshot = Snapshot::default();
        for (key, value) in rows {
            match key.as_str() {
                CONFIG_KEY => snapshot.config = serde_json::from_str(&value)?,
                AUTH_KEY => snapshot.auth = Some(serde_json::from_str(&value)?),
                _ => {}
            }
        }
        snapshot.queue = list_events(&mut tx).await?;

        tx.commit()
            .await
            .map_err(|e| StorageError::TransactionFailed(e.to_string()))?;

        debug!(
            scope = %scope,
            queued = snapshot.queue.len(),
            authenticated = snapshot.token().is_some(),
            "Loaded snapshot"
        );
        Ok(snapshot)
    }

    /// Writes a full snapshot for `scope` atomically.
    ///
    /// The queue is replaced wholesale; no merge with concurrent writers.
    pub async fn save(&self, scope: StoreScope, snapshot: &Snapshot) -> StorageResult<()> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| StorageError::TransactionFailed(e.to_string()))?;

        put_document(&mut tx, scope, CONFIG_KEY, &snapshot.config).await?;
        match &snapshot.auth {
            Some(session) => put_document(&mut tx, scope, AUTH_KEY, session).await?,
            None => delete_document(&mut tx, scope, AUTH_KEY).await?,
        }
        replace_events(&mut tx, &snapshot.queue).await?;

        tx.commit()
            .await
            .map_err(|e| StorageError::TransactionFailed(e.to_string()))?;

        self.notify_queue_write();
        debug!(scope = %scope, queued = snapshot.queue.len(), "Saved snapshot");
        Ok(())
    }

    /// Applies a foreground push to the background scope.
    pub async fn apply_message(&self, message: &BackgroundMessage) -> StorageResult<()> {
        match message {
            BackgroundMessage::ConfigUpdate { config, auth } => {
                let scope = StoreScope::Background;
                let mut tx = self
                    .pool()
                    .begin()
                    .await
                    .map_err(|e| StorageError::TransactionFailed(e.to_string()))?;

                put_document(&mut tx, scope, CONFIG_KEY, config).await?;
                match auth {
                    Some(session) => put_document(&mut tx, scope, AUTH_KEY, session).await?,
                    None => delete_document(&mut tx, scope, AUTH_KEY).await?,
                }

                tx.commit()
                    .await
                    .map_err(|e| StorageError::TransactionFailed(e.to_string()))?;

                info!(
                    authenticated = auth.is_some(),
                    auto_tracking = config.auto_tracking,
                    "Applied config update to background scope"
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DbConfig;
    use chrono::Utc;
    use trackpoint_core::{Coordinate, RoutePayload};

    fn event(name: &str) -> PendingLocationEvent {
        PendingLocationEvent::new(RoutePayload {
            name: name.to_string(),
            coordinates: vec![Coordinate {
                latitude: 1.0,
                longitude: 2.0,
                timestamp: Utc::now(),
            }],
            distance: 0.0,
        })
    }

    fn session() -> AuthSession {
        AuthSession {
            token: "tok".into(),
            user_id: "7".into(),
            username: "ana".into(),
        }
    }

    #[tokio::test]
    async fn test_load_empty_store_returns_defaults() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let snapshot = db.load(StoreScope::Background).await.unwrap();

        assert_eq!(snapshot, Snapshot::default());
        assert!(snapshot.token().is_none());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let snapshot = Snapshot {
            config: TrackingConfig {
                auto_tracking: true,
                tracking_interval_minutes: 15,
                ..Default::default()
            },
            auth: Some(session()),
            queue: vec![event("a"), event("b")],
        };

        db.save(StoreScope::Foreground, &snapshot).await.unwrap();
        assert_eq!(db.load(StoreScope::Foreground).await.unwrap(), snapshot);

        // Background sees the shared queue but not the foreground documents
        let background = db.load(StoreScope::Background).await.unwrap();
        assert_eq!(background.queue, snapshot.queue);
        assert_eq!(background.config, TrackingConfig::default());
        assert!(background.auth.is_none());
    }

    #[tokio::test]
    async fn test_last_writer_wins() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let first = Snapshot {
            auth: Some(session()),
            queue: vec![event("a")],
            ..Default::default()
        };
        let second = Snapshot {
            queue: vec![event("b")],
            ..Default::default()
        };

        db.save(StoreScope::Foreground, &first).await.unwrap();
        db.save(StoreScope::Foreground, &second).await.unwrap();

        assert_eq!(db.load(StoreScope::Foreground).await.unwrap(), second);
    }

    #[tokio::test]
    async fn test_apply_message_leaves_queue_untouched() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let queued = event("a");
        db.pending_events().enqueue(&queued).await.unwrap();

        let config = TrackingConfig {
            routes_url: "https://ingest.example.com/api/routes".into(),
            ..Default::default()
        };
        db.apply_message(&BackgroundMessage::ConfigUpdate {
            config: config.clone(),
            auth: Some(session()),
        })
        .await
        .unwrap();

        let background = db.load(StoreScope::Background).await.unwrap();
        assert_eq!(background.config, config);
        assert_eq!(background.token(), Some("tok"));
        assert_eq!(background.queue, vec![queued]);

        // A push without auth logs the background context out
        db.apply_message(&BackgroundMessage::ConfigUpdate {
            config,
            auth: None,
        })
        .await
        .unwrap();
        assert!(db.load(StoreScope::Background).await.unwrap().auth.is_none());
    }
}
