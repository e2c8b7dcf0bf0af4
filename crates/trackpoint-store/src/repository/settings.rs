//! # Settings Repository
//!
//! Scoped JSON documents: one tracking config and one auth session per
//! execution context.
//!
//! ```text
//! settings
//! scope       │ key    │ value (JSON)
//! ────────────┼────────┼──────────────────────────────────────
//! foreground  │ config │ {"loginUrl": ..., "routesUrl": ...}
//! foreground  │ auth   │ {"token": ..., "userId": ..., ...}
//! background  │ config │ (written only by the config push)
//! background  │ auth   │ (written only by the config push)
//! ```

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use trackpoint_core::{AuthSession, TrackingConfig};

use crate::error::StorageResult;

pub(crate) const CONFIG_KEY: &str = "config";
pub(crate) const AUTH_KEY: &str = "auth";

// =============================================================================
// Store Scope
// =============================================================================

/// Which execution context a document belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreScope {
    /// The visible application.
    Foreground,

    /// Platform-woken delivery context.
    Background,
}

impl StoreScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreScope::Foreground => "foreground",
            StoreScope::Background => "background",
        }
    }
}

impl std::fmt::Display for StoreScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for scoped config and auth documents.
#[derive(Debug, Clone)]
pub struct SettingsRepository {
    pool: SqlitePool,
}

impl SettingsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SettingsRepository { pool }
    }

    /// Returns the stored config, or `None` if the scope was never written.
    pub async fn load_config(&self, scope: StoreScope) -> StorageResult<Option<TrackingConfig>> {
        self.get(scope, CONFIG_KEY).await
    }

    pub async fn save_config(&self, scope: StoreScope, config: &TrackingConfig) -> StorageResult<()> {
        let mut conn = self.pool.acquire().await?;
        put_document(&mut conn, scope, CONFIG_KEY, config).await
    }

    /// Returns the stored session, or `None` when logged out.
    pub async fn load_auth(&self, scope: StoreScope) -> StorageResult<Option<AuthSession>> {
        self.get(scope, AUTH_KEY).await
    }

    pub async fn save_auth(&self, scope: StoreScope, session: &AuthSession) -> StorageResult<()> {
        let mut conn = self.pool.acquire().await?;
        put_document(&mut conn, scope, AUTH_KEY, session).await
    }

    /// Removes the session. Succeeds when none is stored.
    pub async fn clear_auth(&self, scope: StoreScope) -> StorageResult<()> {
        let mut conn = self.pool.acquire().await?;
        delete_document(&mut conn, scope, AUTH_KEY).await
    }

    async fn get<T: DeserializeOwned>(&self, scope: StoreScope, key: &str) -> StorageResult<Option<T>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM settings WHERE scope = ?1 AND key = ?2")
                .bind(scope.as_str())
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        match value {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}

// =============================================================================
// Connection-Level Helpers (usable inside a transaction)
// =============================================================================

pub(crate) async fn put_document<T: Serialize>(
    conn: &mut SqliteConnection,
    scope: StoreScope,
    key: &str,
    value: &T,
) -> StorageResult<()> {
    let json = serde_json::to_string(value)?;

    sqlx::query(
        r#"
        INSERT INTO settings (scope, key, value, updated_at)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT (scope, key) DO UPDATE SET
            value = excluded.value,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(scope.as_str())
    .bind(key)
    .bind(json)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    debug!(scope = %scope, key, "Stored settings document");
    Ok(())
}

pub(crate) async fn delete_document(
    conn: &mut SqliteConnection,
    scope: StoreScope,
    key: &str,
) -> StorageResult<()> {
    sqlx::query("DELETE FROM settings WHERE scope = ?1 AND key = ?2")
        .bind(scope.as_str())
        .bind(key)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};

    fn session(token: &str) -> AuthSession {
        AuthSession {
            token: token.into(),
            user_id: "42".into(),
            username: "ana".into(),
        }
    }

    #[tokio::test]
    async fn test_unwritten_scope_is_empty() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.settings();

        assert!(repo.load_config(StoreScope::Foreground).await.unwrap().is_none());
        assert!(repo.load_auth(StoreScope::Background).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scopes_are_isolated() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.settings();

        let config = TrackingConfig {
            auto_tracking: true,
            ..Default::default()
        };
        repo.save_config(StoreScope::Foreground, &config).await.unwrap();
        repo.save_auth(StoreScope::Foreground, &session("t1")).await.unwrap();

        assert_eq!(
            repo.load_config(StoreScope::Foreground).await.unwrap(),
            Some(config)
        );
        assert!(repo.load_config(StoreScope::Background).await.unwrap().is_none());
        assert!(repo.load_auth(StoreScope::Background).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_overwrites_and_clear_removes() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.settings();

        repo.save_auth(StoreScope::Foreground, &session("old")).await.unwrap();
        repo.save_auth(StoreScope::Foreground, &session("new")).await.unwrap();
        let stored = repo.load_auth(StoreScope::Foreground).await.unwrap().unwrap();
        assert_eq!(stored.token, "new");

        repo.clear_auth(StoreScope::Foreground).await.unwrap();
        assert!(repo.load_auth(StoreScope::Foreground).await.unwrap().is_none());

        // Clearing twice is fine
        repo.clear_auth(StoreScope::Foreground).await.unwrap();
    }
}
