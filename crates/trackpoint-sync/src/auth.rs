//! # Auth Service
//!
//! Login and logout for the foreground context. The background context only
//! learns about a session through the config push.

use tracing::info;

use trackpoint_core::validation::validate_credentials;
use trackpoint_core::{AuthSession, LoginCredentials};
use trackpoint_store::{Database, StoreScope};

use crate::client::RouteClient;
use crate::error::SyncResult;

/// Session management on the foreground scope.
#[derive(Debug, Clone)]
pub struct AuthService {
    db: Database,
    client: RouteClient,
}

impl AuthService {
    pub fn new(db: Database, client: RouteClient) -> Self {
        AuthService { db, client }
    }

    /// Logs in against the configured `login_url` and stores the session.
    pub async fn login(&self, email: &str, password: &str) -> SyncResult<AuthSession> {
        validate_credentials(email, password)?;

        let config = self
            .db
            .settings()
            .load_config(StoreScope::Foreground)
            .await?
            .unwrap_or_default();

        let session = self
            .client
            .login(
                &config.login_url,
                &LoginCredentials {
                    email: email.to_string(),
                    password: password.to_string(),
                },
            )
            .await?;

        self.db
            .settings()
            .save_auth(StoreScope::Foreground, &session)
            .await?;

        info!(username = %session.username, "Logged in");
        Ok(session)
    }

    /// Drops the stored session. Succeeds when already logged out.
    pub async fn logout(&self) -> SyncResult<()> {
        self.db.settings().clear_auth(StoreScope::Foreground).await?;
        info!("Logged out");
        Ok(())
    }

    pub async fn current_session(&self) -> SyncResult<Option<AuthSession>> {
        Ok(self.db.settings().load_auth(StoreScope::Foreground).await?)
    }

    pub async fn is_authenticated(&self) -> SyncResult<bool> {
        Ok(self.token().await?.is_some())
    }

    pub async fn token(&self) -> SyncResult<Option<String>> {
        Ok(self
            .current_session()
            .await?
            .and_then(|s| s.bearer().map(str::to_string)))
    }
}
