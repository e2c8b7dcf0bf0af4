//! # Store Handle
//!
//! Opens the tracking store and hands out repositories.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Tracking Store                                 │
//! │                                                                         │
//! │  DbConfig::new(path) ──► Database::new(config).await                    │
//! │                               │   (open/create file, migrate)           │
//! │                               │                                         │
//! │       ├──► db.settings()        foreground/background documents        │
//! │       ├──► db.pending_events()  keyed queue, shared by both contexts   │
//! │       └──► db.queue_writes()    watch counter bumped on queue writes   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The foreground producer and the background drain write the same file
//! concurrently, so connections wait on a locked database for
//! [`DbConfig::busy_timeout`] instead of failing immediately.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::migrations;
use crate::repository::pending::PendingEventRepository;
use crate::repository::settings::SettingsRepository;

// =============================================================================
// Configuration
// =============================================================================

/// How to open the store.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub database_path: PathBuf,

    /// Default: 4
    pub max_connections: u32,

    /// How long a statement waits for a lock held by the other context.
    /// Default: 5 seconds
    pub busy_timeout: Duration,

    /// Default: true
    pub run_migrations: bool,
}

impl DbConfig {
    /// Store at `path`; the file is created if missing.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 4,
            busy_timeout: Duration::from_secs(5),
            run_migrations: true,
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    /// Private in-memory store for tests.
    pub fn in_memory() -> Self {
        DbConfig {
            database_path: PathBuf::from(":memory:"),
            // Every connection to :memory: is a separate database
            max_connections: 1,
            busy_timeout: Duration::from_secs(1),
            run_migrations: true,
        }
    }
}

// =============================================================================
// Database
// =============================================================================

/// Handle to the tracking store.
///
/// Clones share the pool and the queue-write signal, so the foreground and
/// background contexts in one process observe each other's queue writes.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,

    /// Bumped after every committed write to `pending_events`.
    queue_signal: Arc<watch::Sender<u64>>,
}

impl Database {
    /// Opens (or creates) the store and applies pending migrations.
    pub async fn new(config: DbConfig) -> StorageResult<Self> {
        info!(path = %config.database_path.display(), "Opening tracking store");

        let connect_options =
            SqliteConnectOptions::from_str(&format!("sqlite://{}", config.database_path.display()))
                .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal)
                .busy_timeout(config.busy_timeout)
                .foreign_keys(true)
                .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(connect_options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;
        debug!(max_connections = config.max_connections, "Store pool ready");

        let (queue_signal, _) = watch::channel(0u64);
        let db = Database {
            pool,
            queue_signal: Arc::new(queue_signal),
        };

        if config.run_migrations {
            migrations::run_migrations(&db.pool).await?;
        }

        Ok(db)
    }

    /// Returns `(total, applied)` migration counts.
    pub async fn migration_status(&self) -> StorageResult<(usize, usize)> {
        migrations::migration_status(&self.pool).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Config and auth documents, per scope.
    pub fn settings(&self) -> SettingsRepository {
        SettingsRepository::new(self.pool.clone())
    }

    /// The shared pending-event queue.
    pub fn pending_events(&self) -> PendingEventRepository {
        PendingEventRepository::new(self.pool.clone(), self.queue_signal.clone())
    }

    /// Subscribes to queue writes.
    ///
    /// The value is a counter; any change means the queue was written since
    /// the last observation.
    pub fn queue_writes(&self) -> watch::Receiver<u64> {
        self.queue_signal.subscribe()
    }

    pub(crate) fn notify_queue_write(&self) {
        notify_queue_write(&self.queue_signal);
    }

    /// True when the store answers a trivial query.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    /// Closes the pool. Later repository calls fail with a connection error.
    pub async fn close(&self) {
        info!("Closing tracking store");
        self.pool.close().await;
    }
}

pub(crate) fn notify_queue_write(signal: &watch::Sender<u64>) {
    signal.send_modify(|n| *n = n.wrapping_add(1));
}
