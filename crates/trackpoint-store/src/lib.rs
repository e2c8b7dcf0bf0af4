//! # trackpoint-store: Persistent Store for TrackPoint
//!
//! The single shared state between the foreground and background execution
//! contexts, on SQLite via sqlx.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        TrackPoint Data Flow                             │
//! │                                                                         │
//! │  ForegroundProducer            SyncTrigger ─► DeliveryEngine            │
//! │       │ enqueue                                │ load / remove_many     │
//! │       ▼                                        ▼                        │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 trackpoint-store (THIS CRATE)                   │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ Settings      │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ PendingEvents │    │ 001_tracking │  │   │
//! │  │   │ queue_writes  │    │ Snapshot      │    │  _store.sql  │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Storage error types
//! - [`repository`] - Settings and pending-event repositories
//! - [`snapshot`] - Whole-document `load`/`save` and the config push
//!
//! ## Usage
//!
//! ```rust,ignore
//! use trackpoint_store::{Database, DbConfig, StoreScope};
//!
//! let db = Database::new(DbConfig::new("trackpoint.db")).await?;
//! let snapshot = db.load(StoreScope::Background).await?;
//! db.pending_events().remove_many(&delivered_ids).await?;
//! ```

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod snapshot;

pub use error::{StorageError, StorageResult};
pub use pool::{Database, DbConfig};
pub use repository::pending::PendingEventRepository;
pub use repository::settings::{SettingsRepository, StoreScope};
pub use snapshot::Snapshot;
