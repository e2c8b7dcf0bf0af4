//! # Pending Event Repository
//!
//! The pending queue as a per-event keyed collection.
//!
//! ## Why Rows, Not A Document
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  pending_events                                                         │
//! │                                                                         │
//! │  seq │ id (UNIQUE) │ payload (JSON)        │ created_at                 │
//! │  ────┼─────────────┼───────────────────────┼──────────────────────      │
//! │  1   │ 6f1c…       │ {"name": ..., ...}    │ 2024-05-01T10:00:00Z       │
//! │  2   │ 9a0e…       │ {"name": ..., ...}    │ 2024-05-01T10:05:00Z       │
//! │                                                                         │
//! │  foreground: enqueue(c)         ──► INSERT one row                      │
//! │  background: remove_many([a])   ──► DELETE WHERE id = 'a'               │
//! │                                                                         │
//! │  Independent add/remove from the two contexts touch different rows,    │
//! │  so neither can clobber the other.                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tokio::sync::watch;
use tracing::debug;

use trackpoint_core::PendingLocationEvent;

use crate::error::{StorageError, StorageResult};
use crate::pool::notify_queue_write;

/// Raw `pending_events` row.
#[derive(Debug, sqlx::FromRow)]
struct PendingEventRow {
    id: String,
    payload: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<PendingEventRow> for PendingLocationEvent {
    type Error = StorageError;

    fn try_from(row: PendingEventRow) -> Result<Self, Self::Error> {
        Ok(PendingLocationEvent {
            id: row.id,
            payload: serde_json::from_str(&row.payload)?,
            created_at: row.created_at,
        })
    }
}

/// Repository for the shared pending-event queue.
#[derive(Debug, Clone)]
pub struct PendingEventRepository {
    pool: SqlitePool,
    queue_signal: Arc<watch::Sender<u64>>,
}

impl PendingEventRepository {
    pub fn new(pool: SqlitePool, queue_signal: Arc<watch::Sender<u64>>) -> Self {
        PendingEventRepository { pool, queue_signal }
    }

    /// Appends an event to the tail of the queue.
    ///
    /// Fails with `UniqueViolation` if the id is already queued.
    pub async fn enqueue(&self, event: &PendingLocationEvent) -> StorageResult<()> {
        let mut conn = self.pool.acquire().await?;
        insert_event(&mut conn, event).await.map_err(|e| match e {
            StorageError::UniqueViolation { field, .. } => {
                StorageError::duplicate(field, event.id.clone())
            }
            other => other,
        })?;

        debug!(id = %event.id, "Queued location event");
        notify_queue_write(&self.queue_signal);
        Ok(())
    }

    /// Returns every queued event, oldest first.
    pub async fn list(&self) -> StorageResult<Vec<PendingLocationEvent>> {
        let mut conn = self.pool.acquire().await?;
        list_events(&mut conn).await
    }

    /// Returns one queued event.
    pub async fn get(&self, id: &str) -> StorageResult<PendingLocationEvent> {
        let row: Option<PendingEventRow> = sqlx::query_as(
            "SELECT id, payload, created_at FROM pending_events WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| StorageError::not_found("PendingLocationEvent", id))?
            .try_into()
    }

    /// Removes the given ids in one transaction.
    ///
    /// Ids that are not queued are ignored. Returns the number of rows removed.
    pub async fn remove_many(&self, ids: &[String]) -> StorageResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::TransactionFailed(e.to_string()))?;

        let mut removed = 0;
        for id in ids {
            removed += sqlx::query("DELETE FROM pending_events WHERE id = ?1")
                .bind(id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::TransactionFailed(e.to_string()))?;

        debug!(requested = ids.len(), removed, "Removed delivered events");
        if removed > 0 {
            notify_queue_write(&self.queue_signal);
        }
        Ok(removed)
    }

    /// Replaces the whole queue in one transaction.
    pub async fn replace_all(&self, events: &[PendingLocationEvent]) -> StorageResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::TransactionFailed(e.to_string()))?;

        replace_events(&mut tx, events).await?;

        tx.commit()
            .await
            .map_err(|e| StorageError::TransactionFailed(e.to_string()))?;

        notify_queue_write(&self.queue_signal);
        Ok(())
    }

    /// Counts queued events.
    pub async fn count(&self) -> StorageResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pending_events")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

// =============================================================================
// Connection-Level Helpers (usable inside a transaction)
// =============================================================================

pub(crate) async fn insert_event(
    conn: &mut SqliteConnection,
    event: &PendingLocationEvent,
) -> StorageResult<()> {
    let payload = serde_json::to_string(&event.payload)?;

    sqlx::query("INSERT INTO pending_events (id, payload, created_at) VALUES (?1, ?2, ?3)")
        .bind(&event.id)
        .bind(payload)
        .bind(event.created_at)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

pub(crate) async fn list_events(
    conn: &mut SqliteConnection,
) -> StorageResult<Vec<PendingLocationEvent>> {
    let rows: Vec<PendingEventRow> =
        sqlx::query_as("SELECT id, payload, created_at FROM pending_events ORDER BY seq ASC")
            .fetch_all(&mut *conn)
            .await?;

    rows.into_iter().map(PendingLocationEvent::try_from).collect()
}

pub(crate) async fn replace_events(
    conn: &mut SqliteConnection,
    events: &[PendingLocationEvent],
) -> StorageResult<()> {
    sqlx::query("DELETE FROM pending_events")
        .execute(&mut *conn)
        .await?;

    for event in events {
        insert_event(conn, event).await?;
    }
    Ok(())
}
