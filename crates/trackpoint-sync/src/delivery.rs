//! # Delivery Engine
//!
//! Drains the pending queue against the route endpoint.
//!
//! ## Drain
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            drain_queue()                                │
//! │                                                                         │
//! │  1. load(Background) ──► { config, auth, queue }   (one snapshot)      │
//! │  2. no token?        ──► return queue unchanged, zero requests         │
//! │  3. send_one(e) for every e in queue, concurrently, all-settled       │
//! │         a ── 200 ──► succeeded                                         │
//! │         b ── 500 ──► kept                                              │
//! │         c ── timeout ► kept                                            │
//! │  4. remaining = queue − succeeded   (relative order kept)              │
//! │  5. remove_many(succeeded)          (one transaction)                  │
//! │  6. succeeded > 0 ──► "Synced N location(s)" (if permitted)            │
//! │     (5 and 6 hold an ApplyPermit; a stopped run skips both)            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## At-Least-Once
//! A crash between a 2xx and step 5 resends the event on the next drain.
//! Requests carry no deduplication key.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::{OwnedRwLockReadGuard, RwLock};
use tracing::{debug, info, warn};

use trackpoint_core::{DrainOutcome, PendingLocationEvent, RoutePayload, TrackingConfig};
use trackpoint_store::{Database, Snapshot, StoreScope};

use crate::client::RouteClient;
use crate::error::{SyncError, SyncResult};
use crate::notify::{notify_if_permitted, NoOpNotifier, Notification, SyncNotifier};

// =============================================================================
// Delivery Target
// =============================================================================

/// Where and as whom to deliver. Fixed for the duration of one drain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryTarget {
    pub routes_url: String,
    pub token: Option<String>,
}

impl DeliveryTarget {
    pub fn new(config: &TrackingConfig, token: Option<&str>) -> Self {
        DeliveryTarget {
            routes_url: config.routes_url.clone(),
            token: token.map(str::to_string),
        }
    }

    fn from_snapshot(snapshot: &Snapshot) -> Self {
        Self::new(&snapshot.config, snapshot.token())
    }
}

// =============================================================================
// Run Guard
// =============================================================================

/// Epoch owned by one trigger instance; bumped on stop.
///
/// A drain applies its result (queue removal and notification) while
/// holding an [`ApplyPermit`]. [`invalidate`](Self::invalidate) waits for
/// in-progress applies, so once it returns no stale drain can touch the
/// queue or notify.
#[derive(Debug, Clone, Default)]
pub struct RunEpoch {
    counter: Arc<AtomicU64>,
    apply: Arc<RwLock<()>>,
}

impl RunEpoch {
    /// A guard valid until the next [`invalidate`](Self::invalidate).
    pub fn guard(&self) -> RunGuard {
        RunGuard {
            epoch: Some(self.clone()),
            issued: self.counter.load(Ordering::SeqCst),
        }
    }

    /// Makes every outstanding guard stale.
    pub async fn invalidate(&self) {
        let _exclusive = self.apply.write().await;
        self.counter.fetch_add(1, Ordering::SeqCst);
    }
}

/// Tells a drain whether the run that started it is still active.
#[derive(Debug, Clone)]
pub struct RunGuard {
    epoch: Option<RunEpoch>,
    issued: u64,
}

/// Held while a drain applies its result. Blocks invalidation until dropped.
#[derive(Debug)]
pub struct ApplyPermit {
    _shared: Option<OwnedRwLockReadGuard<()>>,
}

impl RunGuard {
    /// A guard that never goes stale.
    pub fn detached() -> Self {
        RunGuard {
            epoch: None,
            issued: 0,
        }
    }

    pub fn is_current(&self) -> bool {
        match &self.epoch {
            Some(epoch) => epoch.counter.load(Ordering::SeqCst) == self.issued,
            None => true,
        }
    }

    /// Permit to apply a drain result, or `None` when the run has ended.
    pub async fn begin_apply(&self) -> Option<ApplyPermit> {
        let Some(epoch) = &self.epoch else {
            return Some(ApplyPermit { _shared: None });
        };

        let shared = epoch.apply.clone().read_owned().await;
        self.is_current().then_some(ApplyPermit {
            _shared: Some(shared),
        })
    }
}

// =============================================================================
// Delivery Engine
// =============================================================================

/// Sends location events and drains the pending queue.
#[derive(Clone)]
pub struct DeliveryEngine {
    db: Database,
    client: RouteClient,
    notifier: Arc<dyn SyncNotifier>,
}

impl std::fmt::Debug for DeliveryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryEngine")
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

impl DeliveryEngine {
    pub fn new(db: Database, client: RouteClient) -> Self {
        DeliveryEngine {
            db,
            client,
            notifier: Arc::new(NoOpNotifier),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn SyncNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Delivers one payload. Fails fast without a token.
    pub async fn send_payload(&self, target: &DeliveryTarget, payload: &RoutePayload) -> SyncResult<()> {
        let token = target
            .token
            .as_deref()
            .ok_or(SyncError::NotAuthenticated)?;

        self.client
            .post_route(&target.routes_url, token, payload)
            .await
            .map(|_| ())
    }

    /// Delivers one queued event.
    ///
    /// Any error means the event stays queued; `Ok` means it can be retired.
    pub async fn send_one(&self, target: &DeliveryTarget, event: &PendingLocationEvent) -> SyncResult<()> {
        self.send_payload(target, &event.payload).await
    }

    /// Drains the whole queue once.
    pub async fn drain_queue(&self) -> SyncResult<DrainOutcome> {
        self.drain_guarded(&RunGuard::detached()).await
    }

    /// Drains the queue, discarding the result if `guard` went stale while
    /// sends were in flight.
    pub async fn drain_guarded(&self, guard: &RunGuard) -> SyncResult<DrainOutcome> {
        let snapshot = self.db.load(StoreScope::Background).await?;
        let target = DeliveryTarget::from_snapshot(&snapshot);

        if target.token.is_none() {
            info!(queued = snapshot.queue.len(), "No active session, skipping drain");
            return Ok(DrainOutcome::untouched(snapshot.queue));
        }
        if snapshot.queue.is_empty() {
            debug!("Pending queue is empty");
            return Ok(DrainOutcome::untouched(snapshot.queue));
        }

        let queue = snapshot.queue;
        let attempted_count = queue.len();
        debug!(count = attempted_count, "Draining pending queue");

        let results = join_all(queue.iter().map(|event| {
            let target = &target;
            async move { (event.id.clone(), self.send_one(target, event).await) }
        }))
        .await;

        let mut succeeded: HashSet<String> = HashSet::new();
        for (id, result) in results {
            match result {
                Ok(()) => {
                    succeeded.insert(id);
                }
                Err(e) => warn!(id = %id, error = %e, "Delivery failed, keeping event queued"),
            }
        }

        // Held until the notification is out, so stop() cannot slip in
        // between removal and notify.
        let Some(_permit) = guard.begin_apply().await else {
            info!(
                delivered = succeeded.len(),
                "Trigger stopped during drain, discarding result"
            );
            return Ok(DrainOutcome::untouched(queue));
        };

        let succeeded_ids: Vec<String> = queue
            .iter()
            .filter(|e| succeeded.contains(e.id.as_str()))
            .map(|e| e.id.clone())
            .collect();
        let remaining_queue: Vec<PendingLocationEvent> = queue
            .iter()
            .filter(|e| !succeeded.contains(e.id.as_str()))
            .cloned()
            .collect();

        if !succeeded_ids.is_empty() {
            self.db.pending_events().remove_many(&succeeded_ids).await?;
            debug!(ids = ?succeeded_ids, "Delivered events");
            notify_if_permitted(
                self.notifier.as_ref(),
                &Notification::synced(succeeded_ids.len()),
            );
        }

        info!(
            attempted = attempted_count,
            synced = succeeded_ids.len(),
            remaining = remaining_queue.len(),
            "Drain complete"
        );

        Ok(DrainOutcome {
            attempted_count,
            succeeded_ids,
            remaining_queue,
        })
    }
}
