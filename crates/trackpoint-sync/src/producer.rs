//! # Foreground Producer
//!
//! Turns position readings into location events.
//!
//! ## Manual vs Automatic
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                  capture ──► send_payload ──► outcome                   │
//! │                                                                         │
//! │                    capture failed    send failed                        │
//! │  manual (send_now)   Err(Capture)    SendReport{success: false}         │
//! │                                      queued only if confirmed Offline   │
//! │                                                                         │
//! │  automatic (tick)    Skipped         Queued (always)                    │
//! │                                                                         │
//! │  Neither path notifies; notifications belong to drains.                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use trackpoint_core::{
    manual_event_name, CaptureOptions, NetworkStatus, PendingLocationEvent, RoutePayload,
    AUTOMATIC_EVENT_NAME,
};
use trackpoint_store::StoreScope;

use crate::delivery::{DeliveryEngine, DeliveryTarget};
use crate::error::SyncResult;
use crate::location::{capture, LocationProvider};

/// Outcome of a manual send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReport {
    pub success: bool,
    pub message: String,

    /// The event was appended to the pending queue.
    pub queued: bool,

    /// Id of the queued event.
    pub event_id: Option<String>,
}

/// Outcome of one automatic cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoTick {
    /// Auto-tracking is off or the capture failed.
    Skipped,
    Delivered,
    /// Delivery failed; the event waits in the pending queue.
    Queued,
    /// Storage failed; the reading is lost.
    Failed,
}

/// Runs one automatic cycle against the config and auth of `scope`.
///
/// Nothing here is surfaced: failures are logged and mapped to an [`AutoTick`].
pub(crate) async fn automatic_cycle(
    engine: &DeliveryEngine,
    provider: &dyn LocationProvider,
    scope: StoreScope,
    options: &CaptureOptions,
) -> AutoTick {
    let db = engine.database();
    let snapshot = match db.load(scope).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            error!(scope = %scope, error = %e, "Failed to load store, skipping cycle");
            return AutoTick::Failed;
        }
    };

    if !snapshot.config.auto_tracking {
        debug!(scope = %scope, "Auto-tracking disabled, skipping cycle");
        return AutoTick::Skipped;
    }

    let position = match capture(provider, options).await {
        Ok(position) => position,
        Err(e) => {
            warn!(scope = %scope, error = %e, "Capture failed, skipping cycle");
            return AutoTick::Skipped;
        }
    };

    let payload = RoutePayload::single(AUTOMATIC_EVENT_NAME, &position);
    let target = DeliveryTarget::new(&snapshot.config, snapshot.token());

    match engine.send_payload(&target, &payload).await {
        Ok(()) => {
            debug!(scope = %scope, "Automatic position delivered");
            AutoTick::Delivered
        }
        Err(send_err) => {
            let event = PendingLocationEvent::new(payload);
            match db.pending_events().enqueue(&event).await {
                Ok(()) => {
                    info!(id = %event.id, error = %send_err, "Delivery failed, queued for sync");
                    AutoTick::Queued
                }
                Err(e) => {
                    error!(error = %e, "Failed to queue location event");
                    AutoTick::Failed
                }
            }
        }
    }
}

// =============================================================================
// Foreground Producer
// =============================================================================

/// Produces events from the foreground context.
pub struct ForegroundProducer {
    engine: DeliveryEngine,
    provider: Arc<dyn LocationProvider>,
    network: watch::Receiver<NetworkStatus>,
}

impl ForegroundProducer {
    pub fn new(
        engine: DeliveryEngine,
        provider: Arc<dyn LocationProvider>,
        network: watch::Receiver<NetworkStatus>,
    ) -> Self {
        ForegroundProducer {
            engine,
            provider,
            network,
        }
    }

    /// Manual send: capture, deliver, and report.
    ///
    /// Capture failures are returned as errors. Delivery failures come back
    /// as an unsuccessful report; the event is queued only when the device is
    /// confirmed offline.
    pub async fn send_now(&self) -> SyncResult<SendReport> {
        let db = self.engine.database();
        let snapshot = db.load(StoreScope::Foreground).await?;

        let position = capture(self.provider.as_ref(), &CaptureOptions::foreground()).await?;

        let username = snapshot
            .auth
            .as_ref()
            .map(|a| a.username.as_str())
            .unwrap_or_default();
        let payload = RoutePayload::single(manual_event_name(username), &position);
        let target = DeliveryTarget::new(&snapshot.config, snapshot.token());

        let err = match self.engine.send_payload(&target, &payload).await {
            Ok(()) => {
                info!("Location sent");
                return Ok(SendReport {
                    success: true,
                    message: "Location sent".to_string(),
                    queued: false,
                    event_id: None,
                });
            }
            Err(e) => e,
        };

        let status = *self.network.borrow();
        if !status.is_confirmed_offline() {
            warn!(error = %err, %status, "Manual send failed");
            return Ok(SendReport {
                success: false,
                message: err.to_string(),
                queued: false,
                event_id: None,
            });
        }

        let event = PendingLocationEvent::new(payload);
        let queued = match db.pending_events().enqueue(&event).await {
            Ok(()) => {
                info!(id = %event.id, "Offline, manual send queued for sync");
                true
            }
            Err(e) => {
                error!(error = %e, "Failed to queue manual send");
                false
            }
        };

        Ok(SendReport {
            success: false,
            message: err.to_string(),
            queued,
            event_id: queued.then(|| event.id),
        })
    }

    /// One automatic cycle on the foreground scope.
    pub async fn auto_tick(&self) -> AutoTick {
        automatic_cycle(
            &self.engine,
            self.provider.as_ref(),
            StoreScope::Foreground,
            &CaptureOptions::foreground(),
        )
        .await
    }

    /// Runs [`auto_tick`](Self::auto_tick) every `interval` until stopped.
    pub fn spawn_auto_tracking(self: Arc<Self>, interval: Duration) -> AutoTrackingHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let task = tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "Auto-tracking started");

            let mut timer = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        let outcome = self.auto_tick().await;
                        debug!(?outcome, "Auto-tracking cycle finished");
                    }

                    _ = shutdown_rx.recv() => {
                        info!("Auto-tracking stopped");
                        break;
                    }
                }
            }
        });

        AutoTrackingHandle { shutdown_tx, task }
    }
}

/// Handle for the auto-tracking loop.
pub struct AutoTrackingHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl AutoTrackingHandle {
    /// Stops the loop and waits for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.task.await {
            warn!(error = %e, "Auto-tracking task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RouteClient;
    use crate::error::SyncError;
    use crate::location::FixedLocationProvider;
    use crate::test_support::RecordingNotifier;
    use crate::test_support::{memory_db, session, wait_until, StubServer, UNREACHABLE_ROUTES_URL};
    use trackpoint_core::{CaptureError, TrackingConfig};
    use trackpoint_store::Database;

    struct Fixture {
        db: Database,
        notifier: Arc<RecordingNotifier>,
        status: watch::Sender<NetworkStatus>,
        producer: ForegroundProducer,
    }

    async fn fixture(routes_url: &str, auto_tracking: bool, provider: FixedLocationProvider) -> Fixture {
        let db = memory_db().await;
        let config = TrackingConfig {
            routes_url: routes_url.to_string(),
            auto_tracking,
            ..Default::default()
        };
        db.settings().save_config(StoreScope::Foreground, &config).await.unwrap();
        db.settings().save_auth(StoreScope::Foreground, &session()).await.unwrap();

        let notifier = Arc::new(RecordingNotifier::granted());
        let engine = DeliveryEngine::new(db.clone(), RouteClient::new(Duration::from_secs(1)).unwrap())
            .with_notifier(notifier.clone());
        let (status, network) = watch::channel(NetworkStatus::Unknown);
        let producer = ForegroundProducer::new(engine, Arc::new(provider), network);

        Fixture {
            db,
            notifier,
            status,
            producer,
        }
    }

    fn here() -> FixedLocationProvider {
        FixedLocationProvider::new(-34.6037, -58.3816)
    }

    #[tokio::test]
    async fn test_manual_send_delivers() {
        let server = StubServer::start().await;
        let f = fixture(&server.routes_url(), false, here()).await;

        let report = f.producer.send_now().await.unwrap();

        assert!(report.success);
        assert!(!report.queued);
        assert_eq!(server.route_calls(), 1);
        assert_eq!(server.last_route_name().as_deref(), Some("Position ana"));
        assert_eq!(f.db.pending_events().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_manual_send_offline_is_queued_and_surfaced() {
        let f = fixture(UNREACHABLE_ROUTES_URL, false, here()).await;
        f.status.send_replace(NetworkStatus::Offline);

        let report = f.producer.send_now().await.unwrap();

        assert!(!report.success);
        assert!(report.queued);
        assert!(!report.message.is_empty());
        let queue = f.db.pending_events().list().await.unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(Some(queue[0].id.clone()), report.event_id);
        assert!(f.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_manual_send_failure_online_is_not_queued() {
        let server = StubServer::start().await;
        server.set_rejecting(true);
        let f = fixture(&server.routes_url(), false, here()).await;
        f.status.send_replace(NetworkStatus::Online);

        let report = f.producer.send_now().await.unwrap();

        assert!(!report.success);
        assert!(!report.queued);
        assert!(report.message.contains("503"));
        assert_eq!(f.db.pending_events().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_manual_capture_failure_is_surfaced() {
        let server = StubServer::start().await;
        let f = fixture(&server.routes_url(), false, FixedLocationProvider::denied()).await;

        let err = f.producer.send_now().await.unwrap_err();

        assert!(matches!(err, SyncError::Capture(CaptureError::PermissionDenied)));
        assert_eq!(server.route_calls(), 0);
    }

    #[tokio::test]
    async fn test_auto_tick_outcomes() {
        let server = StubServer::start().await;

        let f = fixture(&server.routes_url(), true, here()).await;
        assert_eq!(f.producer.auto_tick().await, AutoTick::Delivered);
        assert_eq!(server.last_route_name().as_deref(), Some("Automatic position"));

        let f = fixture(&server.routes_url(), false, here()).await;
        assert_eq!(f.producer.auto_tick().await, AutoTick::Skipped);

        let f = fixture(&server.routes_url(), true, FixedLocationProvider::denied()).await;
        assert_eq!(f.producer.auto_tick().await, AutoTick::Skipped);
        assert_eq!(f.db.pending_events().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_auto_tick_failure_is_queued_regardless_of_network() {
        let f = fixture(UNREACHABLE_ROUTES_URL, true, here()).await;
        f.status.send_replace(NetworkStatus::Online);

        assert_eq!(f.producer.auto_tick().await, AutoTick::Queued);

        let queue = f.db.pending_events().list().await.unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].payload.name, "Automatic position");
        assert!(f.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_auto_tracking_loop_runs_until_stopped() {
        let f = fixture(UNREACHABLE_ROUTES_URL, true, here()).await;
        let db = f.db.clone();
        let producer = Arc::new(f.producer);

        let handle = producer.spawn_auto_tracking(Duration::from_millis(50));
        let queued = wait_until(Duration::from_secs(5), || {
            let db = db.clone();
            async move { db.pending_events().count().await.unwrap() >= 2 }
        })
        .await;
        handle.stop().await;

        assert!(queued);
    }
}
