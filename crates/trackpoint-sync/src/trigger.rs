//! # Sync Trigger Layer
//!
//! Runs one background-wake strategy that drains the pending queue without
//! foreground involvement.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   Stopped ──start()──► Starting ──(probe + register)──► Running(s)      │
//! │      ▲                                                     │            │
//! │      └────────────────────────stop()───────────────────────┘            │
//! │                                                                         │
//! │   start() while Running returns s, registers nothing                   │
//! │   stop()  while Stopped is a no-op                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Strategy Selection (first that registers wins)
//! ```text
//! (a) ConnectivitySignal   one-shot registration, re-armed after every
//!                          queue write and after a drain that left events
//! (b) PeriodicWake         platform wake every `interval`
//!                          (+ background capture when auto-tracking is on)
//! (c) TimerPlusKeepAlive   in-process timer + keep-alive, re-acquired when
//!                          the platform takes it back
//!
//! always: network status Offline/Unknown ──► Online  ⇒  drain
//! ```
//!
//! ## Drains
//! A drain runs as its own task so `stop()` never waits on the network.
//! Drains do not overlap; a wake that arrives during one is skipped. A drain
//! still in flight at `stop()` completes, but its result is discarded.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use trackpoint_core::validation::validate_interval_minutes;
use trackpoint_core::{CaptureOptions, NetworkStatus, SYNC_TAG};
use trackpoint_store::StoreScope;

use crate::delivery::{DeliveryEngine, RunEpoch, RunGuard};
use crate::error::SyncResult;
use crate::location::LocationProvider;
use crate::platform::{
    KeepAlive, PeriodicRegistration, PlatformCapabilities, SyncRegistration, WakePlatform,
};
use crate::producer::automatic_cycle;

// =============================================================================
// Strategy & State
// =============================================================================

/// The active background-wake strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerStrategy {
    ConnectivitySignal,
    PeriodicWake { interval: Duration },
    TimerPlusKeepAlive { interval: Duration },
}

impl std::fmt::Display for TriggerStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerStrategy::ConnectivitySignal => write!(f, "connectivity-signal"),
            TriggerStrategy::PeriodicWake { interval } => {
                write!(f, "periodic-wake({}s)", interval.as_secs())
            }
            TriggerStrategy::TimerPlusKeepAlive { interval } => {
                write!(f, "timer+keep-alive({}s)", interval.as_secs())
            }
        }
    }
}

/// Lifecycle state of a [`SyncTrigger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerState {
    #[default]
    Stopped,
    Starting,
    Running(TriggerStrategy),
}

/// Snapshot of trigger activity for external queries.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerStatus {
    pub state: TriggerState,

    /// Completion time of the last applied drain.
    pub last_drain_at: Option<DateTime<Utc>>,

    /// Events synced by the last applied drain.
    pub last_synced_count: usize,

    /// Events currently queued.
    pub pending_count: i64,

    /// The platform cancelled the periodic registration and renewing it has
    /// failed so far. Only network transitions drain until a retry succeeds.
    pub wake_source_lost: bool,
}

#[derive(Debug, Default)]
struct DrainStats {
    last_drain_at: Option<DateTime<Utc>>,
    last_synced_count: usize,
}

/// State shared by the trigger, its worker and its drain tasks.
#[derive(Debug, Default)]
struct Shared {
    state: StdMutex<TriggerState>,
    stats: StdMutex<DrainStats>,
    drain_lock: Arc<Mutex<()>>,
    epoch: RunEpoch,
    wake_source_lost: AtomicBool,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, TriggerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn stats(&self) -> MutexGuard<'_, DrainStats> {
        self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record_drain(&self, synced: usize) {
        let mut stats = self.stats();
        stats.last_drain_at = Some(Utc::now());
        stats.last_synced_count = synced;
    }
}

struct ActiveRun {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

// =============================================================================
// Sync Trigger
// =============================================================================

/// Owns the active wake strategy and everything it registered.
pub struct SyncTrigger {
    engine: DeliveryEngine,
    platform: Arc<dyn WakePlatform>,
    provider: Option<Arc<dyn LocationProvider>>,
    shared: Arc<Shared>,
    run: Mutex<Option<ActiveRun>>,
}

impl SyncTrigger {
    pub fn new(engine: DeliveryEngine, platform: Arc<dyn WakePlatform>) -> Self {
        SyncTrigger {
            engine,
            platform,
            provider: None,
            shared: Arc::new(Shared::default()),
            run: Mutex::new(None),
        }
    }

    /// Captures a background position on every periodic wake while the
    /// background config has auto-tracking on.
    pub fn with_background_capture(mut self, provider: Arc<dyn LocationProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn state(&self) -> TriggerState {
        *self.shared.state()
    }

    pub async fn status(&self) -> SyncResult<TriggerStatus> {
        let pending_count = self.engine.database().pending_events().count().await?;
        let stats = self.shared.stats();
        Ok(TriggerStatus {
            state: self.state(),
            last_drain_at: stats.last_drain_at,
            last_synced_count: stats.last_synced_count,
            pending_count,
            wake_source_lost: self.shared.wake_source_lost.load(Ordering::SeqCst),
        })
    }

    /// Starts background delivery with a wake every `interval_minutes`.
    ///
    /// Returns the active strategy. Calling it while running changes nothing.
    pub async fn start(&self, interval_minutes: u32) -> SyncResult<TriggerStrategy> {
        validate_interval_minutes(interval_minutes)?;
        self.start_every(Duration::from_secs(u64::from(interval_minutes) * 60))
            .await
    }

    pub(crate) async fn start_every(&self, interval: Duration) -> SyncResult<TriggerStrategy> {
        let mut run = self.run.lock().await;
        if let TriggerState::Running(strategy) = self.state() {
            debug!(%strategy, "Sync trigger already running");
            return Ok(strategy);
        }
        *self.shared.state() = TriggerState::Starting;
        self.shared.wake_source_lost.store(false, Ordering::SeqCst);

        let capabilities = self.platform.capabilities();
        info!(?capabilities, "Starting sync trigger");
        let (strategy, wake) = self.select_strategy(capabilities, interval);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let network = self.platform.network_status();
        let last_status = *network.borrow();

        let worker = TriggerWorker {
            engine: self.engine.clone(),
            platform: self.platform.clone(),
            provider: self.provider.clone(),
            shared: self.shared.clone(),
            guard: self.shared.epoch.guard(),
            interval,
            wake,
            network,
            last_status,
            queue_writes: self.engine.database().queue_writes(),
            rearm_requested: false,
            report_tx,
            report_rx,
            shutdown_rx,
        };
        let task = tokio::spawn(worker.run());

        *run = Some(ActiveRun { shutdown_tx, task });
        *self.shared.state() = TriggerState::Running(strategy);
        info!(%strategy, "Sync trigger running");
        Ok(strategy)
    }

    /// Unregisters every trigger and releases the keep-alive.
    ///
    /// Returns once everything is released. An in-flight drain is not
    /// cancelled; its result is discarded. A drain already removing its
    /// delivered events from the queue finishes that first.
    pub async fn stop(&self) -> SyncResult<()> {
        let mut run = self.run.lock().await;
        let Some(active) = run.take() else {
            debug!("Sync trigger already stopped");
            return Ok(());
        };

        self.shared.epoch.invalidate().await;
        let _ = active.shutdown_tx.send(true);
        if let Err(e) = active.task.await {
            warn!(error = %e, "Sync trigger task ended abnormally");
        }

        *self.shared.state() = TriggerState::Stopped;
        self.shared.wake_source_lost.store(false, Ordering::SeqCst);
        info!("Sync trigger stopped");
        Ok(())
    }

    fn select_strategy(
        &self,
        capabilities: PlatformCapabilities,
        interval: Duration,
    ) -> (TriggerStrategy, Wake) {
        if capabilities.connectivity_signal {
            match self.platform.register_connectivity_sync(SYNC_TAG) {
                Ok(registration) => {
                    return (
                        TriggerStrategy::ConnectivitySignal,
                        Wake::Connectivity {
                            armed: Some(arm(registration)),
                        },
                    )
                }
                Err(e) => warn!(error = %e, "Connectivity registration failed, falling back"),
            }
        }

        if capabilities.periodic_wake {
            match self.platform.register_periodic(SYNC_TAG, interval) {
                Ok(registration) => {
                    return (
                        TriggerStrategy::PeriodicWake { interval },
                        Wake::Periodic {
                            registration: Some(registration),
                            retry_at: None,
                        },
                    )
                }
                Err(e) => warn!(error = %e, "Periodic registration failed, falling back"),
            }
        }

        let keep_alive = if capabilities.keep_alive {
            acquire_keep_alive(self.platform.as_ref())
        } else {
            warn!("No keep-alive available, timer may be suspended with the process");
            None
        };

        let mut timer = tokio::time::interval_at(Instant::now() + interval, interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        (
            TriggerStrategy::TimerPlusKeepAlive { interval },
            Wake::Timer {
                timer,
                keep_alive,
                supported: capabilities.keep_alive,
            },
        )
    }
}

// =============================================================================
// Wake Sources
// =============================================================================

type Armed = Pin<Box<dyn Future<Output = bool> + Send>>;
type Held = Pin<Box<dyn Future<Output = ()> + Send>>;

fn arm(registration: SyncRegistration) -> Armed {
    Box::pin(registration.fired())
}

fn hold(keep_alive: KeepAlive) -> Held {
    Box::pin(keep_alive.revoked())
}

fn acquire_keep_alive(platform: &dyn WakePlatform) -> Option<Held> {
    match platform.acquire_keep_alive() {
        Ok(keep_alive) => {
            debug!("Keep-alive acquired");
            Some(hold(keep_alive))
        }
        Err(e) => {
            warn!(error = %e, "Keep-alive acquisition failed, retrying on next tick");
            None
        }
    }
}

/// Registrations held by a running strategy. Dropping releases them.
enum Wake {
    Connectivity {
        armed: Option<Armed>,
    },
    Periodic {
        registration: Option<PeriodicRegistration>,
        /// Next renewal attempt after a failed re-registration.
        retry_at: Option<Instant>,
    },
    Timer {
        timer: Interval,
        keep_alive: Option<Held>,
        supported: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WakeEvent {
    ConnectivityRestored,
    RegistrationLost,
    PeriodicTick,
    PeriodicCancelled,
    PeriodicRetry,
    TimerTick,
    KeepAliveRevoked,
}

async fn wait_revoked(keep_alive: &mut Option<Held>) {
    match keep_alive {
        Some(held) => held.as_mut().await,
        None => std::future::pending().await,
    }
}

impl Wake {
    fn is_connectivity(&self) -> bool {
        matches!(self, Wake::Connectivity { .. })
    }

    /// Waits for the next wake. Cancel-safe.
    async fn next(&mut self) -> WakeEvent {
        match self {
            Wake::Connectivity { armed } => {
                let fired = match armed {
                    Some(registration) => registration.as_mut().await,
                    None => std::future::pending().await,
                };
                *armed = None;
                if fired {
                    WakeEvent::ConnectivityRestored
                } else {
                    WakeEvent::RegistrationLost
                }
            }

            Wake::Periodic {
                registration,
                retry_at,
            } => {
                let tick = match registration {
                    Some(registration) => Some(registration.tick().await),
                    None => None,
                };
                match tick {
                    Some(Some(())) => WakeEvent::PeriodicTick,
                    Some(None) => {
                        *registration = None;
                        WakeEvent::PeriodicCancelled
                    }
                    None => {
                        match retry_at {
                            Some(at) => tokio::time::sleep_until(*at).await,
                            None => std::future::pending().await,
                        }
                        *retry_at = None;
                        WakeEvent::PeriodicRetry
                    }
                }
            }

            Wake::Timer {
                timer, keep_alive, ..
            } => {
                let event = tokio::select! {
                    _ = timer.tick() => WakeEvent::TimerTick,
                    _ = wait_revoked(keep_alive) => WakeEvent::KeepAliveRevoked,
                };
                if event == WakeEvent::KeepAliveRevoked {
                    *keep_alive = None;
                }
                event
            }
        }
    }
}

// =============================================================================
// Trigger Worker
// =============================================================================

/// Event loop of one run. Lives from `start()` to `stop()`.
struct TriggerWorker {
    engine: DeliveryEngine,
    platform: Arc<dyn WakePlatform>,
    provider: Option<Arc<dyn LocationProvider>>,
    shared: Arc<Shared>,
    guard: RunGuard,
    interval: Duration,
    wake: Wake,
    network: watch::Receiver<NetworkStatus>,
    last_status: NetworkStatus,
    queue_writes: watch::Receiver<u64>,

    /// A re-arm was asked for while the registration was still armed.
    rearm_requested: bool,

    /// Remaining queue length after each applied drain.
    report_tx: mpsc::UnboundedSender<usize>,
    report_rx: mpsc::UnboundedReceiver<usize>,
    shutdown_rx: watch::Receiver<bool>,
}

impl TriggerWorker {
    async fn run(mut self) {
        debug!("Sync trigger worker starting");

        loop {
            let connectivity = self.wake.is_connectivity();

            tokio::select! {
                _ = self.shutdown_rx.changed() => {
                    break;
                }

                Ok(()) = self.network.changed() => {
                    let status = *self.network.borrow_and_update();
                    let previous = std::mem::replace(&mut self.last_status, status);
                    if status == NetworkStatus::Online && previous != NetworkStatus::Online {
                        info!(from = %previous, "Connectivity restored, draining");
                        self.spawn_drain(false);
                    }
                }

                event = self.wake.next() => {
                    self.handle_wake(event);
                }

                Ok(()) = self.queue_writes.changed(), if connectivity => {
                    self.rearm();
                }

                Some(remaining) = self.report_rx.recv() => {
                    if connectivity && remaining > 0 {
                        self.rearm();
                    }
                }
            }
        }

        // Dropping `wake` here releases every registration and the keep-alive
        debug!("Sync trigger worker stopped");
    }

    fn handle_wake(&mut self, event: WakeEvent) {
        debug!(?event, "Wake");
        match event {
            WakeEvent::ConnectivityRestored => {
                self.spawn_drain(false);
                if std::mem::take(&mut self.rearm_requested) {
                    self.rearm();
                }
            }
            WakeEvent::RegistrationLost => {
                warn!("Connectivity registration dropped by platform");
                if std::mem::take(&mut self.rearm_requested) {
                    self.rearm();
                }
            }
            WakeEvent::PeriodicTick => self.spawn_drain(true),
            WakeEvent::PeriodicCancelled => {
                warn!("Periodic registration cancelled by platform");
                self.renew_periodic();
            }
            WakeEvent::PeriodicRetry => self.renew_periodic(),
            WakeEvent::TimerTick => {
                if let Wake::Timer {
                    keep_alive,
                    supported: true,
                    ..
                } = &mut self.wake
                {
                    if keep_alive.is_none() {
                        *keep_alive = acquire_keep_alive(self.platform.as_ref());
                    }
                }
                self.spawn_drain(false);
            }
            WakeEvent::KeepAliveRevoked => {
                info!("Keep-alive released by platform, re-acquiring");
                if let Wake::Timer { keep_alive, .. } = &mut self.wake {
                    *keep_alive = acquire_keep_alive(self.platform.as_ref());
                }
            }
        }
    }

    /// Registers the periodic wake again. Until that succeeds the run has no
    /// wake source of its own, so a failure is retried one interval later.
    fn renew_periodic(&mut self) {
        if let Wake::Periodic {
            registration,
            retry_at,
        } = &mut self.wake
        {
            match self.platform.register_periodic(SYNC_TAG, self.interval) {
                Ok(renewed) => {
                    if self.shared.wake_source_lost.swap(false, Ordering::SeqCst) {
                        info!("Periodic registration restored");
                    }
                    *registration = Some(renewed);
                }
                Err(e) => {
                    error!(
                        error = %e,
                        retry_in = ?self.interval,
                        "Periodic re-registration failed, no wake source until it succeeds"
                    );
                    self.shared.wake_source_lost.store(true, Ordering::SeqCst);
                    *retry_at = Some(Instant::now() + self.interval);
                }
            }
        }
    }

    fn rearm(&mut self) {
        if let Wake::Connectivity { armed } = &mut self.wake {
            if armed.is_some() {
                self.rearm_requested = true;
                return;
            }
            match self.platform.register_connectivity_sync(SYNC_TAG) {
                Ok(registration) => {
                    debug!("Connectivity registration re-armed");
                    *armed = Some(arm(registration));
                }
                Err(e) => warn!(error = %e, "Connectivity re-registration failed"),
            }
        }
    }

    /// Starts a drain task unless one is already in flight.
    fn spawn_drain(&self, with_capture: bool) {
        let permit = match self.shared.drain_lock.clone().try_lock_owned() {
            Ok(permit) => permit,
            Err(_) => {
                debug!("Drain already in flight, skipping wake");
                return;
            }
        };

        let engine = self.engine.clone();
        let shared = self.shared.clone();
        let guard = self.guard.clone();
        let report_tx = self.report_tx.clone();
        let provider = if with_capture {
            self.provider.clone()
        } else {
            None
        };

        tokio::spawn(async move {
            let _permit = permit;

            if let Some(provider) = provider {
                let outcome = automatic_cycle(
                    &engine,
                    provider.as_ref(),
                    StoreScope::Background,
                    &CaptureOptions::background(),
                )
                .await;
                debug!(?outcome, "Background capture finished");
            }

            match engine.drain_guarded(&guard).await {
                Ok(outcome) if guard.is_current() => {
                    shared.record_drain(outcome.synced_count());
                    let _ = report_tx.send(outcome.remaining_queue.len());
                }
                Ok(_) => debug!("Drain finished after stop, result discarded"),
                Err(e) => error!(error = %e, "Drain failed, waiting for next trigger"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RouteClient;
    use crate::location::FixedLocationProvider;
    use crate::test_support::{event, memory_db, push_session, wait_until, FakePlatform, StubServer};
    use trackpoint_core::{BackgroundMessage, TrackingConfig};
    use trackpoint_store::Database;

    fn caps(connectivity_signal: bool, periodic_wake: bool, keep_alive: bool) -> PlatformCapabilities {
        PlatformCapabilities {
            connectivity_signal,
            periodic_wake,
            keep_alive,
        }
    }

    async fn trigger_with(platform: &Arc<FakePlatform>) -> (SyncTrigger, Database) {
        let db = memory_db().await;
        let engine = DeliveryEngine::new(db.clone(), RouteClient::new(Duration::from_secs(1)).unwrap());
        let trigger = SyncTrigger::new(engine, platform.clone() as Arc<dyn WakePlatform>);
        (trigger, db)
    }

    #[tokio::test]
    async fn test_start_twice_registers_once() {
        let platform = FakePlatform::new(caps(true, true, true));
        let (trigger, _db) = trigger_with(&platform).await;

        let first = trigger.start(5).await.unwrap();
        let second = trigger.start(5).await.unwrap();

        assert_eq!(first, TriggerStrategy::ConnectivitySignal);
        assert_eq!(second, first);
        assert_eq!(platform.connectivity_registrations(), 1);
        assert_eq!(platform.periodic_registrations(), 0);
        assert_eq!(platform.local.pending_connectivity_registrations(), 1);
        assert_eq!(trigger.state(), TriggerState::Running(first));

        trigger.stop().await.unwrap();
        assert_eq!(platform.local.pending_connectivity_registrations(), 0);
        assert_eq!(trigger.state(), TriggerState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_while_stopped_is_a_no_op() {
        let platform = FakePlatform::new(caps(true, true, true));
        let (trigger, _db) = trigger_with(&platform).await;

        trigger.stop().await.unwrap();
        assert_eq!(trigger.state(), TriggerState::Stopped);

        trigger.start(5).await.unwrap();
        trigger.stop().await.unwrap();
        trigger.stop().await.unwrap();
        assert_eq!(trigger.state(), TriggerState::Stopped);
    }

    #[tokio::test]
    async fn test_invalid_interval_is_rejected() {
        let platform = FakePlatform::new(caps(true, true, true));
        let (trigger, _db) = trigger_with(&platform).await;

        assert!(trigger.start(0).await.unwrap_err().is_config_error());
        assert!(trigger.start(61).await.is_err());
        assert_eq!(trigger.state(), TriggerState::Stopped);
        assert_eq!(platform.connectivity_registrations(), 0);
    }

    #[tokio::test]
    async fn test_periodic_registration_failure_falls_back_to_timer() {
        let platform = FakePlatform::failing_periodic(caps(false, true, true));
        let (trigger, _db) = trigger_with(&platform).await;

        let strategy = trigger.start(5).await.unwrap();

        assert_eq!(
            strategy,
            TriggerStrategy::TimerPlusKeepAlive {
                interval: Duration::from_secs(300)
            }
        );
        assert_eq!(platform.periodic_registrations(), 1);
        assert_eq!(platform.local.held_keep_alives(), 1);

        trigger.stop().await.unwrap();
        assert_eq!(platform.local.held_keep_alives(), 0);
    }

    #[tokio::test]
    async fn test_periodic_wake_is_chosen_without_connectivity_signal() {
        let platform = FakePlatform::new(caps(false, true, true));
        let (trigger, _db) = trigger_with(&platform).await;

        let strategy = trigger.start(15).await.unwrap();

        assert_eq!(
            strategy,
            TriggerStrategy::PeriodicWake {
                interval: Duration::from_secs(900)
            }
        );
        assert_eq!(platform.local.active_periodic_registrations(), 1);
        assert_eq!(platform.keep_alive_acquisitions(), 0);

        trigger.stop().await.unwrap();
        assert_eq!(platform.local.active_periodic_registrations(), 0);
    }

    #[tokio::test]
    async fn test_connectivity_restored_drains_queue() {
        let server = StubServer::start().await;
        let platform = FakePlatform::new(caps(true, false, false));
        platform.local.set_network_status(NetworkStatus::Offline);
        let (trigger, db) = trigger_with(&platform).await;

        push_session(&db, &server.routes_url()).await;
        db.pending_events().enqueue(&event("ok")).await.unwrap();

        trigger.start(5).await.unwrap();
        platform.local.set_network_status(NetworkStatus::Online);

        let drained = wait_until(Duration::from_secs(5), || {
            let db = db.clone();
            async move { db.pending_events().count().await.unwrap() == 0 }
        })
        .await;
        assert!(drained);

        let status = trigger.status().await.unwrap();
        assert!(status.last_drain_at.is_some());
        assert_eq!(status.pending_count, 0);

        trigger.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_queue_write_rearms_connectivity_registration() {
        let platform = FakePlatform::new(caps(true, false, false));
        platform.local.set_network_status(NetworkStatus::Offline);
        let (trigger, db) = trigger_with(&platform).await;

        trigger.start(5).await.unwrap();
        platform.local.set_network_status(NetworkStatus::Online);
        let fired = wait_until(Duration::from_secs(5), || {
            let platform = platform.clone();
            async move { platform.local.pending_connectivity_registrations() == 0 }
        })
        .await;
        assert!(fired);

        db.pending_events().enqueue(&event("ok")).await.unwrap();
        let rearmed = wait_until(Duration::from_secs(5), || {
            let platform = platform.clone();
            async move { platform.local.pending_connectivity_registrations() == 1 }
        })
        .await;
        assert!(rearmed);
        assert_eq!(platform.connectivity_registrations(), 2);

        trigger.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_periodic_wake_captures_and_drains() {
        let server = StubServer::start().await;
        let platform = FakePlatform::new(caps(false, true, false));
        let db = memory_db().await;
        let engine = DeliveryEngine::new(db.clone(), RouteClient::new(Duration::from_secs(1)).unwrap());
        let trigger = SyncTrigger::new(engine, platform.clone() as Arc<dyn WakePlatform>)
            .with_background_capture(Arc::new(FixedLocationProvider::new(1.0, 2.0)));

        db.apply_message(&BackgroundMessage::ConfigUpdate {
            config: TrackingConfig {
                routes_url: server.routes_url(),
                auto_tracking: true,
                ..Default::default()
            },
            auth: Some(crate::test_support::session()),
        })
        .await
        .unwrap();
        db.pending_events().enqueue(&event("ok")).await.unwrap();

        trigger.start_every(Duration::from_millis(50)).await.unwrap();

        let done = wait_until(Duration::from_secs(5), || {
            let db = db.clone();
            let server = server.clone();
            async move {
                db.pending_events().count().await.unwrap() == 0 && server.route_calls() >= 2
            }
        })
        .await;
        trigger.stop().await.unwrap();

        assert!(done);
        assert!(server.route_names().iter().any(|n| n == "Automatic position"));
    }

    #[tokio::test]
    async fn test_revoked_keep_alive_is_reacquired() {
        let platform = FakePlatform::new(caps(false, false, true));
        let (trigger, _db) = trigger_with(&platform).await;

        trigger.start(5).await.unwrap();
        assert_eq!(platform.keep_alive_acquisitions(), 1);

        platform.local.revoke_keep_alives();
        let reacquired = wait_until(Duration::from_secs(5), || {
            let platform = platform.clone();
            async move {
                platform.keep_alive_acquisitions() == 2 && platform.local.held_keep_alives() == 1
            }
        })
        .await;
        assert!(reacquired);

        trigger.stop().await.unwrap();
        assert_eq!(platform.local.held_keep_alives(), 0);
    }

    #[tokio::test]
    async fn test_drain_without_session_keeps_queue() {
        let server = StubServer::start().await;
        let platform = FakePlatform::new(caps(false, true, false));
        let (trigger, db) = trigger_with(&platform).await;

        db.pending_events().enqueue(&event("ok")).await.unwrap();
        trigger.start_every(Duration::from_millis(30)).await.unwrap();

        let drained = wait_until(Duration::from_secs(2), || {
            let trigger = &trigger;
            async move { trigger.status().await.unwrap().last_drain_at.is_some() }
        })
        .await;
        trigger.stop().await.unwrap();

        assert!(drained);
        assert_eq!(db.pending_events().count().await.unwrap(), 1);
        assert_eq!(server.route_calls(), 0);
    }

    #[tokio::test]
    async fn test_storage_errors_do_not_stop_trigger() {
        let platform = FakePlatform::new(caps(false, true, false));
        let (trigger, db) = trigger_with(&platform).await;
        trigger.start_every(Duration::from_millis(20)).await.unwrap();

        db.close().await;
        // Several periodic wakes, each drain failing on the closed store
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(matches!(
            trigger.state(),
            TriggerState::Running(TriggerStrategy::PeriodicWake { .. })
        ));
        assert!(trigger.status().await.is_err());
        assert_eq!(platform.local.active_periodic_registrations(), 1);

        trigger.stop().await.unwrap();
        assert_eq!(trigger.state(), TriggerState::Stopped);
        assert_eq!(platform.local.active_periodic_registrations(), 0);
    }

    #[tokio::test]
    async fn test_lost_periodic_registration_is_reported_and_retried() {
        let platform = FakePlatform::new(caps(false, true, false));
        let (trigger, _db) = trigger_with(&platform).await;
        trigger.start_every(Duration::from_millis(30)).await.unwrap();
        assert!(!trigger.status().await.unwrap().wake_source_lost);

        platform.set_failing_periodic(true);
        platform.local.cancel_periodic_registrations();

        let lost = wait_until(Duration::from_secs(2), || {
            let trigger = &trigger;
            async move { trigger.status().await.unwrap().wake_source_lost }
        })
        .await;
        assert!(lost);

        // Initial registration, the failed renewal, then at least one retry
        let retried = wait_until(Duration::from_secs(2), || {
            let platform = platform.clone();
            async move { platform.periodic_registrations() >= 3 }
        })
        .await;
        assert!(retried);
        assert!(trigger.status().await.unwrap().wake_source_lost);

        platform.set_failing_periodic(false);
        let restored = wait_until(Duration::from_secs(2), || {
            let platform = platform.clone();
            async move { platform.local.active_periodic_registrations() == 1 }
        })
        .await;
        assert!(restored);
        assert!(!trigger.status().await.unwrap().wake_source_lost);

        trigger.stop().await.unwrap();
        assert_eq!(platform.local.active_periodic_registrations(), 0);
    }
}
