//! # Wake Platform
//!
//! The background wake primitives a host offers, behind one trait so the
//! trigger layer can probe them and pick one.
//!
//! ## Primitives
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           WakePlatform                                  │
//! │                                                                         │
//! │  register_connectivity_sync(tag) ──► SyncRegistration (one-shot)        │
//! │        fires once on the next Offline/Unknown ──► Online transition     │
//! │                                                                         │
//! │  register_periodic(tag, interval) ─► PeriodicRegistration (ticks)       │
//! │                                                                         │
//! │  acquire_keep_alive()             ──► KeepAlive (revocable)             │
//! │                                                                         │
//! │  network_status()                 ──► watch::Receiver<NetworkStatus>    │
//! │                                                                         │
//! │  Every handle releases its platform resource on drop.                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Local Platform
//! [`LocalPlatform`] implements the primitives in-process. Reachability comes
//! from a [`ConnectivityMonitor`] that opens TCP connections to the ingestion
//! host and publishes the result.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use trackpoint_core::NetworkStatus;

use crate::config::{parse_host_port, TriggerSettings};
use crate::error::{SyncError, SyncResult};

// =============================================================================
// Capabilities
// =============================================================================

/// Which wake primitives the platform offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformCapabilities {
    pub connectivity_signal: bool,
    pub periodic_wake: bool,
    pub keep_alive: bool,
}

impl From<&TriggerSettings> for PlatformCapabilities {
    fn from(settings: &TriggerSettings) -> Self {
        PlatformCapabilities {
            connectivity_signal: settings.connectivity_signal,
            periodic_wake: settings.periodic_wake,
            keep_alive: settings.keep_alive,
        }
    }
}

// =============================================================================
// Handles
// =============================================================================

/// Runs a release callback exactly once, on drop.
struct Release(Option<Box<dyn FnOnce() + Send>>);

impl Release {
    fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Release(Some(Box::new(f)))
    }
}

impl Drop for Release {
    fn drop(&mut self) {
        if let Some(release) = self.0.take() {
            release();
        }
    }
}

/// One-shot "connectivity restored" registration.
pub struct SyncRegistration {
    tag: String,
    fired: oneshot::Receiver<()>,
    _release: Release,
}

impl SyncRegistration {
    pub fn new(
        tag: impl Into<String>,
        fired: oneshot::Receiver<()>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        SyncRegistration {
            tag: tag.into(),
            fired,
            _release: Release::new(release),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Waits for the signal. Returns `false` if the platform dropped the
    /// registration without firing. Consumes the registration either way.
    pub async fn fired(self) -> bool {
        let SyncRegistration { fired, _release, .. } = self;
        fired.await.is_ok()
    }
}

/// Recurring wake registration.
pub struct PeriodicRegistration {
    tag: String,
    interval: Duration,
    ticks: mpsc::Receiver<()>,
    _release: Release,
}

impl PeriodicRegistration {
    pub fn new(
        tag: impl Into<String>,
        interval: Duration,
        ticks: mpsc::Receiver<()>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        PeriodicRegistration {
            tag: tag.into(),
            interval,
            ticks,
            _release: Release::new(release),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Next wake. `None` once the platform cancelled the registration.
    pub async fn tick(&mut self) -> Option<()> {
        self.ticks.recv().await
    }
}

/// A held keep-alive resource.
pub struct KeepAlive {
    revoked: oneshot::Receiver<()>,
    _release: Release,
}

impl KeepAlive {
    pub fn new(revoked: oneshot::Receiver<()>, release: impl FnOnce() + Send + 'static) -> Self {
        KeepAlive {
            revoked,
            _release: Release::new(release),
        }
    }

    /// Completes when the platform takes the resource back.
    pub async fn revoked(self) {
        let KeepAlive { revoked, _release } = self;
        let _ = revoked.await;
    }
}

// =============================================================================
// Platform Trait
// =============================================================================

/// Background wake primitives of the host.
pub trait WakePlatform: Send + Sync {
    fn capabilities(&self) -> PlatformCapabilities;

    fn register_connectivity_sync(&self, tag: &str) -> SyncResult<SyncRegistration>;

    fn register_periodic(&self, tag: &str, interval: Duration) -> SyncResult<PeriodicRegistration>;

    fn acquire_keep_alive(&self) -> SyncResult<KeepAlive>;

    fn network_status(&self) -> watch::Receiver<NetworkStatus>;
}

// =============================================================================
// Local Platform
// =============================================================================

#[derive(Default)]
struct LocalState {
    next_id: u64,
    connectivity: HashMap<u64, oneshot::Sender<()>>,
    keep_alives: HashMap<u64, oneshot::Sender<()>>,
    periodic: HashMap<u64, JoinHandle<()>>,
}

impl LocalState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-process wake platform.
#[derive(Clone)]
pub struct LocalPlatform {
    capabilities: PlatformCapabilities,
    status_tx: Arc<watch::Sender<NetworkStatus>>,
    state: Arc<Mutex<LocalState>>,
}

impl std::fmt::Debug for LocalPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalPlatform")
            .field("capabilities", &self.capabilities)
            .field("status", &*self.status_tx.borrow())
            .finish_non_exhaustive()
    }
}

impl LocalPlatform {
    pub fn new(capabilities: PlatformCapabilities) -> Self {
        let (status_tx, _) = watch::channel(NetworkStatus::Unknown);
        LocalPlatform {
            capabilities,
            status_tx: Arc::new(status_tx),
            state: Arc::new(Mutex::new(LocalState::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, LocalState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Publishes a reachability result.
    ///
    /// A transition into `Online` fires every pending connectivity registration.
    pub fn set_network_status(&self, status: NetworkStatus) {
        let previous = self.status_tx.send_replace(status);
        if previous == status {
            return;
        }

        info!(from = %previous, to = %status, "Network status changed");
        if status == NetworkStatus::Online {
            let pending: Vec<_> = self.state().connectivity.drain().collect();
            debug!(count = pending.len(), "Firing connectivity registrations");
            for (_, tx) in pending {
                let _ = tx.send(());
            }
        }
    }

    /// Takes back every held keep-alive.
    pub fn revoke_keep_alives(&self) {
        let held: Vec<_> = self.state().keep_alives.drain().collect();
        if !held.is_empty() {
            info!(count = held.len(), "Revoking keep-alive resources");
        }
        for (_, tx) in held {
            let _ = tx.send(());
        }
    }

    /// Cancels every periodic registration. Holders see their ticks end.
    pub fn cancel_periodic_registrations(&self) {
        let cancelled: Vec<_> = self.state().periodic.drain().collect();
        if !cancelled.is_empty() {
            info!(count = cancelled.len(), "Cancelling periodic registrations");
        }
        for (_, task) in cancelled {
            task.abort();
        }
    }

    /// Number of unfired connectivity registrations.
    pub fn pending_connectivity_registrations(&self) -> usize {
        self.state().connectivity.len()
    }

    /// Number of live periodic registrations.
    pub fn active_periodic_registrations(&self) -> usize {
        self.state().periodic.len()
    }

    /// Number of held keep-alives.
    pub fn held_keep_alives(&self) -> usize {
        self.state().keep_alives.len()
    }
}

impl WakePlatform for LocalPlatform {
    fn capabilities(&self) -> PlatformCapabilities {
        self.capabilities
    }

    fn register_connectivity_sync(&self, tag: &str) -> SyncResult<SyncRegistration> {
        if !self.capabilities.connectivity_signal {
            return Err(SyncError::RegistrationFailed(
                "connectivity signal not supported".into(),
            ));
        }

        let (tx, rx) = oneshot::channel();
        let id = {
            let mut state = self.state();
            let id = state.next_id();
            state.connectivity.insert(id, tx);
            id
        };

        let shared = self.state.clone();
        Ok(SyncRegistration::new(tag, rx, move || {
            if let Ok(mut state) = shared.lock() {
                state.connectivity.remove(&id);
            }
        }))
    }

    fn register_periodic(&self, tag: &str, interval: Duration) -> SyncResult<PeriodicRegistration> {
        if !self.capabilities.periodic_wake {
            return Err(SyncError::RegistrationFailed(
                "periodic wake not supported".into(),
            ));
        }
        if interval.is_zero() {
            return Err(SyncError::RegistrationFailed("zero periodic interval".into()));
        }

        let (tx, rx) = mpsc::channel(1);
        let task = tokio::spawn(async move {
            let mut timer = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                timer.tick().await;
                // A full channel means a wake is already pending
                if let Err(mpsc::error::TrySendError::Closed(_)) = tx.try_send(()) {
                    break;
                }
            }
        });

        let id = {
            let mut state = self.state();
            let id = state.next_id();
            state.periodic.insert(id, task);
            id
        };

        let shared = self.state.clone();
        Ok(PeriodicRegistration::new(tag, interval, rx, move || {
            if let Ok(mut state) = shared.lock() {
                if let Some(task) = state.periodic.remove(&id) {
                    task.abort();
                }
            }
        }))
    }

    fn acquire_keep_alive(&self) -> SyncResult<KeepAlive> {
        if !self.capabilities.keep_alive {
            return Err(SyncError::KeepAliveUnavailable("not supported".into()));
        }

        let (tx, rx) = oneshot::channel();
        let id = {
            let mut state = self.state();
            let id = state.next_id();
            state.keep_alives.insert(id, tx);
            id
        };

        let shared = self.state.clone();
        Ok(KeepAlive::new(rx, move || {
            if let Ok(mut state) = shared.lock() {
                state.keep_alives.remove(&id);
            }
        }))
    }

    fn network_status(&self) -> watch::Receiver<NetworkStatus> {
        self.status_tx.subscribe()
    }
}

// =============================================================================
// Connectivity Monitor
// =============================================================================

/// Derives a `host:port` probe target from an http(s) URL.
pub fn probe_target_from_url(raw: &str) -> SyncResult<(String, u16)> {
    let url = url::Url::parse(raw)?;
    let host = url
        .host_str()
        .ok_or_else(|| SyncError::InvalidUrl(format!("no host in '{}'", raw)))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| SyncError::InvalidUrl(format!("no port for '{}'", raw)))?;
    Ok((host.to_string(), port))
}

/// Resolves the probe target: the configured one, else the routes URL host.
pub fn resolve_probe_target(settings: &TriggerSettings, routes_url: &str) -> SyncResult<(String, u16)> {
    match settings.probe_target {
        Some(ref target) => parse_host_port(target),
        None => probe_target_from_url(routes_url),
    }
}

/// Probes reachability with TCP connects and publishes the result.
pub struct ConnectivityMonitor {
    platform: LocalPlatform,
    target: (String, u16),
    interval: Duration,
    timeout: Duration,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for controlling the connectivity monitor.
#[derive(Clone)]
pub struct ConnectivityMonitorHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl ConnectivityMonitorHandle {
    /// Triggers graceful shutdown.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelError("Shutdown channel closed".into()))
    }
}

impl ConnectivityMonitor {
    pub fn new(
        platform: LocalPlatform,
        target: (String, u16),
        interval: Duration,
        timeout: Duration,
    ) -> (Self, ConnectivityMonitorHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let monitor = ConnectivityMonitor {
            platform,
            target,
            interval,
            timeout,
            shutdown_rx,
        };
        (monitor, ConnectivityMonitorHandle { shutdown_tx })
    }

    /// Runs the probe loop. Spawn as a background task.
    pub async fn run(mut self) {
        info!(host = %self.target.0, port = self.target.1, "Connectivity monitor starting");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let status = self.probe().await;
                    self.platform.set_network_status(status);
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Connectivity monitor shutting down");
                    break;
                }
            }
        }
    }

    async fn probe(&self) -> NetworkStatus {
        let (host, port) = (&self.target.0, self.target.1);
        match tokio::time::timeout(self.timeout, TcpStream::connect((host.as_str(), port))).await {
            Ok(Ok(_)) => NetworkStatus::Online,
            Ok(Err(e)) => {
                debug!(error = %e, "Connectivity probe failed");
                NetworkStatus::Offline
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "Connectivity probe timed out");
                NetworkStatus::Offline
            }
        }
    }
}
