//! # TrackPoint Agent
//!
//! Long-running process that captures positions and delivers them to the
//! ingestion server, queueing whatever cannot be sent.
//!
//! ## Startup Sequence
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Agent Startup                                  │
//! │                                                                         │
//! │  1. Logging ─────────► tracing-subscriber, RUST_LOG overrides           │
//! │  2. Config ──────────► agent.toml + TRACKPOINT_* environment            │
//! │  3. Store ───────────► SQLite, migrations                               │
//! │  4. Seed + login ────► endpoint URLs, session from [account]            │
//! │  5. Push ────────────► foreground config + session → background scope   │
//! │  6. Platform ────────► LocalPlatform + ConnectivityMonitor              │
//! │  7. Run ─────────────► SyncTrigger + auto-tracking until SIGINT/SIGTERM │
//! │     (auto-tracking off: one drain, then exit)                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use trackpoint_core::ConfigPatch;
use trackpoint_store::{Database, DbConfig};
use trackpoint_sync::platform::resolve_probe_target;
use trackpoint_sync::{
    AgentConfig, AuthService, BackgroundInbox, BackgroundMailbox, ConfigService,
    ConnectivityMonitor, ConnectivityMonitorHandle, DeliveryEngine, FileLocationProvider,
    FixedLocationProvider, ForegroundProducer, LocalPlatform, LocationProvider, LocationSource,
    RouteClient, SyncTrigger, TracingNotifier, WakePlatform,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Starting TrackPoint agent");

    let config = AgentConfig::load(None).context("Failed to load agent config")?;

    let db_path = config.database_path()?;
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let db = Database::new(DbConfig::new(db_path)).await?;
    if !db.health_check().await {
        bail!("Tracking store is not answering queries");
    }
    info!("Tracking store ready");

    let client = RouteClient::new(config.request_timeout())?;
    let settings = ConfigService::new(db.clone());

    seed_endpoints(&config, &settings).await?;
    ensure_session(&config, &AuthService::new(db.clone(), client.clone())).await;

    // Background scope gets its own copy of the config and session
    let (inbox, mailbox) = BackgroundInbox::new(db.clone());
    let inbox_task = tokio::spawn(inbox.run());
    mailbox.deliver(settings.background_message().await?).await?;

    let tracking = settings.get_config().await?;

    let platform = LocalPlatform::new((&config.triggers).into());
    let probe_target = resolve_probe_target(&config.triggers, &tracking.routes_url)?;
    let (monitor, monitor_handle) = ConnectivityMonitor::new(
        platform.clone(),
        probe_target,
        config.probe_interval(),
        config.probe_timeout(),
    );
    let monitor_task = tokio::spawn(monitor.run());

    let engine = DeliveryEngine::new(db.clone(), client)
        .with_notifier(Arc::new(TracingNotifier::new(config.notifications.enabled)));
    let provider = location_provider(&config)?;

    let result = if tracking.auto_tracking {
        run_tracking(
            engine,
            Arc::new(platform),
            provider,
            tracking.tracking_interval_minutes,
        )
        .await
    } else {
        info!("Auto-tracking disabled, draining queue once");
        engine
            .drain_queue()
            .await
            .map(|outcome| {
                info!(
                    synced = outcome.synced_count(),
                    remaining = outcome.remaining_queue.len(),
                    "Queue drained"
                )
            })
            .map_err(Into::into)
    };

    shutdown_services(&mailbox, &monitor_handle).await;
    let _ = inbox_task.await;
    let _ = monitor_task.await;
    db.close().await;

    info!("TrackPoint agent stopped");
    result
}

/// Initializes the tracing subscriber.
///
/// `RUST_LOG` overrides the default filter.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,trackpoint=debug,sqlx=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// Writes configured endpoint URLs into the stored tracking config.
async fn seed_endpoints(config: &AgentConfig, settings: &ConfigService) -> anyhow::Result<()> {
    let patch = ConfigPatch {
        login_url: config.seed.login_url.clone(),
        routes_url: config.seed.routes_url.clone(),
        ..Default::default()
    };
    if patch.is_empty() {
        return Ok(());
    }

    settings
        .update_config(&patch)
        .await
        .context("Failed to seed endpoint URLs")?;
    Ok(())
}

/// Logs in with the configured account when no session is stored.
///
/// A failed login is not fatal: events are still captured and queued.
async fn ensure_session(config: &AgentConfig, auth: &AuthService) {
    match auth.is_authenticated().await {
        Ok(true) => return,
        Ok(false) => {}
        Err(e) => {
            error!(error = %e, "Failed to read stored session");
            return;
        }
    }

    let Some((email, password)) = config.account.credentials() else {
        warn!("No stored session and no account configured; deliveries will be queued");
        return;
    };

    if let Err(e) = auth.login(email, password).await {
        warn!(error = %e, "Startup login failed; deliveries will be queued");
    }
}

fn location_provider(config: &AgentConfig) -> anyhow::Result<Arc<dyn LocationProvider>> {
    let location = &config.location;
    match location.source {
        LocationSource::Fixed => Ok(Arc::new(FixedLocationProvider::new(
            location.latitude,
            location.longitude,
        ))),
        LocationSource::File => match location.path {
            Some(ref path) => Ok(Arc::new(FileLocationProvider::new(path.clone()))),
            None => bail!("location.path is required for the file source"),
        },
    }
}

/// Runs the background trigger and the auto-tracking loop until a shutdown
/// signal arrives.
async fn run_tracking(
    engine: DeliveryEngine,
    platform: Arc<LocalPlatform>,
    provider: Arc<dyn LocationProvider>,
    interval_minutes: u32,
) -> anyhow::Result<()> {
    let network = platform.network_status();
    let trigger = SyncTrigger::new(engine.clone(), platform)
        .with_background_capture(provider.clone());
    let strategy = trigger.start(interval_minutes).await?;
    info!(%strategy, interval_minutes, "Background sync started");

    let producer = Arc::new(ForegroundProducer::new(engine, provider, network));
    let auto_tracking =
        producer.spawn_auto_tracking(Duration::from_secs(u64::from(interval_minutes) * 60));

    shutdown_signal().await;

    auto_tracking.stop().await;
    trigger.stop().await?;

    match trigger.status().await {
        Ok(status) => info!(pending = status.pending_count, "Pending events left in queue"),
        Err(e) => warn!(error = %e, "Failed to read final trigger status"),
    }
    Ok(())
}

async fn shutdown_services(mailbox: &BackgroundMailbox, monitor: &ConnectivityMonitorHandle) {
    if let Err(e) = monitor.shutdown().await {
        warn!(error = %e, "Connectivity monitor already stopped");
    }
    if let Err(e) = mailbox.shutdown().await {
        warn!(error = %e, "Background inbox already stopped");
    }
}

/// Waits for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, stopping agent...");
}
