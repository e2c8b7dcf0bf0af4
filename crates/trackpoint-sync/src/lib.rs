//! # trackpoint-sync: Delivery Engine and Sync Triggers
//!
//! Offline-tolerant store-and-forward delivery of location events.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        TrackPoint Delivery                              │
//! │                                                                         │
//! │  ┌────────────────────┐         ┌────────────────────────────────────┐ │
//! │  │ ForegroundProducer │         │ SyncTrigger                        │ │
//! │  │                    │         │                                    │ │
//! │  │ send_now (manual)  │         │ ConnectivitySignal | PeriodicWake  │ │
//! │  │ auto_tick (timer)  │         │ | TimerPlusKeepAlive               │ │
//! │  └─────────┬──────────┘         └─────────────────┬──────────────────┘ │
//! │            │ send_payload                         │ drain_guarded      │
//! │            ▼                                      ▼                    │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │ DeliveryEngine ──► RouteClient ──► POST <routesUrl>             │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ load / enqueue / remove_many          │
//! │                                ▼                                        │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │ trackpoint-store (foreground + background scopes, shared queue) │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                ▲                                        │
//! │  AuthService / ConfigService ──┘   BackgroundMailbox ──► BackgroundInbox│
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`client`] - HTTP login and route delivery
//! - [`delivery`] - Single sends and queue drains
//! - [`trigger`] - Background wake strategies
//! - [`platform`] - Wake primitives and the local connectivity monitor
//! - [`producer`] - Manual and automatic captures
//! - [`location`] - Position providers
//! - [`notify`] - Sync notifications
//! - [`auth`] / [`settings`] - Foreground session and config services
//! - [`inbox`] - Foreground-to-background config push
//! - [`config`] - Agent configuration
//! - [`error`] - Sync error types

pub mod auth;
pub mod client;
pub mod config;
pub mod delivery;
pub mod error;
pub mod inbox;
pub mod location;
pub mod notify;
pub mod platform;
pub mod producer;
pub mod settings;
pub mod trigger;

#[cfg(test)]
mod test_support;

pub use auth::AuthService;
pub use client::RouteClient;
pub use config::{AgentConfig, LocationSource};
pub use delivery::{ApplyPermit, DeliveryEngine, DeliveryTarget, RunEpoch, RunGuard};
pub use error::{SyncError, SyncResult};
pub use inbox::{BackgroundInbox, BackgroundMailbox};
pub use location::{capture, FileLocationProvider, FixedLocationProvider, LocationProvider};
pub use notify::{
    NoOpNotifier, Notification, NotificationPermission, SyncNotifier, TracingNotifier,
};
pub use platform::{
    ConnectivityMonitor, ConnectivityMonitorHandle, LocalPlatform, PlatformCapabilities,
    WakePlatform,
};
pub use producer::{AutoTick, AutoTrackingHandle, ForegroundProducer, SendReport};
pub use settings::ConfigService;
pub use trigger::{SyncTrigger, TriggerState, TriggerStatus, TriggerStrategy};
