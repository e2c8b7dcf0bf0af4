//! # Domain Types
//!
//! Core data structures shared by the store, the delivery engine and the
//! producers.
//!
//! ## Event Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Location Event Lifecycle                             │
//! │                                                                         │
//! │  Position (captured)                                                   │
//! │       │  RoutePayload::single(name, &position)                         │
//! │       ▼                                                                 │
//! │  RoutePayload ──── POST <routesUrl> ────► 2xx  (retired)               │
//! │       │                                                                 │
//! │       │ delivery failed                                                │
//! │       ▼                                                                 │
//! │  PendingLocationEvent { id, payload, createdAt }                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  pending queue ──── drain ──► removed (succeeded) | kept (failed)      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## TypeScript Generation
//! Wire types derive `TS` so a web front end can share them.
//! Run `cargo test` to export bindings.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::config::TrackingConfig;

/// Name used for events produced by an automatic (interval or wake) cycle.
pub const AUTOMATIC_EVENT_NAME: &str = "Automatic position";

/// Name used for events produced by a manual send.
pub fn manual_event_name(username: &str) -> String {
    format!("Position {}", username)
}

// =============================================================================
// Wire Types
// =============================================================================

/// A single point of a route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,

    /// ISO-8601 capture time.
    #[ts(as = "String")]
    pub timestamp: DateTime<Utc>,
}

/// Body of `POST <routesUrl>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct RoutePayload {
    pub name: String,
    pub coordinates: Vec<Coordinate>,

    /// Distance covered by the route. Always 0 for single-point routes.
    pub distance: f64,
}

impl RoutePayload {
    /// Builds a one-point route from a captured position.
    pub fn single(name: impl Into<String>, position: &Position) -> Self {
        RoutePayload {
            name: name.into(),
            coordinates: vec![Coordinate {
                latitude: position.latitude,
                longitude: position.longitude,
                timestamp: position.captured_at,
            }],
            distance: 0.0,
        }
    }
}

/// A location event waiting in the pending queue.
///
/// `id` is unique within the queue; the store enforces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct PendingLocationEvent {
    pub id: String,
    pub payload: RoutePayload,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl PendingLocationEvent {
    /// Wraps a payload with a fresh UUID v4 id.
    pub fn new(payload: RoutePayload) -> Self {
        PendingLocationEvent {
            id: Uuid::new_v4().to_string(),
            payload,
            created_at: Utc::now(),
        }
    }
}

/// Authenticated user session returned by the login endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct AuthSession {
    pub token: String,
    pub user_id: String,
    pub username: String,
}

impl AuthSession {
    /// Returns the bearer token if it is non-empty.
    pub fn bearer(&self) -> Option<&str> {
        let token = self.token.trim();
        (!token.is_empty()).then_some(token)
    }
}

/// Body of `POST <loginUrl>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginCredentials {
    pub email: String,
    pub password: String,
}

/// Foreground-to-background message.
///
/// Serialized as `{"type": "CONFIG_UPDATE", "config": {...}, "auth": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export)]
pub enum BackgroundMessage {
    /// Full overwrite of the background context's config and auth.
    ConfigUpdate {
        config: TrackingConfig,
        auth: Option<AuthSession>,
    },
}

// =============================================================================
// Capture Types
// =============================================================================

/// A position reading from a location provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,

    /// Horizontal accuracy in meters, when the source reports it.
    pub accuracy_m: Option<f64>,

    pub captured_at: DateTime<Utc>,
}

/// Accuracy, timeout and staleness settings for one capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureOptions {
    pub high_accuracy: bool,

    /// How long to wait for a reading.
    pub timeout: Duration,

    /// Oldest acceptable reading.
    pub maximum_age: Duration,
}

impl CaptureOptions {
    /// Settings for foreground (manual and interval) captures.
    pub fn foreground() -> Self {
        CaptureOptions {
            high_accuracy: true,
            timeout: Duration::from_secs(15),
            maximum_age: Duration::from_secs(10),
        }
    }

    /// Settings for captures made from a background wake.
    pub fn background() -> Self {
        CaptureOptions {
            high_accuracy: true,
            timeout: Duration::from_secs(10),
            maximum_age: Duration::from_secs(60),
        }
    }
}

// =============================================================================
// Connectivity
// =============================================================================

/// Last known network reachability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkStatus {
    /// Not probed yet, or the probe result is inconclusive.
    #[default]
    Unknown,
    Online,
    Offline,
}

impl NetworkStatus {
    /// True only when the device is known to be offline.
    pub fn is_confirmed_offline(&self) -> bool {
        matches!(self, NetworkStatus::Offline)
    }
}

impl std::fmt::Display for NetworkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkStatus::Unknown => write!(f, "unknown"),
            NetworkStatus::Online => write!(f, "online"),
            NetworkStatus::Offline => write!(f, "offline"),
        }
    }
}

// =============================================================================
// Drain Outcome
// =============================================================================

/// Result of one drain over a snapshot of the pending queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainOutcome {
    /// Number of events a send was issued for.
    pub attempted_count: usize,

    /// Ids whose send returned 2xx, in queue order.
    pub succeeded_ids: Vec<String>,

    /// Queue after the drain: the snapshot minus `succeeded_ids`, order kept.
    pub remaining_queue: Vec<PendingLocationEvent>,
}

impl DrainOutcome {
    /// Outcome of a drain that did not send anything.
    pub fn untouched(queue: Vec<PendingLocationEvent>) -> Self {
        DrainOutcome {
            attempted_count: 0,
            succeeded_ids: Vec::new(),
            remaining_queue: queue,
        }
    }

    pub fn synced_count(&self) -> usize {
        self.succeeded_ids.len()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
