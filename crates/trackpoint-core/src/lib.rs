//! # trackpoint-core: Pure Domain Types
//!
//! Types and rules shared by every TrackPoint crate.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        TrackPoint Layers                                │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │               ★ trackpoint-core (THIS CRATE) ★                  │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │  config   │  │   error   │  │ validation│  │   │
//! │  │   │  Event    │  │ Tracking  │  │ Capture   │  │ interval  │  │   │
//! │  │   │  Payload  │  │ Config    │  │ Validation│  │ url, lat  │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK                            │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │              trackpoint-store (Persistent Store)                │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │     trackpoint-sync (Delivery Engine, Triggers, Producer)       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Events, payloads, auth session, capture types
//! - [`config`] - Tracking configuration with defaults and patch merging
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation

pub mod config;
pub mod error;
pub mod types;
pub mod validation;

pub use config::{ConfigPatch, TrackingConfig};
pub use error::{CaptureError, CoreError, CoreResult, ValidationError};
pub use types::{
    manual_event_name, AuthSession, BackgroundMessage, CaptureOptions, Coordinate, DrainOutcome,
    LoginCredentials, NetworkStatus, PendingLocationEvent, Position, RoutePayload,
    AUTOMATIC_EVENT_NAME,
};

/// Tag under which connectivity and periodic wakes are registered.
pub const SYNC_TAG: &str = "sync-locations";
