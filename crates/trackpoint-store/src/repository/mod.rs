//! # Repository Module
//!
//! ## Available Repositories
//!
//! - [`SettingsRepository`](settings::SettingsRepository) - Scoped config and auth documents
//! - [`PendingEventRepository`](pending::PendingEventRepository) - Keyed pending-event queue

pub mod pending;
pub mod settings;
