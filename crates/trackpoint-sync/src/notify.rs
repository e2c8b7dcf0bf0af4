//! # Sync Notifications
//!
//! Best-effort, permission-gated "synced N locations" notices fired after a
//! drain that delivered at least one event.

use tracing::{debug, info};

/// Title of every sync notification.
pub const NOTIFICATION_TITLE: &str = "TrackPoint";

/// Notification permission as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotificationPermission {
    Granted,
    Denied,
    /// Never asked.
    #[default]
    Default,
}

/// A user-visible notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
}

impl Notification {
    /// Summary for a drain that synced `count` events.
    pub fn synced(count: usize) -> Self {
        Notification {
            title: NOTIFICATION_TITLE.to_string(),
            body: format!("Synced {} location(s)", count),
        }
    }
}

/// Sink for sync notifications.
///
/// Implementations must not fail the caller; delivery is best effort.
pub trait SyncNotifier: Send + Sync {
    fn permission(&self) -> NotificationPermission;

    fn notify(&self, notification: &Notification);
}

/// Shows `notification` only when permission is granted.
///
/// Returns whether it was shown.
pub fn notify_if_permitted(notifier: &dyn SyncNotifier, notification: &Notification) -> bool {
    match notifier.permission() {
        NotificationPermission::Granted => {
            notifier.notify(notification);
            true
        }
        permission => {
            debug!(?permission, "Skipping notification without permission");
            false
        }
    }
}

// =============================================================================
// Implementations
// =============================================================================

/// Drops every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpNotifier;

impl SyncNotifier for NoOpNotifier {
    fn permission(&self) -> NotificationPermission {
        NotificationPermission::Denied
    }

    fn notify(&self, _notification: &Notification) {}
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy)]
pub struct TracingNotifier {
    permission: NotificationPermission,
}

impl TracingNotifier {
    pub fn new(enabled: bool) -> Self {
        TracingNotifier {
            permission: if enabled {
                NotificationPermission::Granted
            } else {
                NotificationPermission::Denied
            },
        }
    }
}

impl SyncNotifier for TracingNotifier {
    fn permission(&self) -> NotificationPermission {
        self.permission
    }

    fn notify(&self, notification: &Notification) {
        info!(title = %notification.title, "{}", notification.body);
    }
}
