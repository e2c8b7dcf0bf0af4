//! Shared fixtures for the sync tests: an in-memory store, a stub ingestion
//! server and a wake platform with failure injection.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;
use tokio::sync::watch;

use trackpoint_core::{
    AuthSession, BackgroundMessage, Coordinate, LoginCredentials, NetworkStatus,
    PendingLocationEvent, RoutePayload, TrackingConfig,
};
use trackpoint_store::{Database, DbConfig};

use crate::error::{SyncError, SyncResult};
use crate::notify::{Notification, NotificationPermission, SyncNotifier};
use crate::platform::{
    KeepAlive, LocalPlatform, PeriodicRegistration, PlatformCapabilities, SyncRegistration,
    WakePlatform,
};

/// Routes URL nothing listens on.
pub(crate) const UNREACHABLE_ROUTES_URL: &str = "http://127.0.0.1:1/api/routes";

pub(crate) async fn memory_db() -> Database {
    Database::new(DbConfig::in_memory()).await.unwrap()
}

pub(crate) fn session() -> AuthSession {
    AuthSession {
        token: "tok".into(),
        user_id: "42".into(),
        username: "ana".into(),
    }
}

/// One-point payload. The stub server answers by `name`.
pub(crate) fn position_payload(name: &str) -> RoutePayload {
    RoutePayload {
        name: name.to_string(),
        coordinates: vec![Coordinate {
            latitude: -34.6037,
            longitude: -58.3816,
            timestamp: Utc::now(),
        }],
        distance: 0.0,
    }
}

pub(crate) fn event(name: &str) -> PendingLocationEvent {
    PendingLocationEvent::new(position_payload(name))
}

/// Pushes a session and `routes_url` into the background scope.
pub(crate) async fn push_session(db: &Database, routes_url: &str) {
    db.apply_message(&BackgroundMessage::ConfigUpdate {
        config: TrackingConfig {
            routes_url: routes_url.to_string(),
            ..Default::default()
        },
        auth: Some(session()),
    })
    .await
    .unwrap();
}

/// Polls `check` until it holds or `timeout` passes.
pub(crate) async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// =============================================================================
// Stub Server
// =============================================================================

#[derive(Default)]
struct StubState {
    route_calls: AtomicUsize,
    login_calls: AtomicUsize,
    rejecting: AtomicBool,
    route_names: Mutex<Vec<String>>,
    last_authorization: Mutex<Option<String>>,
}

/// Local ingestion endpoint.
///
/// Routes are answered by payload name: `fail` → 500, `text` → 200 with a
/// plain-text body, `slow` → 200 after 5 s, anything else → 201 JSON.
#[derive(Clone)]
pub(crate) struct StubServer {
    addr: SocketAddr,
    state: Arc<StubState>,
}

impl StubServer {
    pub(crate) async fn start() -> Self {
        let state = Arc::new(StubState::default());
        let app = Router::new()
            .route("/api/routes", post(routes))
            .route("/api/login", post(login))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        StubServer { addr, state }
    }

    pub(crate) fn routes_url(&self) -> String {
        format!("http://{}/api/routes", self.addr)
    }

    pub(crate) fn login_url(&self) -> String {
        format!("http://{}/api/login", self.addr)
    }

    /// Answer every route with 503.
    pub(crate) fn set_rejecting(&self, rejecting: bool) {
        self.state.rejecting.store(rejecting, Ordering::SeqCst);
    }

    pub(crate) fn route_calls(&self) -> usize {
        self.state.route_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn login_calls(&self) -> usize {
        self.state.login_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn route_names(&self) -> Vec<String> {
        self.state.route_names.lock().unwrap().clone()
    }

    pub(crate) fn last_route_name(&self) -> Option<String> {
        self.route_names().last().cloned()
    }

    pub(crate) fn last_authorization(&self) -> Option<String> {
        self.state.last_authorization.lock().unwrap().clone()
    }
}

async fn routes(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
    Json(payload): Json<RoutePayload>,
) -> Response {
    state.route_calls.fetch_add(1, Ordering::SeqCst);
    state.route_names.lock().unwrap().push(payload.name.clone());
    *state.last_authorization.lock().unwrap() = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if state.rejecting.load(Ordering::SeqCst) {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "message": "unavailable" })),
        )
            .into_response();
    }

    match payload.name.as_str() {
        "fail" => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "message": "rejected" })),
        )
            .into_response(),
        "text" => (StatusCode::OK, "accepted").into_response(),
        "slow" => {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Json(json!({ "ok": true })).into_response()
        }
        _ => (StatusCode::CREATED, Json(json!({ "ok": true }))).into_response(),
    }
}

async fn login(
    State(state): State<Arc<StubState>>,
    Json(credentials): Json<LoginCredentials>,
) -> Response {
    state.login_calls.fetch_add(1, Ordering::SeqCst);

    if credentials.password == "secret" {
        Json(json!({ "token": "stub-token", "userId": 42, "username": "ana" })).into_response()
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "Invalid credentials" })),
        )
            .into_response()
    }
}

// =============================================================================
// Fake Platform
// =============================================================================

/// A [`LocalPlatform`] with overridable capabilities, a failing periodic
/// registration option and registration counters.
pub(crate) struct FakePlatform {
    pub(crate) local: LocalPlatform,
    capabilities: PlatformCapabilities,
    fail_periodic: AtomicBool,
    connectivity_registrations: AtomicUsize,
    periodic_registrations: AtomicUsize,
    keep_alive_acquisitions: AtomicUsize,
}

impl FakePlatform {
    pub(crate) fn new(capabilities: PlatformCapabilities) -> Arc<Self> {
        Self::build(capabilities, false)
    }

    /// Advertises periodic wakes but refuses every registration.
    pub(crate) fn failing_periodic(capabilities: PlatformCapabilities) -> Arc<Self> {
        Self::build(capabilities, true)
    }

    fn build(capabilities: PlatformCapabilities, fail_periodic: bool) -> Arc<Self> {
        Arc::new(FakePlatform {
            local: LocalPlatform::new(PlatformCapabilities {
                connectivity_signal: true,
                periodic_wake: true,
                keep_alive: true,
            }),
            capabilities,
            fail_periodic: AtomicBool::new(fail_periodic),
            connectivity_registrations: AtomicUsize::new(0),
            periodic_registrations: AtomicUsize::new(0),
            keep_alive_acquisitions: AtomicUsize::new(0),
        })
    }

    /// Refuses (or accepts again) later periodic registrations.
    pub(crate) fn set_failing_periodic(&self, failing: bool) {
        self.fail_periodic.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn connectivity_registrations(&self) -> usize {
        self.connectivity_registrations.load(Ordering::SeqCst)
    }

    pub(crate) fn periodic_registrations(&self) -> usize {
        self.periodic_registrations.load(Ordering::SeqCst)
    }

    pub(crate) fn keep_alive_acquisitions(&self) -> usize {
        self.keep_alive_acquisitions.load(Ordering::SeqCst)
    }
}

impl WakePlatform for FakePlatform {
    fn capabilities(&self) -> PlatformCapabilities {
        self.capabilities
    }

    fn register_connectivity_sync(&self, tag: &str) -> SyncResult<SyncRegistration> {
        self.connectivity_registrations.fetch_add(1, Ordering::SeqCst);
        self.local.register_connectivity_sync(tag)
    }

    fn register_periodic(&self, tag: &str, interval: Duration) -> SyncResult<PeriodicRegistration> {
        self.periodic_registrations.fetch_add(1, Ordering::SeqCst);
        if self.fail_periodic.load(Ordering::SeqCst) {
            return Err(SyncError::RegistrationFailed("denied by platform".into()));
        }
        self.local.register_periodic(tag, interval)
    }

    fn acquire_keep_alive(&self) -> SyncResult<KeepAlive> {
        self.keep_alive_acquisitions.fetch_add(1, Ordering::SeqCst);
        self.local.acquire_keep_alive()
    }

    fn network_status(&self) -> watch::Receiver<NetworkStatus> {
        self.local.network_status()
    }
}

// =============================================================================
// Recording Notifier
// =============================================================================

/// Keeps every notification in memory.
#[derive(Debug, Default)]
pub(crate) struct RecordingNotifier {
    permission: NotificationPermission,
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub(crate) fn granted() -> Self {
        RecordingNotifier {
            permission: NotificationPermission::Granted,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_permission(permission: NotificationPermission) -> Self {
        RecordingNotifier {
            permission,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn sent(&self) -> Vec<Notification> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl SyncNotifier for RecordingNotifier {
    fn permission(&self) -> NotificationPermission {
        self.permission
    }

    fn notify(&self, notification: &Notification) {
        match self.sent.lock() {
            Ok(mut sent) => sent.push(notification.clone()),
            Err(poisoned) => poisoned.into_inner().push(notification.clone()),
        }
    }
}
