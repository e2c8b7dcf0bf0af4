//! # Route Client
//!
//! The only component that talks to the network.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  POST <routesUrl>                                                       │
//! │    Authorization: Bearer <token>                                       │
//! │    Content-Type: application/json                                      │
//! │    {"name", "coordinates": [{latitude, longitude, timestamp}], ...}    │
//! │                                                                         │
//! │    2xx + JSON body ──► Ok(body)                                        │
//! │    2xx, not JSON   ──► InvalidResponse                                 │
//! │    non-2xx         ──► Server { status, message }                      │
//! │    transport       ──► ConnectionFailed | Timeout                      │
//! │                                                                         │
//! │  POST <loginUrl>  {"email", "password"}                                │
//! │    2xx ──► AuthSession { token, userId, username }                     │
//! │    else ──► AuthFailed(body.message)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Deserializer};
use tracing::{debug, warn};

use trackpoint_core::{AuthSession, LoginCredentials, RoutePayload};

use crate::error::{SyncError, SyncResult};

const DEFAULT_LOGIN_FAILURE: &str = "Login failed";

/// HTTP client for the login and route endpoints.
///
/// Every request carries the same bounded timeout.
#[derive(Debug, Clone)]
pub struct RouteClient {
    http: Client,
    timeout: Duration,
}

impl RouteClient {
    pub fn new(timeout: Duration) -> SyncResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| SyncError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(RouteClient { http, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Posts one route with a bearer token.
    pub async fn post_route(
        &self,
        url: &str,
        token: &str,
        payload: &RoutePayload,
    ) -> SyncResult<serde_json::Value> {
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = error_message(response, status).await;
            return Err(SyncError::Server {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| {
            SyncError::InvalidResponse(format!("{} returned non-JSON body: {}", status, e))
        })
    }

    /// Exchanges credentials for a session.
    pub async fn login(&self, url: &str, credentials: &LoginCredentials) -> SyncResult<AuthSession> {
        let response = self.http.post(url).json(credentials).send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ErrorBody>()
                .await
                .ok()
                .and_then(|body| body.message)
                .unwrap_or_else(|| DEFAULT_LOGIN_FAILURE.to_string());
            warn!(status = status.as_u16(), "Login rejected");
            return Err(SyncError::AuthFailed(message));
        }

        let body: LoginResponse = response.json().await?;
        debug!(user_id = %body.user_id, "Login succeeded");

        Ok(AuthSession {
            token: body.token,
            user_id: body.user_id,
            username: body.username,
        })
    }
}

// =============================================================================
// Response Bodies
// =============================================================================

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    token: String,
    #[serde(deserialize_with = "string_or_number")]
    user_id: String,
    username: String,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}

/// The body's `message`, or the status reason phrase.
async fn error_message(response: Response, status: StatusCode) -> String {
    let fallback = status
        .canonical_reason()
        .unwrap_or("Unknown status")
        .to_string();

    match response.json::<ErrorBody>().await {
        Ok(ErrorBody {
            message: Some(message),
        }) => message,
        _ => fallback,
    }
}
