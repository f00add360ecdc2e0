//! Remote store and course registry over HTTP
//!
//! Endpoints, relative to `remote.base_url`:
//! - `POST /behavior-events`     one interaction with device info
//! - `POST /preferences-sync`    full snapshot; 409 signals a conflict
//! - `GET  /adaptive-preferences` server copy of the snapshot
//! - `GET  /course/{id}`         course display name

use anyhow::Result;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{AdaptiveSnapshot, BehaviorEventPayload, PreferencesSyncRequest};
use crate::error::SyncError;

/// Env var holding the bearer token for the remote API
pub const API_TOKEN_ENV: &str = "ADAPTIVE_API_TOKEN";

/// Result of pushing a snapshot
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    Accepted(Value),
    /// Server answered 409; body carries both copies
    Conflict(Value),
}

/// Best-effort persistence for behavior events and snapshots
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn push_event(&self, payload: &BehaviorEventPayload) -> Result<Value, SyncError>;

    async fn push_snapshot(&self, request: &PreferencesSyncRequest) -> Result<PushOutcome, SyncError>;

    async fn fetch_snapshot(&self) -> Result<AdaptiveSnapshot, SyncError>;
}

/// Lookup of course display names
#[async_trait]
pub trait CourseRegistry: Send + Sync {
    /// `Ok(None)` when the registry has no usable name for the course
    async fn course_name(&self, course_id: &str) -> Result<Option<String>, SyncError>;
}

/// Client environment attached to each behavior event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub user_agent: String,
    pub platform: String,
    pub timezone: String,
}

impl DeviceInfo {
    pub fn current() -> Self {
        Self {
            user_agent: format!("adaptive-layout/{}", env!("CARGO_PKG_VERSION")),
            platform: std::env::consts::OS.to_string(),
            timezone: chrono::Local::now().format("%:z").to_string(),
        }
    }
}

/// Envelope returned by `GET /adaptive-preferences`
#[derive(Debug, Deserialize)]
struct SnapshotEnvelope {
    #[serde(default)]
    success: bool,
    preferences: Option<AdaptiveSnapshot>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CourseEnvelope {
    course: Option<CourseRecord>,
}

#[derive(Debug, Deserialize)]
struct CourseRecord {
    subject: Option<String>,
    name: Option<String>,
}

/// HTTP implementation of both remote traits
#[derive(Debug, Clone)]
pub struct HttpRemote {
    base_url: String,
    api_token: Option<String>,
    client: reqwest::Client,
}

impl HttpRemote {
    pub fn new(base_url: &str, api_token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("adaptive-layout/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
            client,
        })
    }

    /// Build from a base URL, reading the token from `ADAPTIVE_API_TOKEN`
    pub fn from_env(base_url: &str) -> Result<Self> {
        let token = std::env::var(API_TOKEN_ENV).ok().filter(|t| !t.is_empty());
        Self::new(base_url, token)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn read_json(response: reqwest::Response) -> Result<Value, SyncError> {
        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// Treat `{"success": false, "error": ...}` bodies as failures
    fn check_body(body: Value) -> Result<Value, SyncError> {
        if body.get("success").and_then(Value::as_bool) == Some(false) {
            let message = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Err(SyncError::Rejected(message));
        }
        Ok(body)
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn push_event(&self, payload: &BehaviorEventPayload) -> Result<Value, SyncError> {
        debug!("POST behavior-events ({})", payload.interaction_type);
        let response = self
            .authorize(self.client.post(self.url("behavior-events")))
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Status(status.as_u16()));
        }
        Self::check_body(Self::read_json(response).await?)
    }

    async fn push_snapshot(&self, request: &PreferencesSyncRequest) -> Result<PushOutcome, SyncError> {
        debug!("POST preferences-sync ({:?})", request.conflict_resolution);
        let response = self
            .authorize(self.client.post(self.url("preferences-sync")))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::CONFLICT {
            return Ok(PushOutcome::Conflict(Self::read_json(response).await?));
        }
        if !status.is_success() {
            return Err(SyncError::Status(status.as_u16()));
        }
        Ok(PushOutcome::Accepted(Self::check_body(
            Self::read_json(response).await?,
        )?))
    }

    async fn fetch_snapshot(&self) -> Result<AdaptiveSnapshot, SyncError> {
        debug!("GET adaptive-preferences");
        let response = self
            .authorize(self.client.get(self.url("adaptive-preferences")))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Status(status.as_u16()));
        }

        let envelope: SnapshotEnvelope = serde_json::from_value(Self::read_json(response).await?)?;
        match envelope.preferences {
            Some(snapshot) if envelope.success => Ok(snapshot),
            _ => Err(SyncError::Rejected(
                envelope.error.unwrap_or_else(|| "no preferences returned".to_string()),
            )),
        }
    }
}

#[async_trait]
impl CourseRegistry for HttpRemote {
    async fn course_name(&self, course_id: &str) -> Result<Option<String>, SyncError> {
        let response = self
            .authorize(self.client.get(self.url(&format!("course/{}", course_id))))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(SyncError::Status(status.as_u16()));
        }

        let envelope: CourseEnvelope = serde_json::from_value(Self::read_json(response).await?)?;
        Ok(envelope
            .course
            .and_then(|c| c.subject.or(c.name))
            .filter(|name| !name.trim().is_empty()))
    }
}

/// Stand-in when no remote is configured; every call fails fast
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalOnlyRemote;

#[async_trait]
impl RemoteStore for LocalOnlyRemote {
    async fn push_event(&self, _payload: &BehaviorEventPayload) -> Result<Value, SyncError> {
        Err(SyncError::NotConfigured)
    }

    async fn push_snapshot(&self, _request: &PreferencesSyncRequest) -> Result<PushOutcome, SyncError> {
        Err(SyncError::NotConfigured)
    }

    async fn fetch_snapshot(&self) -> Result<AdaptiveSnapshot, SyncError> {
        Err(SyncError::NotConfigured)
    }
}

#[async_trait]
impl CourseRegistry for LocalOnlyRemote {
    async fn course_name(&self, _course_id: &str) -> Result<Option<String>, SyncError> {
        Ok(None)
    }
}
