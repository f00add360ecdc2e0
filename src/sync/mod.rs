//! Sync module for remote persistence of adaptive layout state
//!
//! Local writes always land in the cache first; the remote store is
//! best-effort. Failed or offline writes go to an in-memory retry queue
//! that drains when connectivity returns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub mod export;
pub mod queue;
pub mod remote;
pub mod service;

pub use export::{export_state, merge_bundle, read_bundle, ExportBundle, ImportResult, MergeStrategy};
pub use remote::{CourseRegistry, DeviceInfo, HttpRemote, LocalOnlyRemote, RemoteStore};
pub use service::{DrainReport, SyncService};

use crate::learning::BehaviorAggregate;
use crate::storage::{AdaptiveSettings, LayoutPreferences};

/// Policy sent with a preferences sync when the server copy is newer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Server merges the client's data over its own
    #[default]
    ClientWins,
    /// Server keeps its copy and discards the client's changes
    ServerWins,
    /// Server answers 409 with both copies for the user to resolve
    Manual,
}

/// Full adaptive state as stored locally and exchanged with the remote
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdaptiveSnapshot {
    #[serde(default)]
    pub interaction_patterns: BehaviorAggregate,
    #[serde(default)]
    pub layout_preferences: LayoutPreferences,
    #[serde(default)]
    pub adaptive_settings: AdaptiveSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_adaptation: Option<DateTime<Utc>>,
    /// Server-side revision, echoed back untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

/// Body of `POST /behavior-events`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BehaviorEventPayload {
    pub interaction_type: String,
    pub details: Map<String, Value>,
    pub device_info: DeviceInfo,
}

/// Body of `POST /preferences-sync`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesSyncRequest {
    pub client_data: AdaptiveSnapshot,
    pub last_sync: Option<DateTime<Utc>>,
    pub conflict_resolution: ConflictResolution,
}

/// A write waiting to reach the remote store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum SyncPayload {
    Behavior(BehaviorEventPayload),
    Preferences(AdaptiveSnapshot),
}

impl SyncPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Behavior(_) => "behavior",
            Self::Preferences(_) => "preferences",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQueueItem {
    pub id: Uuid,
    #[serde(flatten)]
    pub payload: SyncPayload,
    pub timestamp: DateTime<Utc>,
    pub retry_count: u32,
}

impl SyncQueueItem {
    pub fn new(payload: SyncPayload, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            timestamp,
            retry_count: 0,
        }
    }
}

/// Outcome of a single sync call; never an error to the caller
#[derive(Debug, Clone, PartialEq)]
pub enum SyncResult {
    /// Remote acknowledged the write
    Synced(Value),
    /// Remote copy is newer and the policy asked for manual resolution
    Conflict(Value),
    /// Device offline; the write was queued without an attempt
    Offline,
    /// Attempt failed; the write was queued for retry
    Failed(String),
}

/// Read-only projection for status indicators
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_online: bool,
    pub last_sync: Option<DateTime<Utc>>,
    pub has_conflicts: bool,
    pub pending_changes: usize,
}
