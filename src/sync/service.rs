//! Sync service - best-effort remote writes with an offline retry queue
//!
//! Connectivity states:
//! - `OnlineIdle`: writes go straight to the remote
//! - `OnlineDraining`: the queue is being replayed, one item at a time
//! - `Offline`: writes queue without an attempt
//!
//! Only one drain runs at a time. A drain pauses (without charging the
//! head item an attempt) as soon as the device goes offline.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::queue::SyncQueue;
use super::remote::{PushOutcome, RemoteStore};
use super::{
    AdaptiveSnapshot, BehaviorEventPayload, ConflictResolution, PreferencesSyncRequest, SyncPayload,
    SyncQueueItem, SyncResult, SyncStatus,
};
use crate::clock::Clock;
use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    OnlineIdle,
    OnlineDraining,
    Offline,
}

/// Summary of one queue drain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub synced: usize,
    pub conflicts: usize,
    pub dropped: usize,
    pub remaining: usize,
}

#[derive(Debug, Default)]
struct SyncState {
    queue: SyncQueue,
    online: bool,
    draining: bool,
    last_sync: Option<DateTime<Utc>>,
    has_conflicts: bool,
}

pub struct SyncService {
    remote: Arc<dyn RemoteStore>,
    clock: Arc<dyn Clock>,
    policy: ConflictResolution,
    timeout: Duration,
    state: Mutex<SyncState>,
}

impl SyncService {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        clock: Arc<dyn Clock>,
        policy: ConflictResolution,
        timeout: Duration,
        online: bool,
    ) -> Self {
        Self {
            remote,
            clock,
            policy,
            timeout,
            state: Mutex::new(SyncState {
                online,
                ..Default::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn status(&self) -> SyncStatus {
        let state = self.state();
        SyncStatus {
            is_online: state.online,
            last_sync: state.last_sync,
            has_conflicts: state.has_conflicts,
            pending_changes: state.queue.len(),
        }
    }

    pub fn connectivity(&self) -> ConnectivityState {
        let state = self.state();
        match (state.online, state.draining) {
            (false, _) => ConnectivityState::Offline,
            (true, true) => ConnectivityState::OnlineDraining,
            (true, false) => ConnectivityState::OnlineIdle,
        }
    }

    pub fn is_online(&self) -> bool {
        self.state().online
    }

    /// Copy of the queued writes, head first
    pub fn pending(&self) -> Vec<SyncQueueItem> {
        self.state().queue.iter().cloned().collect()
    }

    /// Forget queued snapshot pushes, e.g. after the snapshot was reset
    pub fn discard_queued_preferences(&self) -> usize {
        let dropped = self.state().queue.discard_preferences();
        if dropped > 0 {
            debug!("Discarded {} queued preference syncs", dropped);
        }
        dropped
    }

    /// Report a connectivity change; coming online starts a drain
    #[allow(dead_code)]
    pub async fn set_online(&self, online: bool) -> DrainReport {
        let was_online = {
            let mut state = self.state();
            std::mem::replace(&mut state.online, online)
        };

        if online && !was_online {
            info!("Connectivity restored, draining sync queue");
            self.process_queue().await
        } else {
            if !online && was_online {
                info!("Connectivity lost, queueing writes");
            }
            DrainReport {
                remaining: self.state().queue.len(),
                ..Default::default()
            }
        }
    }

    /// Push one behavior event
    pub async fn sync_behavior(&self, payload: BehaviorEventPayload) -> SyncResult {
        self.sync(SyncPayload::Behavior(payload)).await
    }

    /// Push the full snapshot under the configured conflict policy
    pub async fn sync_preferences(&self, snapshot: AdaptiveSnapshot) -> SyncResult {
        self.sync(SyncPayload::Preferences(snapshot)).await
    }

    async fn sync(&self, payload: SyncPayload) -> SyncResult {
        if !self.is_online() {
            debug!("Offline, queueing {} sync", payload.kind());
            self.defer(payload);
            return SyncResult::Offline;
        }

        match self.attempt(&payload).await {
            Ok(result) => result,
            Err(e) => {
                warn!("{} sync failed: {}", payload.kind(), e);
                self.defer(payload);
                self.process_queue().await;
                SyncResult::Failed(e.to_string())
            }
        }
    }

    /// Queue a write without attempting it
    pub fn defer(&self, payload: SyncPayload) {
        let item = SyncQueueItem::new(payload, self.clock.now());
        self.state().queue.push(item);
    }

    /// Fetch the server copy of the snapshot
    pub async fn fetch_snapshot(&self) -> Result<AdaptiveSnapshot, SyncError> {
        if !self.is_online() {
            return Err(SyncError::Offline);
        }

        let snapshot = self.with_timeout(self.remote.fetch_snapshot()).await?;
        self.state().last_sync = Some(self.clock.now());
        Ok(snapshot)
    }

    async fn with_timeout<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, SyncError>>,
    ) -> Result<T, SyncError> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout(self.timeout.as_millis() as u64)),
        }
    }

    /// One remote call; `Err` means the write should be retried
    async fn attempt(&self, payload: &SyncPayload) -> Result<SyncResult, SyncError> {
        if !self.is_online() {
            return Err(SyncError::Offline);
        }

        match payload {
            SyncPayload::Behavior(event) => {
                let body = self.with_timeout(self.remote.push_event(event)).await?;
                self.state().last_sync = Some(self.clock.now());
                Ok(SyncResult::Synced(body))
            }
            SyncPayload::Preferences(snapshot) => {
                let request = PreferencesSyncRequest {
                    client_data: snapshot.clone(),
                    last_sync: self.state().last_sync,
                    conflict_resolution: self.policy,
                };

                match self.with_timeout(self.remote.push_snapshot(&request)).await? {
                    PushOutcome::Accepted(body) => {
                        // The server may report a merge it resolved on our behalf
                        let merged = body.get("hasConflicts").and_then(Value::as_bool) == Some(true);
                        let mut state = self.state();
                        state.last_sync = Some(self.clock.now());
                        state.has_conflicts = merged;
                        Ok(SyncResult::Synced(body))
                    }
                    PushOutcome::Conflict(body) => {
                        warn!("Remote snapshot is newer, conflict flagged");
                        self.state().has_conflicts = true;
                        Ok(SyncResult::Conflict(body))
                    }
                }
            }
        }
    }

    /// Replay queued writes in FIFO order
    ///
    /// A failed head item is retried before anything behind it and dropped
    /// after its last attempt. Returns immediately if a drain is already
    /// running or the device is offline.
    pub async fn process_queue(&self) -> DrainReport {
        {
            let mut state = self.state();
            if state.draining || !state.online || state.queue.is_empty() {
                return DrainReport {
                    remaining: state.queue.len(),
                    ..Default::default()
                };
            }
            state.draining = true;
        }

        let mut report = DrainReport::default();
        loop {
            let item = {
                let mut state = self.state();
                let next = if state.online { state.queue.pop_front() } else { None };
                if next.is_none() {
                    state.draining = false;
                    report.remaining = state.queue.len();
                }
                next
            };
            let Some(item) = item else { break };

            match self.attempt(&item.payload).await {
                Ok(SyncResult::Conflict(_)) => report.conflicts += 1,
                Ok(_) => report.synced += 1,
                Err(SyncError::Offline) => self.state().queue.restore(item),
                Err(e) => {
                    debug!("Queued {} sync failed: {}", item.payload.kind(), e);
                    if !self.state().queue.retry(item) {
                        report.dropped += 1;
                    }
                }
            }
        }

        if report.synced + report.conflicts + report.dropped > 0 {
            info!(
                "Sync queue drained: {} synced, {} conflicts, {} dropped, {} remaining",
                report.synced, report.conflicts, report.dropped, report.remaining
            );
        }
        report
    }
}
