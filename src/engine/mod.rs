//! Adaptive layout engine
//!
//! `AdaptiveLayout` owns the event log, the behavior aggregate and the
//! layout preferences for one user. Every mutation completes synchronously
//! against in-memory state and the local cache; remote writes run as
//! background tasks whose failures only ever reach the sync queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub mod insights;

pub use insights::{interaction_stats, layout_recommendations, most_used_feature};

use crate::clock::Clock;
use crate::error::AdaptiveError;
use crate::learning::{
    adapt_layout_based_on_patterns, analyze_behavior_patterns, is_unknown_name, should_adapt,
    AdaptationOutcome, EventLog, InteractionEvent, InteractionType,
};
use crate::storage::{
    AdaptiveSettings, LayoutPatch, LayoutPreference, LayoutPreferences, LocalCache, BEHAVIOR_KEY,
    HISTORY_KEY, LAST_ADAPTATION_KEY, SESSION_ID_KEY,
};
use crate::sync::{
    merge_bundle, AdaptiveSnapshot, BehaviorEventPayload, CourseRegistry, DeviceInfo, DrainReport,
    ExportBundle, ImportResult, MergeStrategy, SyncPayload, SyncResult, SyncService, SyncStatus,
};

/// Tunables for one engine instance
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub settings: AdaptiveSettings,
    /// Coalescing window for snapshot pushes
    pub snapshot_debounce: Duration,
    /// Bound on a single course registry lookup
    pub lookup_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            settings: AdaptiveSettings::default(),
            snapshot_debounce: Duration::from_millis(500),
            lookup_timeout: Duration::from_secs(10),
        }
    }
}

/// Where `load` found the state it hydrated from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    Remote,
    LocalCache,
    Defaults,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForceSyncReport {
    pub drain: DrainReport,
    pub snapshot: SyncResult,
}

struct EngineState {
    snapshot: AdaptiveSnapshot,
    history: EventLog,
    loading: bool,
}

struct Inner {
    cache: Arc<dyn LocalCache>,
    session: Arc<dyn LocalCache>,
    sync: Arc<SyncService>,
    registry: Arc<dyn CourseRegistry>,
    clock: Arc<dyn Clock>,
    snapshot_debounce: Duration,
    lookup_timeout: Duration,
    state: Mutex<EngineState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    push_scheduled: AtomicBool,
}

/// The adaptive layout service object
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct AdaptiveLayout {
    inner: Arc<Inner>,
}

impl AdaptiveLayout {
    pub fn new(
        cache: Arc<dyn LocalCache>,
        session: Arc<dyn LocalCache>,
        sync: Arc<SyncService>,
        registry: Arc<dyn CourseRegistry>,
        clock: Arc<dyn Clock>,
        options: EngineOptions,
    ) -> Self {
        let snapshot = AdaptiveSnapshot {
            adaptive_settings: options.settings,
            ..Default::default()
        };

        Self {
            inner: Arc::new(Inner {
                cache,
                session,
                sync,
                registry,
                clock,
                snapshot_debounce: options.snapshot_debounce,
                lookup_timeout: options.lookup_timeout,
                state: Mutex::new(EngineState {
                    snapshot,
                    history: EventLog::new(),
                    loading: false,
                }),
                tasks: Mutex::new(Vec::new()),
                push_scheduled: AtomicBool::new(false),
            }),
        }
    }

    /// Hydrate state at session start
    ///
    /// Prefers the remote copy; falls back to the local cache when the
    /// remote is unreachable or returns garbage. The event log is always
    /// local. Configured adaptive settings override stored ones.
    pub async fn load(&self) -> LoadSource {
        self.inner.state().loading = true;

        let history: EventLog = self.inner.read_json(HISTORY_KEY).unwrap_or_default();
        let (source, snapshot) = match self.inner.sync.fetch_snapshot().await {
            Ok(remote) => {
                info!("Loaded adaptive state from remote");
                (LoadSource::Remote, Some(remote))
            }
            Err(e) => {
                debug!("Remote load unavailable ({}), falling back to local cache", e);
                match self.inner.read_json::<AdaptiveSnapshot>(BEHAVIOR_KEY) {
                    Some(mut local) => {
                        if let Some(at) = self.inner.read_last_adaptation() {
                            local.last_adaptation = Some(at);
                        }
                        (LoadSource::LocalCache, Some(local))
                    }
                    None => (LoadSource::Defaults, None),
                }
            }
        };

        let mut state = self.inner.state();
        if let Some(mut snapshot) = snapshot {
            snapshot.adaptive_settings = state.snapshot.adaptive_settings.clone();
            state.snapshot = snapshot;
        }
        state.history = history;
        state.loading = false;

        if source == LoadSource::Remote {
            self.inner.persist_snapshot(&state);
            self.inner.persist_last_adaptation(&state);
        }
        debug!(
            "Hydrated {} events, {} tracked courses from {:?}",
            state.history.len(),
            state.snapshot.interaction_patterns.most_clicked_courses.len(),
            source
        );
        source
    }

    /// Record one user interaction
    ///
    /// Never fails: persistence and sync problems are logged and the
    /// in-memory state still reflects the event.
    pub fn track_interaction(
        &self,
        kind: impl Into<InteractionType>,
        details: Map<String, Value>,
    ) -> InteractionEvent {
        let inner = &self.inner;
        let event = InteractionEvent::new(kind.into(), details, self.session_id(), inner.clock.now());

        inner.dispatch_behavior(&event);

        let (changed, adapted, unresolved) = {
            let mut state = inner.state();
            let changed = state.snapshot.interaction_patterns.apply(&event);
            if changed {
                inner.persist_snapshot(&state);
            }

            state.history.push(event.clone());
            inner.persist_history(&state);

            let outcome = inner.adapt(&mut state);
            let adapted = outcome.patch().is_some_and(|p| !p.is_empty());

            let unresolved = match (&event.kind, event.detail_str("courseId")) {
                (InteractionType::CourseClick, Some(id))
                    if state.snapshot.interaction_patterns.is_missing_name(&id) =>
                {
                    Some(id)
                }
                _ => None,
            };
            (changed, adapted, unresolved)
        };

        if let Some(course_id) = unresolved {
            inner.spawn_name_lookup(course_id);
        }
        if changed || adapted {
            inner.schedule_snapshot_push();
        }
        event
    }

    /// Manually set one layout preference; adaptation is not consulted
    pub fn update_layout_preference(&self, preference: LayoutPreference) {
        let mut patch = LayoutPatch::default();
        patch.set(preference);

        {
            let mut state = self.inner.state();
            state.snapshot.layout_preferences.apply(&patch);
            self.inner.persist_snapshot(&state);
        }
        debug!("Layout preference updated: {:?}", patch);
        self.inner.schedule_snapshot_push();
    }

    /// String form of `update_layout_preference`
    pub fn set_layout_preference(&self, key: &str, value: &str) -> Result<(), AdaptiveError> {
        let preference = LayoutPreference::parse(key, value)?;
        self.update_layout_preference(preference);
        Ok(())
    }

    /// Run the adaptation gate and, if open, one adaptation pass
    pub fn trigger_layout_adaptation(&self) -> AdaptationOutcome {
        let outcome = {
            let mut state = self.inner.state();
            self.inner.adapt(&mut state)
        };
        if outcome.patch().is_some_and(|p| !p.is_empty()) {
            self.inner.schedule_snapshot_push();
        }
        outcome
    }

    /// Forget everything learned: log, aggregate, preferences, last
    /// adaptation, the cached copies and the session id
    ///
    /// Queued snapshot pushes carry pre-reset state and are dropped; the
    /// reset snapshot is pushed in their place so the next remote load
    /// does not bring the old behavior back.
    pub fn reset_adaptive_behavior(&self) {
        {
            let mut state = self.inner.state();
            let settings = state.snapshot.adaptive_settings.clone();
            state.snapshot = AdaptiveSnapshot {
                adaptive_settings: settings,
                ..Default::default()
            };
            state.history.clear();
        }

        self.inner.remove_local_keys();
        if let Err(e) = self.inner.session.remove(SESSION_ID_KEY) {
            warn!("Failed to clear session id: {}", e);
        }
        self.inner.sync.discard_queued_preferences();
        self.inner.schedule_snapshot_push();
        info!("Adaptive behavior reset to defaults");
    }

    /// Drop the cached copies and the in-memory log; keeps the aggregate
    /// and preferences for this session and never touches the remote
    pub fn clear_local_data(&self) {
        {
            let mut state = self.inner.state();
            state.history.clear();
            state.snapshot.last_adaptation = None;
        }
        self.inner.remove_local_keys();
        info!("Local adaptive data cleared");
    }

    /// Drain the sync queue now, then push the current snapshot
    ///
    /// A conflict is flagged on the sync status; local state is left as is.
    pub async fn force_sync(&self) -> ForceSyncReport {
        let drain = self.inner.sync.process_queue().await;
        let snapshot = self.inner.sync.sync_preferences(self.user_behavior()).await;
        ForceSyncReport { drain, snapshot }
    }

    /// Fold an exported bundle into the current state and persist it
    pub fn import_bundle(&self, bundle: ExportBundle, strategy: MergeStrategy) -> ImportResult {
        let result = {
            let mut state = self.inner.state();
            let EngineState { snapshot, history, .. } = &mut *state;
            let settings = snapshot.adaptive_settings.clone();
            let result = merge_bundle(snapshot, history, bundle, strategy);
            snapshot.adaptive_settings = settings;

            self.inner.persist_snapshot(&state);
            self.inner.persist_history(&state);
            self.inner.persist_last_adaptation(&state);
            result
        };
        self.inner.schedule_snapshot_push();
        result
    }

    /// Wait for every background task spawned so far, including tasks
    /// those tasks spawn
    pub async fn settle(&self) {
        loop {
            let handles = std::mem::take(&mut *self.inner.tasks());
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    warn!("Background task failed: {}", e);
                }
            }
        }
    }

    /// Snapshot of aggregate, preferences, settings and last adaptation
    pub fn user_behavior(&self) -> AdaptiveSnapshot {
        self.inner.state().snapshot.clone()
    }

    pub fn layout_preferences(&self) -> LayoutPreferences {
        self.inner.state().snapshot.layout_preferences.clone()
    }

    pub fn behavior_history(&self) -> Vec<InteractionEvent> {
        self.inner.state().history.iter().cloned().collect()
    }

    pub fn history(&self) -> EventLog {
        self.inner.state().history.clone()
    }

    pub fn last_adaptation(&self) -> Option<DateTime<Utc>> {
        self.inner.state().snapshot.last_adaptation
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state().loading
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.inner.sync.status()
    }

    pub fn sync_service(&self) -> &Arc<SyncService> {
        &self.inner.sync
    }

    /// Current session id, created on first use
    pub fn session_id(&self) -> String {
        match self.inner.session.get(SESSION_ID_KEY) {
            Ok(Some(id)) => return id,
            Ok(None) => {}
            Err(e) => warn!("Failed to read session id: {}", e),
        }

        let id = new_session_id(self.inner.clock.now());
        if let Err(e) = self.inner.session.set(SESSION_ID_KEY, &id) {
            warn!("Failed to store session id: {}", e);
        }
        id
    }
}

/// `session_<epoch millis>_<9 base36 chars>`
fn new_session_id(now: DateTime<Utc>) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("session_{}_{}", now.timestamp_millis(), suffix)
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn track_task(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks();
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }

    fn read_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.cache.get(key) {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!("Ignoring unreadable {}: {}", key, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to read {}: {}", key, e);
                None
            }
        }
    }

    fn read_last_adaptation(&self) -> Option<DateTime<Utc>> {
        let raw = match self.cache.get(LAST_ADAPTATION_KEY) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!("Failed to read {}: {}", LAST_ADAPTATION_KEY, e);
                return None;
            }
        };
        match DateTime::parse_from_rfc3339(&raw) {
            Ok(at) => Some(at.with_timezone(&Utc)),
            Err(e) => {
                warn!("Ignoring unreadable {}: {}", LAST_ADAPTATION_KEY, e);
                None
            }
        }
    }

    fn write_json<T: Serialize>(&self, key: &str, value: &T) {
        let result = serde_json::to_string(value)
            .map_err(anyhow::Error::from)
            .and_then(|json| self.cache.set(key, &json));
        if let Err(e) = result {
            warn!("Failed to persist {}: {}", key, e);
        }
    }

    fn persist_snapshot(&self, state: &EngineState) {
        self.write_json(BEHAVIOR_KEY, &state.snapshot);
    }

    fn persist_history(&self, state: &EngineState) {
        self.write_json(HISTORY_KEY, &state.history);
    }

    fn persist_last_adaptation(&self, state: &EngineState) {
        let result = match state.snapshot.last_adaptation {
            Some(at) => self.cache.set(LAST_ADAPTATION_KEY, &at.to_rfc3339()),
            None => self.cache.remove(LAST_ADAPTATION_KEY),
        };
        if let Err(e) = result {
            warn!("Failed to persist {}: {}", LAST_ADAPTATION_KEY, e);
        }
    }

    fn remove_local_keys(&self) {
        for key in [BEHAVIOR_KEY, HISTORY_KEY, LAST_ADAPTATION_KEY] {
            if let Err(e) = self.cache.remove(key) {
                warn!("Failed to remove {}: {}", key, e);
            }
        }
    }

    /// Gate plus one adaptation pass; persists when it runs
    fn adapt(&self, state: &mut EngineState) -> AdaptationOutcome {
        let now = self.clock.now();
        let EngineState { snapshot, history, .. } = &mut *state;

        if !should_adapt(
            now,
            snapshot.last_adaptation,
            history.len(),
            &snapshot.adaptive_settings,
        ) {
            return AdaptationOutcome::Skipped;
        }

        let analysis = analyze_behavior_patterns(&snapshot.interaction_patterns, history);
        let patch = adapt_layout_based_on_patterns(&analysis);
        snapshot.layout_preferences.apply(&patch);
        snapshot.last_adaptation = Some(now);

        if !patch.is_empty() {
            info!("Layout adapted: {:?}", patch);
        }
        self.persist_snapshot(state);
        self.persist_last_adaptation(state);
        AdaptationOutcome::Adapted(patch)
    }

    /// Fire-and-forget push of one event; queued directly without a runtime
    fn dispatch_behavior(&self, event: &InteractionEvent) {
        let mut details = event.details.clone();
        details.insert("sessionId".to_string(), Value::String(event.session_id.clone()));
        let payload = BehaviorEventPayload {
            interaction_type: event.kind.to_string(),
            details,
            device_info: DeviceInfo::current(),
        };

        match Handle::try_current() {
            Ok(handle) => {
                let sync = self.sync.clone();
                self.track_task(handle.spawn(async move {
                    sync.sync_behavior(payload).await;
                }));
            }
            Err(_) => self.sync.defer(SyncPayload::Behavior(payload)),
        }
    }

    /// Push the latest snapshot once the debounce window closes
    ///
    /// Calls made while a push is already scheduled are absorbed by it.
    fn schedule_snapshot_push(self: &Arc<Self>) {
        if self.push_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }

        match Handle::try_current() {
            Ok(handle) => {
                let inner = self.clone();
                self.track_task(handle.spawn(async move {
                    if !inner.snapshot_debounce.is_zero() {
                        tokio::time::sleep(inner.snapshot_debounce).await;
                    }
                    inner.push_scheduled.store(false, Ordering::SeqCst);
                    let snapshot = inner.state().snapshot.clone();
                    inner.sync.sync_preferences(snapshot).await;
                }));
            }
            Err(_) => {
                self.push_scheduled.store(false, Ordering::SeqCst);
                let snapshot = self.state().snapshot.clone();
                self.sync.defer(SyncPayload::Preferences(snapshot));
            }
        }
    }

    fn spawn_name_lookup(self: &Arc<Self>, course_id: String) {
        let Ok(handle) = Handle::try_current() else {
            debug!("No runtime, leaving course {} unresolved", course_id);
            return;
        };
        let inner = self.clone();
        self.track_task(handle.spawn(async move {
            if let Some(name) = inner.lookup_course_name(&course_id).await {
                if inner.rename_course(&course_id, &name) {
                    inner.schedule_snapshot_push();
                }
            }
        }));
    }

    /// Registry lookup bounded by `lookup_timeout`; an empty or unknown name is a miss
    async fn lookup_course_name(&self, course_id: &str) -> Option<String> {
        match tokio::time::timeout(self.lookup_timeout, self.registry.course_name(course_id)).await {
            Ok(Ok(Some(name))) if !is_unknown_name(&name) => Some(name),
            Ok(Ok(_)) => {
                debug!("No name for course {}", course_id);
                None
            }
            Ok(Err(e)) => {
                warn!("Failed to fetch course name for {}: {}", course_id, e);
                None
            }
            Err(_) => {
                warn!("Course name lookup for {} timed out", course_id);
                None
            }
        }
    }

    fn rename_course(&self, course_id: &str, name: &str) -> bool {
        let mut state = self.state();
        let renamed = state
            .snapshot
            .interaction_patterns
            .rename_course(course_id, name);
        if renamed {
            debug!("Course {} resolved to {}", course_id, name);
            self.persist_snapshot(&state);
        }
        renamed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::learning::events::MAX_HISTORY;
    use crate::storage::{CardSize, MemoryCache};
    use crate::sync::remote::fakes::{MockRegistry, MockRemote, Mode};
    use crate::sync::ConflictResolution;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use serde_json::json;

    struct Harness {
        engine: AdaptiveLayout,
        cache: Arc<MemoryCache>,
        session: Arc<MemoryCache>,
        remote: Arc<MockRemote>,
        registry: Arc<MockRegistry>,
        clock: Arc<ManualClock>,
    }

    fn harness_with(remote: MockRemote, registry: MockRegistry, online: bool) -> Harness {
        let cache = Arc::new(MemoryCache::new());
        let session = Arc::new(MemoryCache::new());
        let remote = Arc::new(remote);
        let registry = Arc::new(registry);
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()));
        let sync = Arc::new(SyncService::new(
            remote.clone(),
            clock.clone(),
            ConflictResolution::ClientWins,
            Duration::from_millis(500),
            online,
        ));
        let options = EngineOptions {
            snapshot_debounce: Duration::ZERO,
            ..Default::default()
        };
        let engine = AdaptiveLayout::new(
            cache.clone(),
            session.clone(),
            sync,
            registry.clone(),
            clock.clone(),
            options,
        );
        Harness {
            engine,
            cache,
            session,
            remote,
            registry,
            clock,
        }
    }

    fn harness(online: bool) -> Harness {
        harness_with(MockRemote::new(Mode::Accept), MockRegistry::default(), online)
    }

    fn details(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[tokio::test]
    async fn test_course_clicks_rank() {
        let h = harness(true);
        for _ in 0..5 {
            h.engine
                .track_interaction("course_click", details(json!({"courseId": "c1", "courseName": "Algebra"})));
        }
        for _ in 0..2 {
            h.engine
                .track_interaction("course_click", details(json!({"courseId": "c2", "courseName": "Biology"})));
        }
        h.engine.settle().await;

        let courses = h.engine.user_behavior().interaction_patterns.most_clicked_courses;
        assert_eq!(courses.len(), 2);
        assert_eq!((courses[0].course_id.as_str(), courses[0].click_count), ("c1", 5));
        assert_eq!((courses[1].course_id.as_str(), courses[1].click_count), ("c2", 2));
        assert_eq!(h.engine.behavior_history().len(), 7);
        // Every event reached the remote
        assert_eq!(h.remote.events().len(), 7);
    }

    #[tokio::test]
    async fn test_offline_events_queue_then_drain() {
        let h = harness(false);
        for i in 0..3 {
            h.engine.track_interaction(
                "feature_usage",
                details(json!({"feature": "search", "duration": 1000 * (i + 1)})),
            );
        }
        h.engine.settle().await;

        let pending = h.engine.sync_service().pending();
        let behavior = pending
            .iter()
            .filter(|item| matches!(item.payload, SyncPayload::Behavior(_)))
            .count();
        assert_eq!(behavior, 3);
        assert!(!h.engine.sync_status().is_online);

        h.engine.sync_service().set_online(true).await;
        let status = h.engine.sync_status();
        assert_eq!(status.pending_changes, 0);
        assert!(status.is_online);
        assert_eq!(h.remote.events().len(), 3);
    }

    #[tokio::test]
    async fn test_click_heavy_session_adapts_to_large_cards() {
        let h = harness(true);
        // First event opens the gate once; later ones pass on volume
        for _ in 0..5 {
            h.engine.track_interaction("navigation", details(json!({"path": "/dashboard"})));
        }
        for i in 0..15 {
            h.engine
                .track_interaction("course_click", details(json!({"courseId": format!("c{}", i), "courseName": "X"})));
        }
        for _ in 0..5 {
            h.engine.track_interaction("search", Map::new());
        }
        h.engine.settle().await;

        let prefs = h.engine.layout_preferences();
        assert_eq!(prefs.card_size, CardSize::Large);
        assert!(!prefs.compact_mode);
        assert!(h.engine.last_adaptation().is_some());
    }

    #[tokio::test]
    async fn test_manual_preference_survives_closed_gate() {
        let h = harness(false);
        h.engine.track_interaction("search", Map::new());
        assert!(h.engine.last_adaptation().is_some());

        h.engine.update_layout_preference(LayoutPreference::CardSize(CardSize::Small));
        h.clock.advance(ChronoDuration::minutes(5));

        assert_eq!(h.engine.trigger_layout_adaptation(), AdaptationOutcome::Skipped);
        assert_eq!(h.engine.layout_preferences().card_size, CardSize::Small);
        h.engine.settle().await;
    }

    #[tokio::test]
    async fn test_gate_reopens_after_reset_interval() {
        let h = harness(false);
        h.engine.track_interaction("search", Map::new());
        let first = h.engine.last_adaptation();

        h.clock.advance(ChronoDuration::days(8));
        assert!(matches!(h.engine.trigger_layout_adaptation(), AdaptationOutcome::Adapted(_)));
        assert!(h.engine.last_adaptation() > first);
        h.engine.settle().await;
    }

    #[tokio::test]
    async fn test_conflict_flags_status_and_keeps_local_preferences() -> anyhow::Result<()> {
        let server = AdaptiveSnapshot {
            layout_preferences: LayoutPreferences {
                card_size: CardSize::Large,
                ..Default::default()
            },
            ..Default::default()
        };
        let h = harness_with(
            MockRemote::new(Mode::Conflict).with_snapshot(server),
            MockRegistry::default(),
            true,
        );
        // Remote down at load, local cache has the user's small cards
        let mut local = AdaptiveSnapshot::default();
        local.layout_preferences.card_size = CardSize::Small;
        h.cache.set(BEHAVIOR_KEY, &serde_json::to_string(&local)?)?;
        h.remote.fail_next(1);

        assert_eq!(h.engine.load().await, LoadSource::LocalCache);
        let report = h.engine.force_sync().await;
        assert!(matches!(report.snapshot, SyncResult::Conflict(_)));

        let status = h.engine.sync_status();
        assert!(status.has_conflicts);
        assert_eq!(status.pending_changes, 0);
        assert_eq!(h.engine.layout_preferences().card_size, CardSize::Small);
        Ok(())
    }

    #[tokio::test]
    async fn test_reset_clears_everything() -> anyhow::Result<()> {
        let h = harness(false);
        h.engine
            .track_interaction("course_click", details(json!({"courseId": "c1", "courseName": "Algebra"})));
        h.engine.update_layout_preference(LayoutPreference::CompactMode(true));
        let session = h.engine.session_id();
        h.engine.settle().await;
        assert!(h.cache.get(BEHAVIOR_KEY)?.is_some());
        assert!(h.cache.get(LAST_ADAPTATION_KEY)?.is_some());

        h.engine.reset_adaptive_behavior();

        assert!(h.engine.behavior_history().is_empty());
        let behavior = h.engine.user_behavior();
        assert!(behavior.interaction_patterns.most_clicked_courses.is_empty());
        assert_eq!(behavior.layout_preferences, LayoutPreferences::default());
        assert_eq!(behavior.last_adaptation, None);

        for key in [BEHAVIOR_KEY, HISTORY_KEY, LAST_ADAPTATION_KEY] {
            assert_eq!(h.cache.get(key)?, None, "{} should be gone", key);
        }
        assert_eq!(h.session.get(SESSION_ID_KEY)?, None);
        assert_ne!(h.engine.session_id(), session);
        Ok(())
    }

    #[tokio::test]
    async fn test_reset_reaches_remote_before_next_load() {
        let h = harness(true);
        for _ in 0..3 {
            h.engine
                .track_interaction("course_click", details(json!({"courseId": "c1", "courseName": "Algebra"})));
        }
        h.engine.settle().await;

        h.engine.reset_adaptive_behavior();
        h.engine.settle().await;

        let sync = Arc::new(SyncService::new(
            h.remote.clone(),
            h.clock.clone(),
            ConflictResolution::ClientWins,
            Duration::from_millis(500),
            true,
        ));
        let next_session = AdaptiveLayout::new(
            Arc::new(MemoryCache::new()),
            Arc::new(MemoryCache::new()),
            sync,
            h.registry.clone(),
            h.clock.clone(),
            EngineOptions::default(),
        );
        assert_eq!(next_session.load().await, LoadSource::Remote);
        let behavior = next_session.user_behavior();
        assert!(behavior.interaction_patterns.most_clicked_courses.is_empty());
        assert_eq!(behavior.layout_preferences, LayoutPreferences::default());
    }

    #[tokio::test]
    async fn test_reset_while_offline_replaces_queued_snapshots() {
        let h = harness(false);
        h.engine
            .track_interaction("course_click", details(json!({"courseId": "c1", "courseName": "Algebra"})));
        h.engine.update_layout_preference(LayoutPreference::CardSize(CardSize::Small));
        h.engine.settle().await;

        h.engine.reset_adaptive_behavior();
        h.engine.settle().await;

        let snapshots: Vec<AdaptiveSnapshot> = h
            .engine
            .sync_service()
            .pending()
            .into_iter()
            .filter_map(|item| match item.payload {
                SyncPayload::Preferences(snapshot) => Some(snapshot),
                SyncPayload::Behavior(_) => None,
            })
            .collect();
        assert_eq!(snapshots.len(), 1);
        assert!(snapshots[0].interaction_patterns.most_clicked_courses.is_empty());
        assert_eq!(snapshots[0].layout_preferences, LayoutPreferences::default());
    }

    #[tokio::test]
    async fn test_state_survives_reload_from_cache() {
        let h = harness(false);
        h.engine
            .track_interaction("course_click", details(json!({"courseId": "c1", "courseName": "Algebra"})));
        h.engine.track_interaction("filter_used", details(json!({"filter": "in_progress"})));
        h.engine.track_interaction("view_mode_change", details(json!({"viewMode": "list"})));
        h.engine.settle().await;
        let before = h.engine.user_behavior();

        let sync = Arc::new(SyncService::new(
            h.remote.clone(),
            h.clock.clone(),
            ConflictResolution::ClientWins,
            Duration::from_millis(500),
            false,
        ));
        let reloaded = AdaptiveLayout::new(
            h.cache.clone(),
            Arc::new(MemoryCache::new()),
            sync,
            h.registry.clone(),
            h.clock.clone(),
            EngineOptions::default(),
        );
        assert_eq!(reloaded.load().await, LoadSource::LocalCache);
        assert_eq!(reloaded.user_behavior(), before);
        assert_eq!(reloaded.behavior_history().len(), 3);
    }

    #[tokio::test]
    async fn test_remote_preferred_on_load() {
        let mut server = AdaptiveSnapshot::default();
        server.interaction_patterns.search_frequency = 12;
        let h = harness_with(
            MockRemote::new(Mode::Accept).with_snapshot(server),
            MockRegistry::default(),
            true,
        );
        h.cache
            .set(BEHAVIOR_KEY, &serde_json::to_string(&AdaptiveSnapshot::default()).unwrap())
            .unwrap();

        assert_eq!(h.engine.load().await, LoadSource::Remote);
        assert!(!h.engine.is_loading());
        assert_eq!(h.engine.user_behavior().interaction_patterns.search_frequency, 12);
        assert!(h.engine.sync_status().last_sync.is_some());
    }

    #[tokio::test]
    async fn test_load_with_nothing_anywhere() {
        let h = harness(false);
        assert_eq!(h.engine.load().await, LoadSource::Defaults);
        assert_eq!(h.engine.layout_preferences(), LayoutPreferences::default());
    }

    #[tokio::test]
    async fn test_unknown_course_name_is_resolved() {
        let h = harness_with(
            MockRemote::new(Mode::Accept),
            MockRegistry::with(&[("c9", "Organic Chemistry")]),
            true,
        );
        h.engine.track_interaction("course_click", details(json!({"courseId": "c9"})));
        h.engine.settle().await;

        let courses = h.engine.user_behavior().interaction_patterns.most_clicked_courses;
        assert_eq!(courses[0].course_name, "Organic Chemistry");
        assert_eq!(h.registry.calls(), 1);

        // Already resolved, no second lookup
        h.engine.track_interaction("course_click", details(json!({"courseId": "c9"})));
        h.engine.settle().await;
        assert_eq!(h.registry.calls(), 1);
    }

    #[tokio::test]
    async fn test_supplied_course_name_skips_registry() {
        let h = harness_with(
            MockRemote::new(Mode::Accept),
            MockRegistry::with(&[("c4", "Course Design Patterns")]),
            true,
        );
        for _ in 0..3 {
            h.engine.track_interaction(
                "course_click",
                details(json!({"courseId": "c4", "courseName": "Course Design Patterns"})),
            );
        }
        h.engine.settle().await;

        assert_eq!(h.registry.calls(), 0);
        let courses = h.engine.user_behavior().interaction_patterns.most_clicked_courses;
        assert_eq!(courses[0].course_name, "Course Design Patterns");
    }

    #[tokio::test]
    async fn test_registry_name_with_course_prefix_is_accepted() {
        let h = harness_with(
            MockRemote::new(Mode::Accept),
            MockRegistry::with(&[("c5", "Course Design Patterns")]),
            true,
        );
        h.engine.track_interaction("course_click", details(json!({"courseId": "c5"})));
        h.engine.settle().await;
        h.engine.track_interaction("course_click", details(json!({"courseId": "c5"})));
        h.engine.settle().await;

        let courses = h.engine.user_behavior().interaction_patterns.most_clicked_courses;
        assert_eq!(courses[0].course_name, "Course Design Patterns");
        assert_eq!(h.registry.calls(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_pushes_are_coalesced() {
        let cache = Arc::new(MemoryCache::new());
        let remote = Arc::new(MockRemote::new(Mode::Accept));
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let sync = Arc::new(SyncService::new(
            remote.clone(),
            clock.clone(),
            ConflictResolution::ClientWins,
            Duration::from_millis(500),
            true,
        ));
        let engine = AdaptiveLayout::new(
            cache,
            Arc::new(MemoryCache::new()),
            sync,
            Arc::new(MockRegistry::default()),
            clock,
            EngineOptions {
                snapshot_debounce: Duration::from_millis(50),
                ..Default::default()
            },
        );

        for _ in 0..10 {
            engine.track_interaction("search", Map::new());
        }
        engine.settle().await;

        let pushes = remote.pushes();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].client_data.interaction_patterns.search_frequency, 10);
    }

    #[tokio::test]
    async fn test_clear_local_data_keeps_session_state() -> anyhow::Result<()> {
        let h = harness(false);
        h.engine.track_interaction("drag_drop", Map::new());
        h.engine.settle().await;

        h.engine.clear_local_data();
        assert!(h.engine.behavior_history().is_empty());
        assert_eq!(h.engine.user_behavior().interaction_patterns.drag_drop_frequency, 1);
        assert_eq!(h.cache.get(BEHAVIOR_KEY)?, None);
        assert!(h.session.get(SESSION_ID_KEY)?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_history_is_capped() {
        let h = harness(false);
        for i in 0..=MAX_HISTORY {
            h.engine.track_interaction("navigation", details(json!({"path": format!("/p/{}", i)})));
        }
        let history = h.engine.behavior_history();
        assert_eq!(history.len(), MAX_HISTORY);
        assert_eq!(history[0].details["path"], "/p/1");
        h.engine.settle().await;
    }

    #[test]
    fn test_tracking_without_runtime_queues() {
        let h = harness(true);
        h.engine.track_interaction("search", Map::new());
        let kinds: Vec<&str> = h
            .engine
            .sync_service()
            .pending()
            .iter()
            .map(|item| item.payload.kind())
            .collect();
        assert_eq!(kinds, vec!["behavior", "preferences"]);
    }

    #[test]
    fn test_session_id_shape_and_stability() {
        let h = harness(false);
        let id = h.engine.session_id();
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "session");
        assert_eq!(parts[1], h.clock.now().timestamp_millis().to_string());
        assert_eq!(parts[2].len(), 9);
        assert_eq!(h.engine.session_id(), id);
    }

    #[test]
    fn test_unknown_preference_key() {
        let h = harness(false);
        assert!(h.engine.set_layout_preference("cardSize", "small").is_ok());
        assert_eq!(h.engine.layout_preferences().card_size, CardSize::Small);
        assert!(h.engine.set_layout_preference("fontSize", "12").is_err());
    }
}
