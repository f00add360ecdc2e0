//! Export and import of the adaptive state as a JSON bundle
//!
//! The bundle carries the full snapshot plus the event log so a profile
//! can move between devices without a remote store.

use anyhow::{anyhow, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

use super::AdaptiveSnapshot;
use crate::learning::{EventLog, InteractionEvent};

/// Bundle format version
pub const BUNDLE_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportMetadata {
    pub version: String,
    pub exported_at: String,
    pub session_id: String,
    pub interaction_count: usize,
    pub course_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportBundle {
    pub metadata: ExportMetadata,
    pub snapshot: AdaptiveSnapshot,
    #[serde(default)]
    pub history: EventLog,
}

/// Strategy for combining an imported bundle with local state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeStrategy {
    /// Sum behavior counters and union histories; keep local preferences (default)
    #[default]
    Add,
    /// Overwrite local state with the bundle
    Replace,
}

/// Result of import operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportResult {
    /// Events in the bundle
    pub total: usize,
    /// Events added to the local history
    pub imported: usize,
    /// Events already present locally
    pub skipped: usize,
    /// Session that produced the bundle
    pub source_session: String,
}

/// Write the snapshot and history to `output_path`; returns the event count
pub fn export_state(
    output_path: &Path,
    snapshot: &AdaptiveSnapshot,
    history: &EventLog,
    session_id: &str,
) -> Result<usize> {
    let bundle = ExportBundle {
        metadata: ExportMetadata {
            version: BUNDLE_VERSION.to_string(),
            exported_at: Utc::now().to_rfc3339(),
            session_id: session_id.to_string(),
            interaction_count: history.len(),
            course_count: snapshot.interaction_patterns.most_clicked_courses.len(),
        },
        snapshot: snapshot.clone(),
        history: history.clone(),
    };

    let json = serde_json::to_string_pretty(&bundle)?;
    std::fs::write(output_path, json)?;
    info!("Exported {} interactions to {:?}", history.len(), output_path);

    Ok(history.len())
}

pub fn read_bundle(input_path: &Path) -> Result<ExportBundle> {
    let content = std::fs::read_to_string(input_path)?;
    let bundle: ExportBundle = serde_json::from_str(&content)?;

    if bundle.metadata.version != BUNDLE_VERSION {
        return Err(anyhow!(
            "Unsupported bundle version {} (expected {})",
            bundle.metadata.version,
            BUNDLE_VERSION
        ));
    }

    info!(
        "Read bundle with {} interactions from session {} (exported at {})",
        bundle.history.len(),
        bundle.metadata.session_id,
        bundle.metadata.exported_at
    );
    Ok(bundle)
}

fn event_key(event: &InteractionEvent) -> (i64, String, String) {
    (
        event.timestamp.timestamp_millis(),
        event.session_id.clone(),
        event.kind.as_str().to_string(),
    )
}

/// Fold a bundle into local state
pub fn merge_bundle(
    snapshot: &mut AdaptiveSnapshot,
    history: &mut EventLog,
    bundle: ExportBundle,
    strategy: MergeStrategy,
) -> ImportResult {
    let total = bundle.history.len();
    let source_session = bundle.metadata.session_id;

    match strategy {
        MergeStrategy::Replace => {
            *snapshot = bundle.snapshot;
            *history = bundle.history;
            ImportResult {
                total,
                imported: total,
                skipped: 0,
                source_session,
            }
        }
        MergeStrategy::Add => {
            snapshot
                .interaction_patterns
                .merge(&bundle.snapshot.interaction_patterns);
            if bundle.snapshot.last_adaptation > snapshot.last_adaptation {
                snapshot.last_adaptation = bundle.snapshot.last_adaptation;
            }

            let known: HashSet<_> = history.iter().map(event_key).collect();
            let mut events: Vec<InteractionEvent> = history.iter().cloned().collect();
            let mut imported = 0;
            for event in bundle.history.iter() {
                if !known.contains(&event_key(event)) {
                    events.push(event.clone());
                    imported += 1;
                }
            }
            events.sort_by_key(|e| e.timestamp);
            *history = EventLog::from_events(events);

            ImportResult {
                total,
                imported,
                skipped: total - imported,
                source_session,
            }
        }
    }
}
