//! Layout adaptation - rule-based scoring over the behavior aggregate
//!
//! Runs after interactions once the gate opens:
//! - analyze: course engagement, feature time, recent interaction mix
//! - adapt: rules produce a partial layout patch; later rules overwrite
//!   keys written by earlier ones

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::debug;

use super::aggregate::BehaviorAggregate;
use super::events::EventLog;
use crate::storage::{AdaptiveSettings, CardSize, GridColumns, LayoutPatch, LayoutPreference, SortOrder};

/// Interactions considered when measuring the recent mix
pub const RECENT_WINDOW: usize = 50;
/// Recent interactions required before the mix rules apply (exclusive)
const ACTIVE_USER_INTERACTIONS: u64 = 20;
/// Drag-and-drop count that marks a user who reorganizes (exclusive)
const DRAG_DROP_THRESHOLD: u64 = 5;
/// Cumulative time on one feature that triggers its preset (5 minutes)
const FEATURE_TIME_THRESHOLD_MS: u64 = 300_000;
/// Clicks on a single course that mark it a favorite (exclusive)
const ENGAGEMENT_THRESHOLD: u64 = 3;

/// Signals extracted from the aggregate and the recent log
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BehaviorAnalysis {
    /// Course id -> click count
    pub course_engagement: BTreeMap<String, u64>,
    /// Feature -> cumulative milliseconds
    pub feature_usage: BTreeMap<String, u64>,
    /// Interaction kind -> count over the last `RECENT_WINDOW` events
    pub interaction_frequency: BTreeMap<String, u64>,
}

impl BehaviorAnalysis {
    fn frequency(&self, kind: &str) -> u64 {
        self.interaction_frequency.get(kind).copied().unwrap_or(0)
    }

    fn total_interactions(&self) -> u64 {
        self.interaction_frequency.values().sum()
    }
}

/// Whether an adaptation pass should run now
///
/// Opens once `reset_interval` has elapsed since the last pass (or there
/// never was one), or as soon as the log holds `min_interactions` events.
pub fn should_adapt(
    now: DateTime<Utc>,
    last_adaptation: Option<DateTime<Utc>>,
    history_len: usize,
    settings: &AdaptiveSettings,
) -> bool {
    let interval_elapsed = match last_adaptation {
        None => true,
        Some(last) => {
            let elapsed_ms = (now - last).num_milliseconds();
            elapsed_ms >= 0 && elapsed_ms as u64 >= settings.reset_interval
        }
    };

    interval_elapsed || history_len >= settings.min_interactions as usize
}

pub fn analyze_behavior_patterns(aggregate: &BehaviorAggregate, history: &EventLog) -> BehaviorAnalysis {
    let course_engagement = aggregate
        .most_clicked_courses
        .iter()
        .map(|c| (c.course_id.clone(), c.click_count))
        .collect();

    let feature_usage = aggregate
        .time_spent_on_features
        .iter()
        .map(|(feature, ms)| (feature.to_string(), ms))
        .collect();

    let mut interaction_frequency = BTreeMap::new();
    for event in history.recent(RECENT_WINDOW) {
        *interaction_frequency
            .entry(event.kind.as_str().to_string())
            .or_insert(0) += 1;
    }

    BehaviorAnalysis {
        course_engagement,
        feature_usage,
        interaction_frequency,
    }
}

/// Apply the adaptation rules in order
pub fn adapt_layout_based_on_patterns(analysis: &BehaviorAnalysis) -> LayoutPatch {
    let mut patch = LayoutPatch::default();

    // Interaction mix
    if analysis.total_interactions() > ACTIVE_USER_INTERACTIONS {
        let clicks = analysis.frequency("course_click");
        let navigation = analysis.frequency("navigation");

        if clicks > navigation * 2 {
            patch.set(LayoutPreference::CardSize(CardSize::Large));
            patch.set(LayoutPreference::CompactMode(false));
        } else if analysis.frequency("drag_drop") > DRAG_DROP_THRESHOLD {
            patch.set(LayoutPreference::CardSize(CardSize::Medium));
            patch.set(LayoutPreference::CompactMode(true));
        }
    }

    // Feature time
    let most_used = analysis
        .feature_usage
        .iter()
        .fold(None::<(&String, u64)>, |best, (feature, &ms)| match best {
            Some((_, best_ms)) if best_ms >= ms => best,
            _ => Some((feature, ms)),
        });
    if let Some((feature, ms)) = most_used {
        if ms > FEATURE_TIME_THRESHOLD_MS {
            match feature.as_str() {
                "course_preview" => {
                    patch.set(LayoutPreference::ShowProgress(true));
                    patch.set(LayoutPreference::ShowThumbnails(true));
                }
                "search" => {
                    patch.set(LayoutPreference::GridColumns(GridColumns::Two));
                    patch.set(LayoutPreference::CompactMode(true));
                }
                "filtering" => {
                    patch.set(LayoutPreference::GridColumns(GridColumns::Three));
                    patch.set(LayoutPreference::SortOrder(SortOrder::Progress));
                }
                _ => {}
            }
        }
    }

    // Course engagement
    if analysis
        .course_engagement
        .values()
        .any(|&clicks| clicks > ENGAGEMENT_THRESHOLD)
    {
        patch.set(LayoutPreference::CardSize(CardSize::Medium));
        patch.set(LayoutPreference::ShowProgress(true));
    }

    debug!("Adaptation patch: {:?}", patch);
    patch
}
