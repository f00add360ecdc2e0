//! Read-only views for the dashboard and the sync indicator

use serde::Serialize;
use serde_json::{json, Map, Value};
use std::fmt;
use tracing::info;

use super::AdaptiveLayout;
use crate::learning::{BehaviorAggregate, EventLog, InteractionType};
use crate::storage::{CardSize, LayoutPreferences, SortOrder};
use crate::sync::{AdaptiveSnapshot, SyncStatus};

/// Events considered by the dashboard stats
pub const STATS_WINDOW: usize = 100;

/// Feature the user spent the most time on
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureUsage {
    pub name: String,
    pub minutes: u64,
}

/// Counts over the last `STATS_WINDOW` interactions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionStats {
    pub total: usize,
    pub course_clicks: usize,
    pub navigation: usize,
    pub feature_usage: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub kind: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub current: Value,
    pub suggested: Value,
}

/// `search_results` -> `Search Results`
fn display_name(feature: &str) -> String {
    feature
        .split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn most_used_feature(aggregate: &BehaviorAggregate) -> FeatureUsage {
    match aggregate.time_spent_on_features.max_entry() {
        Some((feature, ms)) => FeatureUsage {
            name: display_name(feature),
            minutes: ms.saturating_add(30_000) / 60_000,
        },
        None => FeatureUsage {
            name: "None".to_string(),
            minutes: 0,
        },
    }
}

pub fn interaction_stats(history: &EventLog) -> InteractionStats {
    let mut stats = InteractionStats::default();
    for event in history.recent(STATS_WINDOW) {
        stats.total += 1;
        match event.kind {
            InteractionType::CourseClick => stats.course_clicks += 1,
            InteractionType::Navigation => stats.navigation += 1,
            InteractionType::FeatureUsage => stats.feature_usage += 1,
            _ => {}
        }
    }
    stats
}

/// Suggestions shown next to the current preference values
pub fn layout_recommendations(snapshot: &AdaptiveSnapshot) -> Vec<Recommendation> {
    let patterns = &snapshot.interaction_patterns;
    let prefs: &LayoutPreferences = &snapshot.layout_preferences;
    let mut recommendations = Vec::new();

    if patterns.most_clicked_courses.len() > 5 {
        recommendations.push(Recommendation {
            kind: "layout",
            title: "Large Card Layout",
            description: "You frequently interact with courses. Larger cards improve visibility.",
            current: json!(prefs.card_size.as_str()),
            suggested: json!(CardSize::Large.as_str()),
        });
    }

    if patterns.search_frequency > 10 {
        recommendations.push(Recommendation {
            kind: "feature",
            title: "Compact Grid",
            description: "You search often. A compact layout shows more courses at once.",
            current: json!(prefs.compact_mode),
            suggested: json!(true),
        });
    }

    if patterns.drag_drop_frequency > 3 {
        recommendations.push(Recommendation {
            kind: "behavior",
            title: "Course Organization",
            description: "You reorganize courses often. The custom sort order keeps your arrangement.",
            current: json!(prefs.sort_order.as_str()),
            suggested: json!(SortOrder::Custom.as_str()),
        });
    }

    recommendations
}

/// Single-label sync state, highest priority first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncIndicator {
    Loading,
    Conflicts,
    Pending(usize),
    Online,
    Offline,
}

impl fmt::Display for SyncIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loading => f.write_str("Loading..."),
            Self::Conflicts => f.write_str("Conflicts"),
            Self::Pending(n) => write!(f, "{} pending", n),
            Self::Online => f.write_str("Online"),
            Self::Offline => f.write_str("Offline"),
        }
    }
}

pub fn sync_indicator(is_loading: bool, status: &SyncStatus) -> SyncIndicator {
    if is_loading {
        SyncIndicator::Loading
    } else if status.has_conflicts {
        SyncIndicator::Conflicts
    } else if status.pending_changes > 0 {
        SyncIndicator::Pending(status.pending_changes)
    } else if status.is_online {
        SyncIndicator::Online
    } else {
        SyncIndicator::Offline
    }
}

impl AdaptiveLayout {
    pub fn sync_indicator(&self) -> SyncIndicator {
        sync_indicator(self.is_loading(), &self.sync_status())
    }

    /// Resolve every placeholder course name through the registry
    ///
    /// Each rename is recorded as a `course_name_updated` interaction.
    /// Returns how many names were updated.
    pub async fn refresh_course_names(&self) -> usize {
        let unresolved: Vec<(String, String)> = {
            let state = self.inner.state();
            let patterns = &state.snapshot.interaction_patterns;
            patterns
                .unresolved_courses()
                .into_iter()
                .filter_map(|id| {
                    patterns
                        .most_clicked_courses
                        .iter()
                        .find(|c| c.course_id == id)
                        .map(|c| (id.clone(), c.course_name.clone()))
                })
                .collect()
        };

        let mut updated = 0;
        for (course_id, old_name) in unresolved {
            let Some(new_name) = self.inner.lookup_course_name(&course_id).await else {
                continue;
            };
            if new_name == old_name {
                continue;
            }
            if !self.inner.rename_course(&course_id, &new_name) {
                continue;
            }

            let mut details = Map::new();
            details.insert("courseId".to_string(), json!(course_id));
            details.insert("oldName".to_string(), json!(old_name));
            details.insert("newName".to_string(), json!(new_name));
            self.track_interaction("course_name_updated", details);
            updated += 1;
        }

        if updated > 0 {
            info!("Refreshed {} course names", updated);
            self.inner.schedule_snapshot_push();
        }
        updated
    }
}
