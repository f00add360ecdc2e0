//! Behavior aggregate - rolling summary of the interaction log
//!
//! Updated incrementally as events arrive. All counters only grow; the two
//! lists are capped (`MAX_TRACKED_COURSES`, `MAX_NAVIGATION_PATTERNS`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::events::{InteractionEvent, InteractionType};

/// Courses kept in the most-clicked ranking
pub const MAX_TRACKED_COURSES: usize = 20;
/// Navigation paths kept, most recent last
pub const MAX_NAVIGATION_PATTERNS: usize = 50;
/// Name used until the course registry supplies a real one
pub const UNKNOWN_COURSE: &str = "Unknown Course";

/// No usable name was supplied for the course
pub fn is_unknown_name(name: &str) -> bool {
    name.is_empty() || name == UNKNOWN_COURSE
}

/// Names that look like defaults rather than real titles; wider than
/// `is_unknown_name` and only used when refreshing names in bulk
pub fn is_placeholder_name(name: &str) -> bool {
    name.is_empty()
        || name == UNKNOWN_COURSE
        || name == "New Course"
        || name == "Untitled"
        || name.starts_with("Course ")
}

fn unknown_course() -> String {
    UNKNOWN_COURSE.to_string()
}

/// Association list of name -> count with unique keys
///
/// Serialized as a plain JSON object so the stored form matches what the
/// remote store returns for its map fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CountMap(BTreeMap<String, u64>);

impl CountMap {
    pub fn add(&mut self, key: &str, by: u64) {
        let entry = self.0.entry(key.to_string()).or_insert(0);
        *entry = entry.saturating_add(by);
    }

    #[allow(dead_code)]
    pub fn get(&self, key: &str) -> u64 {
        self.0.get(key).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Entry with the highest count; the first key wins a tie
    pub fn max_entry(&self) -> Option<(&str, u64)> {
        let mut best: Option<(&str, u64)> = None;
        for (key, value) in self.iter() {
            if best.map_or(true, |(_, v)| value > v) {
                best = Some((key, value));
            }
        }
        best
    }

    fn merge(&mut self, other: &CountMap) {
        for (key, value) in other.iter() {
            self.add(key, value);
        }
    }
}

impl FromIterator<(String, u64)> for CountMap {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Click statistics for one course
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseClick {
    pub course_id: String,
    #[serde(default = "unknown_course")]
    pub course_name: String,
    #[serde(default)]
    pub click_count: u64,
    #[serde(default = "Utc::now")]
    pub last_clicked: DateTime<Utc>,
}

/// Derived per-user behavior summary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BehaviorAggregate {
    /// Sorted by click count, descending; unique by course id
    pub most_clicked_courses: Vec<CourseClick>,
    /// Distinct action identifiers, first-seen order. Not capped: the set
    /// is bounded by the number of distinct actions the UI can emit.
    pub favorite_actions: Vec<String>,
    /// Feature name -> cumulative milliseconds
    pub time_spent_on_features: CountMap,
    pub navigation_patterns: Vec<String>,
    pub preferred_view_modes: CountMap,
    pub search_frequency: u64,
    pub filter_usage: CountMap,
    pub drag_drop_frequency: u64,
}

impl BehaviorAggregate {
    /// Fold one event into the aggregate
    ///
    /// Returns false when the event left the aggregate untouched (unknown
    /// kind or missing required detail).
    pub fn apply(&mut self, event: &InteractionEvent) -> bool {
        match event.kind {
            InteractionType::CourseClick => {
                let Some(course_id) = event.detail_str("courseId") else {
                    return false;
                };
                let name = event.detail_str("courseName");
                self.record_course_click(&course_id, name.as_deref(), event.timestamp);
            }
            InteractionType::ActionPerformed => {
                let Some(action) = event.detail_str("action") else {
                    return false;
                };
                if !self.favorite_actions.contains(&action) {
                    self.favorite_actions.push(action);
                }
            }
            InteractionType::FeatureUsage => {
                let Some(feature) = event.detail_str("feature") else {
                    return false;
                };
                let duration = event.detail_u64("duration").unwrap_or(0);
                self.time_spent_on_features.add(&feature, duration);
            }
            InteractionType::Navigation => {
                let Some(path) = event.detail_str("path") else {
                    return false;
                };
                self.navigation_patterns.push(path);
                self.trim_navigation();
            }
            InteractionType::ViewModeChange => {
                let Some(view_mode) = event.detail_str("viewMode") else {
                    return false;
                };
                self.preferred_view_modes.add(&view_mode, 1);
            }
            InteractionType::Search => {
                self.search_frequency = self.search_frequency.saturating_add(1);
            }
            InteractionType::FilterUsed => {
                let Some(filter) = event.detail_str("filter") else {
                    return false;
                };
                self.filter_usage.add(&filter, 1);
            }
            InteractionType::DragDrop => {
                self.drag_drop_frequency = self.drag_drop_frequency.saturating_add(1);
            }
            InteractionType::Other(_) => return false,
        }
        true
    }

    fn record_course_click(&mut self, course_id: &str, name: Option<&str>, at: DateTime<Utc>) {
        let real_name = name.filter(|n| !is_unknown_name(n));

        match self.most_clicked_courses.iter_mut().find(|c| c.course_id == course_id) {
            Some(course) => {
                course.click_count = course.click_count.saturating_add(1);
                course.last_clicked = at;
                if let Some(n) = real_name {
                    course.course_name = n.to_string();
                }
            }
            None => self.most_clicked_courses.push(CourseClick {
                course_id: course_id.to_string(),
                course_name: name.unwrap_or(UNKNOWN_COURSE).to_string(),
                click_count: 1,
                last_clicked: at,
            }),
        }

        self.rank_courses();
    }

    /// Stable sort by click count, then drop the tail beyond the cap
    fn rank_courses(&mut self) {
        self.most_clicked_courses
            .sort_by(|a, b| b.click_count.cmp(&a.click_count));
        self.most_clicked_courses.truncate(MAX_TRACKED_COURSES);
    }

    fn trim_navigation(&mut self) {
        let excess = self
            .navigation_patterns
            .len()
            .saturating_sub(MAX_NAVIGATION_PATTERNS);
        if excess > 0 {
            self.navigation_patterns.drain(..excess);
        }
    }

    /// Patch a course's display name; false if the course isn't tracked
    pub fn rename_course(&mut self, course_id: &str, name: &str) -> bool {
        match self.most_clicked_courses.iter_mut().find(|c| c.course_id == course_id) {
            Some(course) => {
                course.course_name = name.to_string();
                true
            }
            None => false,
        }
    }

    /// Whether a tracked course still has no name at all
    pub fn is_missing_name(&self, course_id: &str) -> bool {
        self.most_clicked_courses
            .iter()
            .any(|c| c.course_id == course_id && is_unknown_name(&c.course_name))
    }

    /// Course ids whose display name looks like a placeholder
    pub fn unresolved_courses(&self) -> Vec<String> {
        self.most_clicked_courses
            .iter()
            .filter(|c| is_placeholder_name(&c.course_name))
            .map(|c| c.course_id.clone())
            .collect()
    }

    /// Additive merge of another aggregate into this one
    ///
    /// Click counts and counters are summed, the later `lastClicked` wins,
    /// actions are unioned, navigation is appended; both lists are re-capped.
    pub fn merge(&mut self, other: &BehaviorAggregate) {
        for incoming in &other.most_clicked_courses {
            match self
                .most_clicked_courses
                .iter_mut()
                .find(|c| c.course_id == incoming.course_id)
            {
                Some(course) => {
                    course.click_count = course.click_count.saturating_add(incoming.click_count);
                    if incoming.last_clicked > course.last_clicked {
                        course.last_clicked = incoming.last_clicked;
                    }
                    if is_placeholder_name(&course.course_name)
                        && !is_placeholder_name(&incoming.course_name)
                    {
                        course.course_name = incoming.course_name.clone();
                    }
                }
                None => self.most_clicked_courses.push(incoming.clone()),
            }
        }
        self.rank_courses();

        for action in &other.favorite_actions {
            if !self.favorite_actions.contains(action) {
                self.favorite_actions.push(action.clone());
            }
        }

        self.time_spent_on_features.merge(&other.time_spent_on_features);
        self.navigation_patterns
            .extend(other.navigation_patterns.iter().cloned());
        self.trim_navigation();
        self.preferred_view_modes.merge(&other.preferred_view_modes);
        self.filter_usage.merge(&other.filter_usage);
        self.search_frequency = self.search_frequency.saturating_add(other.search_frequency);
        self.drag_drop_frequency = self
            .drag_drop_frequency
            .saturating_add(other.drag_drop_frequency);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map, Value};

    fn event(kind: &str, details: Value) -> InteractionEvent {
        let details: Map<String, Value> = match details {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        InteractionEvent::new(InteractionType::from(kind), details, "session_test", Utc::now())
    }

    fn click(id: &str, name: &str) -> InteractionEvent {
        event("course_click", json!({"courseId": id, "courseName": name}))
    }

    #[test]
    fn test_course_click_ranking() {
        let mut agg = BehaviorAggregate::default();
        for _ in 0..5 {
            agg.apply(&click("c1", "Algebra"));
        }
        for _ in 0..2 {
            agg.apply(&click("c2", "Biology"));
        }

        let courses = &agg.most_clicked_courses;
        assert_eq!(courses.len(), 2);
        assert_eq!(courses[0].course_id, "c1");
        assert_eq!(courses[0].click_count, 5);
        assert_eq!(courses[0].course_name, "Algebra");
        assert_eq!(courses[1].course_id, "c2");
        assert_eq!(courses[1].click_count, 2);
    }

    #[test]
    fn test_ranking_reorders_and_keeps_ties_stable() {
        let mut agg = BehaviorAggregate::default();
        agg.apply(&click("a", "A"));
        agg.apply(&click("b", "B"));
        agg.apply(&click("c", "C"));
        assert_eq!(
            agg.most_clicked_courses.iter().map(|c| c.course_id.as_str()).collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );

        agg.apply(&click("c", "C"));
        assert_eq!(agg.most_clicked_courses[0].course_id, "c");
        assert_eq!(agg.most_clicked_courses[1].course_id, "a");
        assert_eq!(agg.most_clicked_courses[2].course_id, "b");
    }

    #[test]
    fn test_course_cap_and_uniqueness() {
        let mut agg = BehaviorAggregate::default();
        for round in 0..3 {
            for i in 0..30 {
                agg.apply(&click(&format!("course-{}", (i * 7 + round) % 30), "X"));
            }
        }

        let courses = &agg.most_clicked_courses;
        assert!(courses.len() <= MAX_TRACKED_COURSES);
        let mut ids: Vec<&str> = courses.iter().map(|c| c.course_id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), courses.len());
        assert!(courses.windows(2).all(|w| w[0].click_count >= w[1].click_count));
    }

    #[test]
    fn test_placeholder_name_does_not_overwrite_real_name() {
        let mut agg = BehaviorAggregate::default();
        agg.apply(&event("course_click", json!({"courseId": "c1"})));
        assert_eq!(agg.most_clicked_courses[0].course_name, UNKNOWN_COURSE);
        assert_eq!(agg.unresolved_courses(), vec!["c1".to_string()]);

        agg.apply(&click("c1", "Chemistry"));
        agg.apply(&click("c1", UNKNOWN_COURSE));
        assert_eq!(agg.most_clicked_courses[0].course_name, "Chemistry");
        assert!(agg.unresolved_courses().is_empty());
    }

    #[test]
    fn test_click_without_course_id_is_skipped() {
        let mut agg = BehaviorAggregate::default();
        assert!(!agg.apply(&event("course_click", json!({"courseName": "Algebra"}))));
        assert!(agg.most_clicked_courses.is_empty());
    }

    #[test]
    fn test_counters_and_maps() {
        let mut agg = BehaviorAggregate::default();
        agg.apply(&event("feature_usage", json!({"feature": "search", "duration": 1000})));
        agg.apply(&event("feature_usage", json!({"feature": "search", "duration": 500})));
        agg.apply(&event("feature_usage", json!({"feature": "filtering"})));
        agg.apply(&event("view_mode_change", json!({"viewMode": "grid"})));
        agg.apply(&event("view_mode_change", json!({"viewMode": "grid"})));
        agg.apply(&event("filter_used", json!({"filter": "in_progress"})));
        agg.apply(&event("search", json!({"query": "alg"})));
        agg.apply(&event("drag_drop", json!({})));
        agg.apply(&event("action_performed", json!({"action": "archive"})));
        agg.apply(&event("action_performed", json!({"action": "archive"})));

        assert_eq!(agg.time_spent_on_features.get("search"), 1500);
        assert_eq!(agg.time_spent_on_features.get("filtering"), 0);
        assert_eq!(agg.preferred_view_modes.get("grid"), 2);
        assert_eq!(agg.filter_usage.get("in_progress"), 1);
        assert_eq!(agg.search_frequency, 1);
        assert_eq!(agg.drag_drop_frequency, 1);
        assert_eq!(agg.favorite_actions, vec!["archive".to_string()]);
    }

    #[test]
    fn test_counters_never_decrease() {
        let mut agg = BehaviorAggregate::default();
        let mut last = (0, 0, 0);
        for i in 0..40 {
            let e = match i % 4 {
                0 => event("search", json!({})),
                1 => event("drag_drop", json!({})),
                2 => event("feature_usage", json!({"feature": "course_preview", "duration": i})),
                _ => event("navigation", json!({"path": format!("/p/{}", i)})),
            };
            agg.apply(&e);
            let now = (
                agg.search_frequency,
                agg.drag_drop_frequency,
                agg.time_spent_on_features.get("course_preview"),
            );
            assert!(now.0 >= last.0 && now.1 >= last.1 && now.2 >= last.2);
            last = now;
        }
    }

    #[test]
    fn test_navigation_keeps_most_recent() {
        let mut agg = BehaviorAggregate::default();
        for i in 0..60 {
            agg.apply(&event("navigation", json!({"path": format!("/courses/{}", i)})));
        }
        assert_eq!(agg.navigation_patterns.len(), MAX_NAVIGATION_PATTERNS);
        assert_eq!(agg.navigation_patterns[0], "/courses/10");
        assert_eq!(agg.navigation_patterns[49], "/courses/59");
    }

    #[test]
    fn test_unknown_kind_passes_through() {
        let mut agg = BehaviorAggregate::default();
        assert!(!agg.apply(&event("mode_activated", json!({"mode": "visual"}))));
        assert_eq!(agg, BehaviorAggregate::default());
    }

    #[test]
    fn test_round_trip_through_json() {
        let mut agg = BehaviorAggregate::default();
        agg.apply(&click("c1", "Algebra"));
        agg.apply(&event("feature_usage", json!({"feature": "search", "duration": 42})));
        agg.apply(&event("view_mode_change", json!({"viewMode": "list"})));
        agg.apply(&event("filter_used", json!({"filter": "recent"})));
        agg.apply(&event("navigation", json!({"path": "/dashboard"})));

        let json = serde_json::to_string(&agg).unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["timeSpentOnFeatures"]["search"], 42);
        assert_eq!(value["mostClickedCourses"][0]["courseId"], "c1");

        let back: BehaviorAggregate = serde_json::from_str(&json).unwrap();
        assert_eq!(back, agg);
    }

    #[test]
    fn test_remote_shape_without_names() {
        let agg: BehaviorAggregate = serde_json::from_value(json!({
            "mostClickedCourses": [{"courseId": "665f", "clickCount": 4}],
            "searchFrequency": 3
        }))
        .unwrap();
        assert_eq!(agg.most_clicked_courses[0].course_name, UNKNOWN_COURSE);
        assert_eq!(agg.search_frequency, 3);
        assert_eq!(agg.filter_usage, CountMap::default());
    }

    #[test]
    fn test_merge_sums_and_recaps() {
        let mut local = BehaviorAggregate::default();
        for _ in 0..3 {
            local.apply(&click("c1", "Algebra"));
        }
        local.apply(&event("search", json!({})));
        local.apply(&event("action_performed", json!({"action": "pin"})));

        let mut remote = BehaviorAggregate::default();
        remote.apply(&click("c2", "Biology"));
        remote.apply(&event("course_click", json!({"courseId": "c1"})));
        remote.apply(&event("search", json!({})));
        remote.apply(&event("action_performed", json!({"action": "pin"})));
        remote.apply(&event("action_performed", json!({"action": "share"})));
        remote.apply(&event("feature_usage", json!({"feature": "search", "duration": 10})));

        local.merge(&remote);
        assert_eq!(local.most_clicked_courses[0].course_id, "c1");
        assert_eq!(local.most_clicked_courses[0].click_count, 4);
        assert_eq!(local.most_clicked_courses[0].course_name, "Algebra");
        assert_eq!(local.search_frequency, 2);
        assert_eq!(local.favorite_actions, vec!["pin".to_string(), "share".to_string()]);
        assert_eq!(local.time_spent_on_features.get("search"), 10);
    }

    #[test]
    fn test_max_entry_tie_keeps_first() {
        let map: CountMap = vec![("b".to_string(), 5), ("a".to_string(), 5), ("c".to_string(), 1)]
            .into_iter()
            .collect();
        assert_eq!(map.max_entry(), Some(("a", 5)));
        assert_eq!(CountMap::default().max_entry(), None);
    }

    #[test]
    fn test_course_titled_like_placeholder_keeps_its_name() {
        let mut agg = BehaviorAggregate::default();
        agg.apply(&event("course_click", json!({"courseId": "c1"})));
        assert!(agg.is_missing_name("c1"));

        agg.apply(&click("c1", "Course Design Patterns"));
        assert_eq!(agg.most_clicked_courses[0].course_name, "Course Design Patterns");
        assert!(!agg.is_missing_name("c1"));
        assert!(!agg.is_missing_name("c2"));
    }

    #[test]
    fn test_placeholder_names() {
        assert!(is_unknown_name(""));
        assert!(is_unknown_name(UNKNOWN_COURSE));
        assert!(!is_unknown_name("Course 12"));
        assert!(is_placeholder_name("Unknown Course"));
        assert!(is_placeholder_name("Course 12"));
        assert!(is_placeholder_name("Untitled"));
        assert!(!is_placeholder_name("Organic Chemistry"));
    }
}
