//! Interaction events and the bounded event log
//!
//! Every tracked UI action becomes one immutable `InteractionEvent`. The log
//! keeps the most recent `MAX_HISTORY` entries, evicting oldest first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::VecDeque;

/// Maximum events retained in the log
pub const MAX_HISTORY: usize = 1000;

/// Kind of tracked interaction
///
/// Unknown kinds emitted by collaborators (e.g. `mode_activated`) are kept
/// verbatim; they are logged but never touch the aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InteractionType {
    CourseClick,
    ActionPerformed,
    FeatureUsage,
    Navigation,
    ViewModeChange,
    Search,
    FilterUsed,
    DragDrop,
    Other(String),
}

impl InteractionType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::CourseClick => "course_click",
            Self::ActionPerformed => "action_performed",
            Self::FeatureUsage => "feature_usage",
            Self::Navigation => "navigation",
            Self::ViewModeChange => "view_mode_change",
            Self::Search => "search",
            Self::FilterUsed => "filter_used",
            Self::DragDrop => "drag_drop",
            Self::Other(name) => name,
        }
    }
}

impl From<&str> for InteractionType {
    fn from(name: &str) -> Self {
        match name {
            "course_click" => Self::CourseClick,
            "action_performed" => Self::ActionPerformed,
            "feature_usage" => Self::FeatureUsage,
            "navigation" => Self::Navigation,
            "view_mode_change" => Self::ViewModeChange,
            "search" => Self::Search,
            "filter_used" => Self::FilterUsed,
            "drag_drop" => Self::DragDrop,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for InteractionType {
    fn from(name: String) -> Self {
        Self::from(name.as_str())
    }
}

impl From<InteractionType> for String {
    fn from(kind: InteractionType) -> Self {
        match kind {
            InteractionType::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for InteractionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tracked user action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionEvent {
    #[serde(rename = "type")]
    pub kind: InteractionType,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub details: Map<String, Value>,
    #[serde(default)]
    pub session_id: String,
}

impl InteractionEvent {
    pub fn new(
        kind: InteractionType,
        details: Map<String, Value>,
        session_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            timestamp,
            details,
            session_id: session_id.into(),
        }
    }

    /// String detail; numeric ids are stringified, empty strings ignored
    pub fn detail_str(&self, key: &str) -> Option<String> {
        match self.details.get(key)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Non-negative integer detail; fractional values are truncated
    pub fn detail_u64(&self, key: &str) -> Option<u64> {
        let value = self.details.get(key)?;
        value
            .as_u64()
            .or_else(|| value.as_f64().filter(|f| *f > 0.0).map(|f| f as u64))
    }
}

/// Append-only interaction history capped at `MAX_HISTORY`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct EventLog {
    events: VecDeque<InteractionEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from stored events, keeping only the most recent `MAX_HISTORY`
    pub fn from_events(events: Vec<InteractionEvent>) -> Self {
        let mut events = VecDeque::from(events);
        while events.len() > MAX_HISTORY {
            events.pop_front();
        }
        Self { events }
    }

    pub fn push(&mut self, event: InteractionEvent) {
        self.events.push_back(event);
        while self.events.len() > MAX_HISTORY {
            self.events.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &InteractionEvent> {
        self.events.iter()
    }

    /// The last `n` events, oldest first
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &InteractionEvent> {
        self.events.iter().skip(self.events.len().saturating_sub(n))
    }
}

impl<'de> Deserialize<'de> for EventLog {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<InteractionEvent>::deserialize(deserializer).map(Self::from_events)
    }
}
