//! Layout preferences and adaptive tuning settings
//!
//! Preferences are the user-visible knobs of the course grid. They change
//! either through an explicit update (one key at a time) or through a
//! partial patch produced by the adaptation engine.

use serde::{Deserialize, Serialize};

use crate::error::AdaptiveError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardSize {
    Small,
    #[default]
    Medium,
    Large,
    Adaptive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GridColumns {
    #[default]
    #[serde(rename = "auto")]
    Auto,
    #[serde(rename = "2")]
    Two,
    #[serde(rename = "3")]
    Three,
    #[serde(rename = "4")]
    Four,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Custom,
    Alphabetical,
    Progress,
    Recent,
    /// Accepted from the remote store, never produced locally
    Personalized,
}

macro_rules! str_enum {
    ($ty:ty { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }

            fn parse(value: &str) -> Option<Self> {
                match value {
                    $($name => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(CardSize { Small => "small", Medium => "medium", Large => "large", Adaptive => "adaptive" });
str_enum!(GridColumns { Auto => "auto", Two => "2", Three => "3", Four => "4" });
str_enum!(SortOrder {
    Custom => "custom",
    Alphabetical => "alphabetical",
    Progress => "progress",
    Recent => "recent",
    Personalized => "personalized",
});

/// Course grid presentation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LayoutPreferences {
    pub card_size: CardSize,
    pub grid_columns: GridColumns,
    pub sort_order: SortOrder,
    pub show_progress: bool,
    pub show_thumbnails: bool,
    pub compact_mode: bool,
    pub sidebar_collapsed: bool,
}

impl Default for LayoutPreferences {
    fn default() -> Self {
        Self {
            card_size: CardSize::Medium,
            grid_columns: GridColumns::Auto,
            sort_order: SortOrder::Custom,
            show_progress: true,
            show_thumbnails: true,
            compact_mode: false,
            sidebar_collapsed: false,
        }
    }
}

impl LayoutPreferences {
    /// Merge only the keys present in `patch`
    pub fn apply(&mut self, patch: &LayoutPatch) {
        if let Some(v) = patch.card_size {
            self.card_size = v;
        }
        if let Some(v) = patch.grid_columns {
            self.grid_columns = v;
        }
        if let Some(v) = patch.sort_order {
            self.sort_order = v;
        }
        if let Some(v) = patch.show_progress {
            self.show_progress = v;
        }
        if let Some(v) = patch.show_thumbnails {
            self.show_thumbnails = v;
        }
        if let Some(v) = patch.compact_mode {
            self.compact_mode = v;
        }
        if let Some(v) = patch.sidebar_collapsed {
            self.sidebar_collapsed = v;
        }
    }
}

/// Partial update to `LayoutPreferences`; `None` keys are left alone
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card_size: Option<CardSize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grid_columns: Option<GridColumns>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<SortOrder>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_progress: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_thumbnails: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compact_mode: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sidebar_collapsed: Option<bool>,
}

impl LayoutPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Set one key, overwriting whatever an earlier rule wrote
    pub fn set(&mut self, pref: LayoutPreference) {
        match pref {
            LayoutPreference::CardSize(v) => self.card_size = Some(v),
            LayoutPreference::GridColumns(v) => self.grid_columns = Some(v),
            LayoutPreference::SortOrder(v) => self.sort_order = Some(v),
            LayoutPreference::ShowProgress(v) => self.show_progress = Some(v),
            LayoutPreference::ShowThumbnails(v) => self.show_thumbnails = Some(v),
            LayoutPreference::CompactMode(v) => self.compact_mode = Some(v),
            LayoutPreference::SidebarCollapsed(v) => self.sidebar_collapsed = Some(v),
        }
    }
}

/// A single preference key with its value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutPreference {
    CardSize(CardSize),
    GridColumns(GridColumns),
    SortOrder(SortOrder),
    ShowProgress(bool),
    ShowThumbnails(bool),
    CompactMode(bool),
    SidebarCollapsed(bool),
}

impl LayoutPreference {
    /// Parse a `key`/`value` pair as written by the CLI or a UI form.
    /// Keys are accepted in camelCase or snake_case.
    pub fn parse(key: &str, value: &str) -> Result<Self, AdaptiveError> {
        let invalid = || AdaptiveError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        };
        let flag = || match value {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(invalid()),
        };

        match key {
            "cardSize" | "card_size" => CardSize::parse(value).map(Self::CardSize).ok_or_else(invalid),
            "gridColumns" | "grid_columns" => {
                GridColumns::parse(value).map(Self::GridColumns).ok_or_else(invalid)
            }
            "sortOrder" | "sort_order" => SortOrder::parse(value).map(Self::SortOrder).ok_or_else(invalid),
            "showProgress" | "show_progress" => flag().map(Self::ShowProgress),
            "showThumbnails" | "show_thumbnails" => flag().map(Self::ShowThumbnails),
            "compactMode" | "compact_mode" => flag().map(Self::CompactMode),
            "sidebarCollapsed" | "sidebar_collapsed" => flag().map(Self::SidebarCollapsed),
            _ => Err(AdaptiveError::UnknownPreference(key.to_string())),
        }
    }
}

/// Tuning constants for the adaptation engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdaptiveSettings {
    pub learning_rate: f64,
    /// Event log length at which adaptation runs on every event
    pub min_interactions: u32,
    pub adaptation_threshold: f64,
    /// Milliseconds after which adaptation runs regardless of volume
    pub reset_interval: u64,
}

pub const DEFAULT_RESET_INTERVAL_MS: u64 = 7 * 24 * 60 * 60 * 1000;

impl Default for AdaptiveSettings {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            min_interactions: 5,
            adaptation_threshold: 0.7,
            reset_interval: DEFAULT_RESET_INTERVAL_MS,
        }
    }
}
