//! Learning module for the adaptive layout engine
//!
//! Turns the interaction stream into a behavior aggregate and, from that,
//! into layout adaptations.

pub mod adaptation;
pub mod aggregate;
pub mod events;

pub use adaptation::{adapt_layout_based_on_patterns, analyze_behavior_patterns, should_adapt};
pub use aggregate::{is_unknown_name, BehaviorAggregate};
pub use events::{EventLog, InteractionEvent, InteractionType};

use crate::storage::LayoutPatch;

/// Result of one adaptation gate evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdaptationOutcome {
    /// Gate closed: too soon and too little data
    Skipped,
    /// Pass ran; the patch may be empty if no rule fired
    Adapted(LayoutPatch),
}

impl AdaptationOutcome {
    pub fn patch(&self) -> Option<&LayoutPatch> {
        match self {
            Self::Adapted(patch) => Some(patch),
            Self::Skipped => None,
        }
    }
}
