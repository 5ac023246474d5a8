use crate::event::ObjectEvent;
use crate::object::ManagedObject;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default marker label: its presence asks the controller to delete the pod.
pub const DEFAULT_MARKER_LABEL: &str = "delete-pod";

// ---------------------------------------------------------------------------
// TriggerPolicy
// ---------------------------------------------------------------------------

/// When an update carrying the marker counts as a qualifying transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerPolicy {
    /// Every update whose new state carries the marker qualifies, even if the
    /// previous state already had it. At-least-once.
    #[default]
    Level,
    /// Only updates where the marker appears (absent before, present after).
    Edge,
}

impl TriggerPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerPolicy::Level => "level",
            TriggerPolicy::Edge => "edge",
        }
    }
}

impl fmt::Display for TriggerPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TriggerPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "level" => Ok(TriggerPolicy::Level),
            "edge" => Ok(TriggerPolicy::Edge),
            other => Err(format!("unknown trigger policy '{other}' (expected level or edge)")),
        }
    }
}

// ---------------------------------------------------------------------------
// Classification (output)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// The object must be deleted.
    Qualifying,
    /// Created with the marker already set. Never honored: the action needs an
    /// observed update.
    MarkerIgnoredOnCreate,
    /// The marker is not present.
    MarkerAbsent,
    /// Updated while already marked; skipped under [`TriggerPolicy::Edge`].
    AlreadyMarked,
    /// The object left the cache.
    Removed,
}

impl Classification {
    pub fn is_qualifying(&self) -> bool {
        matches!(self, Classification::Qualifying)
    }
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// Evaluates the marker-label predicate for cache events.
///
/// Pure and synchronous: it looks only at the labels carried by the event.
#[derive(Debug, Clone)]
pub struct Classifier {
    marker: String,
    policy: TriggerPolicy,
}

impl Classifier {
    pub fn new(marker: impl Into<String>, policy: TriggerPolicy) -> Self {
        Self {
            marker: marker.into(),
            policy,
        }
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    pub fn policy(&self) -> TriggerPolicy {
        self.policy
    }

    pub fn classify(&self, event: &ObjectEvent) -> Classification {
        match event {
            ObjectEvent::Added(obj) => self.classify_added(obj),
            ObjectEvent::Updated { previous, current } => self.classify_updated(previous, current),
            ObjectEvent::Deleted(_) => Classification::Removed,
        }
    }

    /// Creation never qualifies: the action requires an observed update.
    pub fn classify_added(&self, obj: &ManagedObject) -> Classification {
        if obj.has_label(&self.marker) {
            Classification::MarkerIgnoredOnCreate
        } else {
            Classification::MarkerAbsent
        }
    }

    pub fn classify_updated(
        &self,
        previous: &ManagedObject,
        current: &ManagedObject,
    ) -> Classification {
        if !current.has_label(&self.marker) {
            return Classification::MarkerAbsent;
        }
        match self.policy {
            TriggerPolicy::Level => Classification::Qualifying,
            TriggerPolicy::Edge if previous.has_label(&self.marker) => {
                Classification::AlreadyMarked
            }
            TriggerPolicy::Edge => Classification::Qualifying,
        }
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(DEFAULT_MARKER_LABEL, TriggerPolicy::default())
    }
}
