use reaper_core::classifier::{Classification, Classifier};
use reaper_core::object::ManagedObject;

use crate::dispatcher::{DispatchHandle, Submission};
use crate::synchronizer::EventHandler;

/// Event handler that deletes pods once they are labeled with the marker.
///
/// Classification happens inline on the synchronizer task; deletes are handed
/// to the dispatcher and never awaited here.
pub struct Reaper {
    classifier: Classifier,
    dispatch: DispatchHandle,
}

impl Reaper {
    pub fn new(classifier: Classifier, dispatch: DispatchHandle) -> Self {
        Self {
            classifier,
            dispatch,
        }
    }

    fn reap(&self, obj: &ManagedObject) {
        let marker = self.classifier.marker();
        tracing::info!(key = %obj.key, "pod has been labeled with '{marker}', deleting");
        match self.dispatch.dispatch(obj.key.clone()) {
            Submission::Queued => {}
            Submission::Collapsed => {
                tracing::debug!(key = %obj.key, "delete already pending");
            }
            Submission::Closed => {
                tracing::warn!(key = %obj.key, "dispatcher stopped, delete not issued");
            }
        }
    }
}

impl EventHandler for Reaper {
    fn on_added(&mut self, obj: &ManagedObject) {
        let marker = self.classifier.marker();
        match self.classifier.classify_added(obj) {
            Classification::MarkerIgnoredOnCreate => tracing::warn!(
                key = %obj.key,
                "label '{marker}' is not honored on creation; update the pod for it to take effect"
            ),
            _ => tracing::info!(key = %obj.key, "pod does not have the label '{marker}'"),
        }
    }

    fn on_updated(&mut self, previous: &ManagedObject, current: &ManagedObject) {
        match self.classifier.classify_updated(previous, current) {
            Classification::Qualifying => self.reap(current),
            Classification::AlreadyMarked => {
                tracing::debug!(key = %current.key, "already labeled, skipping under edge trigger");
            }
            _ => {
                let marker = self.classifier.marker();
                tracing::info!(key = %current.key, "label '{marker}' is missing");
            }
        }
    }

    fn on_deleted(&mut self, obj: &ManagedObject) {
        tracing::debug!(key = %obj.key, "pod removed");
    }
}
