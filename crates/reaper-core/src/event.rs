use crate::object::{ManagedObject, ObjectKey};

/// A change to the local cache, delivered to the event handler exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectEvent {
    Added(ManagedObject),
    Updated {
        previous: ManagedObject,
        current: ManagedObject,
    },
    Deleted(ManagedObject),
}

impl ObjectEvent {
    pub fn key(&self) -> &ObjectKey {
        match self {
            ObjectEvent::Added(obj) | ObjectEvent::Deleted(obj) => &obj.key,
            ObjectEvent::Updated { current, .. } => &current.key,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ObjectEvent::Added(_) => "added",
            ObjectEvent::Updated { .. } => "updated",
            ObjectEvent::Deleted(_) => "deleted",
        }
    }
}
