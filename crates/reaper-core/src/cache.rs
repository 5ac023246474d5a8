use crate::event::ObjectEvent;
use crate::object::{ManagedObject, ObjectKey};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

type Objects = HashMap<ObjectKey, ManagedObject>;

// ---------------------------------------------------------------------------
// Store (single writer)
// ---------------------------------------------------------------------------

/// Local view of the watched objects.
///
/// The `Store` is the only writer; it is owned by the cache synchronizer and
/// deliberately not `Clone`. Every mutation returns the [`ObjectEvent`]s it
/// caused so the caller can forward them to the event handler.
#[derive(Debug, Default)]
pub struct Store {
    objects: Arc<RwLock<Objects>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// A read-only handle sharing this store's contents.
    pub fn reader(&self) -> StoreReader {
        StoreReader {
            objects: Arc::clone(&self.objects),
        }
    }

    /// Insert or replace one object.
    ///
    /// Returns `None` when the cached copy is already at the same revision.
    pub fn apply(&self, obj: ManagedObject) -> Option<ObjectEvent> {
        let mut objects = self.write();
        match objects.insert(obj.key.clone(), obj.clone()) {
            None => Some(ObjectEvent::Added(obj)),
            Some(previous) if previous.same_revision(&obj) => None,
            Some(previous) => Some(ObjectEvent::Updated {
                previous,
                current: obj,
            }),
        }
    }

    /// Drop an object the authority reported as deleted.
    ///
    /// Returns `None` for objects this store never saw.
    pub fn remove(&self, obj: ManagedObject) -> Option<ObjectEvent> {
        let mut objects = self.write();
        objects
            .remove(&obj.key)
            .map(|_| ObjectEvent::Deleted(obj))
    }

    /// Replace the whole contents with a fresh enumeration.
    ///
    /// The returned events describe the difference between the old and new
    /// contents: `Added` for unseen keys, `Updated` for keys whose revision
    /// moved, `Deleted` (sorted by key) for keys missing from `listed`.
    /// Unchanged objects produce nothing, so repeated relists are idempotent.
    pub fn replace(&self, listed: Vec<ManagedObject>) -> Vec<ObjectEvent> {
        let mut objects = self.write();
        let mut events = Vec::new();
        let mut seen = HashSet::with_capacity(listed.len());
        let mut next = Objects::with_capacity(listed.len());

        for obj in listed {
            seen.insert(obj.key.clone());
            match objects.get(&obj.key) {
                None => events.push(ObjectEvent::Added(obj.clone())),
                Some(previous) if previous.same_revision(&obj) => {}
                Some(previous) => events.push(ObjectEvent::Updated {
                    previous: previous.clone(),
                    current: obj.clone(),
                }),
            }
            next.insert(obj.key.clone(), obj);
        }

        let mut gone: Vec<ManagedObject> = objects
            .drain()
            .filter(|(key, _)| !seen.contains(key))
            .map(|(_, obj)| obj)
            .collect();
        gone.sort_by(|a, b| a.key.cmp(&b.key));
        events.extend(gone.into_iter().map(ObjectEvent::Deleted));

        *objects = next;
        events
    }

    fn write(&self) -> RwLockWriteGuard<'_, Objects> {
        self.objects.write().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// StoreReader
// ---------------------------------------------------------------------------

/// Cloneable read-only view of a [`Store`].
#[derive(Debug, Clone)]
pub struct StoreReader {
    objects: Arc<RwLock<Objects>>,
}

impl StoreReader {
    pub fn get(&self, key: &ObjectKey) -> Option<ManagedObject> {
        self.read().get(key).cloned()
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// All cached keys, sorted.
    pub fn keys(&self) -> Vec<ObjectKey> {
        let mut keys: Vec<ObjectKey> = self.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn read(&self) -> RwLockReadGuard<'_, Objects> {
        self.objects.read().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod(name: &str, rv: &str) -> ManagedObject {
        ManagedObject::new("ns", name).with_resource_version(rv)
    }

    #[test]
    fn apply_new_object_is_added() {
        let store = Store::new();
        let event = store.apply(pod("a", "1")).unwrap();
        assert!(matches!(event, ObjectEvent::Added(ref o) if o.key.name == "a"));
        assert_eq!(store.reader().len(), 1);
    }

    #[test]
    fn apply_known_object_is_updated_with_previous() {
        let store = Store::new();
        store.apply(pod("a", "1"));
        let event = store
            .apply(pod("a", "2").with_label("delete-pod", "true"))
            .unwrap();
        match event {
            ObjectEvent::Updated { previous, current } => {
                assert_eq!(previous.resource_version.as_deref(), Some("1"));
                assert!(current.has_label("delete-pod"));
            }
            other => panic!("expected Updated, got {other:?}"),
        }
    }

    #[test]
    fn apply_same_revision_is_suppressed() {
        let store = Store::new();
        store.apply(pod("a", "1"));
        assert!(store.apply(pod("a", "1")).is_none());
    }

    #[test]
    fn remove_unknown_object_yields_nothing() {
        let store = Store::new();
        assert!(store.remove(pod("ghost", "1")).is_none());
    }

    #[test]
    fn remove_known_object_yields_deleted() {
        let store = Store::new();
        store.apply(pod("a", "1"));
        let event = store.remove(pod("a", "2")).unwrap();
        assert!(matches!(event, ObjectEvent::Deleted(_)));
        assert!(store.reader().is_empty());
    }

    #[test]
    fn replace_reports_diff_against_previous_contents() {
        let store = Store::new();
        store.apply(pod("keep", "1"));
        store.apply(pod("change", "1"));
        store.apply(pod("vanish", "1"));

        let events = store.replace(vec![pod("keep", "1"), pod("change", "2"), pod("new", "1")]);

        let kinds: Vec<(&str, String)> = events
            .iter()
            .map(|e| (e.kind(), e.key().name.clone()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("updated", "change".to_string()),
                ("added", "new".to_string()),
                ("deleted", "vanish".to_string()),
            ]
        );
        assert_eq!(
            store.reader().keys(),
            vec![
                ObjectKey::new("ns", "change"),
                ObjectKey::new("ns", "keep"),
                ObjectKey::new("ns", "new"),
            ]
        );
    }

    #[test]
    fn replace_with_identical_listing_is_idempotent() {
        let store = Store::new();
        let listing = vec![pod("a", "1"), pod("b", "7")];
        assert_eq!(store.replace(listing.clone()).len(), 2);
        assert!(store.replace(listing).is_empty());
        assert_eq!(store.reader().len(), 2);
    }

    #[test]
    fn reader_sees_writes_made_after_it_was_created() {
        let store = Store::new();
        let reader = store.reader();
        store.apply(pod("a", "1"));
        assert!(reader.contains(&ObjectKey::new("ns", "a")));
        assert_eq!(
            reader.get(&ObjectKey::new("ns", "a")).unwrap().resource_version,
            Some("1".to_string())
        );
    }
}
