use std::time::Duration;

use futures::StreamExt;
use reaper_core::cache::{Store, StoreReader};
use reaper_core::event::ObjectEvent;
use reaper_core::object::ManagedObject;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::source::{EventSource, SourceEvent};

// ─── EventHandler ─────────────────────────────────────────────────────────

/// Receives cache changes on the synchronizer's task, in delivery order.
///
/// Implementations must not block: anything slow belongs on another task.
pub trait EventHandler: Send + 'static {
    fn on_added(&mut self, obj: &ManagedObject);

    fn on_updated(&mut self, previous: &ManagedObject, current: &ManagedObject);

    fn on_deleted(&mut self, _obj: &ManagedObject) {}

    /// Called once, after the gate opens and before the first list is
    /// delivered.
    fn on_synced(&mut self) {}
}

fn deliver<H: EventHandler>(handler: &mut H, event: ObjectEvent) {
    match event {
        ObjectEvent::Added(obj) => handler.on_added(&obj),
        ObjectEvent::Updated { previous, current } => handler.on_updated(&previous, &current),
        ObjectEvent::Deleted(obj) => handler.on_deleted(&obj),
    }
}

// ─── SyncGate ─────────────────────────────────────────────────────────────

/// Observer for the "initial list complete" flag.
#[derive(Debug, Clone)]
pub struct SyncGate {
    rx: watch::Receiver<bool>,
}

impl SyncGate {
    pub fn is_synced(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the first list has been applied.
    ///
    /// Returns `false` if the synchronizer went away before that happened.
    pub async fn wait(&mut self) -> bool {
        self.rx.wait_for(|synced| *synced).await.is_ok()
    }
}

// ─── CacheSynchronizer ────────────────────────────────────────────────────

/// Keeps a [`Store`] in step with an [`EventSource`] and forwards the
/// resulting [`ObjectEvent`]s to an [`EventHandler`].
pub struct CacheSynchronizer<S> {
    source: S,
    store: Store,
    synced: watch::Sender<bool>,
    resync_backoff: Duration,
}

impl<S: EventSource> CacheSynchronizer<S> {
    pub fn new(source: S, resync_backoff: Duration) -> Self {
        let (synced, _) = watch::channel(false);
        Self {
            source,
            store: Store::new(),
            synced,
            resync_backoff,
        }
    }

    pub fn reader(&self) -> StoreReader {
        self.store.reader()
    }

    pub fn gate(&self) -> SyncGate {
        SyncGate {
            rx: self.synced.subscribe(),
        }
    }

    pub fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Pump events until `stop` is cancelled.
    ///
    /// Stream errors are logged and skipped. When the stream ends the source
    /// is re-opened after `resync_backoff`, which starts a fresh list.
    pub async fn run<H: EventHandler>(self, mut handler: H, stop: CancellationToken) {
        let mut stream = self.source.watch();
        let mut relist: Option<Vec<ManagedObject>> = None;

        loop {
            let next = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(event)) => self.handle(event, &mut relist, &mut handler),
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "watch stream error");
                }
                None => {
                    tracing::warn!(
                        backoff = ?self.resync_backoff,
                        "watch stream ended, re-listing"
                    );
                    relist = None;
                    tokio::select! {
                        biased;
                        _ = stop.cancelled() => break,
                        _ = tokio::time::sleep(self.resync_backoff) => {}
                    }
                    stream = self.source.watch();
                }
            }
        }

        tracing::debug!(cached = self.store.reader().len(), "cache synchronizer stopped");
    }

    fn handle<H: EventHandler>(
        &self,
        event: SourceEvent,
        relist: &mut Option<Vec<ManagedObject>>,
        handler: &mut H,
    ) {
        match event {
            SourceEvent::Init => {
                *relist = Some(Vec::new());
            }
            SourceEvent::InitApply(obj) => {
                relist.get_or_insert_with(Vec::new).push(obj);
            }
            SourceEvent::InitDone => {
                let listed = relist.take().unwrap_or_default();
                let count = listed.len();
                let events = self.store.replace(listed);

                if self.has_synced() {
                    tracing::info!(objects = count, changes = events.len(), "cache re-listed");
                } else {
                    self.synced.send_replace(true);
                    tracing::info!(objects = count, "initial cache sync complete");
                    handler.on_synced();
                }

                for event in events {
                    deliver(handler, event);
                }
            }
            // Until the first list lands, the list is the only source of
            // truth: an object's first observation must reach `on_added`.
            SourceEvent::Apply(obj) | SourceEvent::Delete(obj) if !self.has_synced() => {
                tracing::debug!(key = %obj.key, "ignoring watch event before initial sync");
            }
            SourceEvent::Apply(obj) => {
                if let Some(event) = self.store.apply(obj) {
                    deliver(handler, event);
                }
            }
            SourceEvent::Delete(obj) => {
                if let Some(event) = self.store.remove(obj) {
                    deliver(handler, event);
                }
            }
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ChannelSource;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq)]
    enum Seen {
        Synced,
        Added(String),
        Updated(String),
        Deleted(String),
    }

    /// Records callbacks and whether the gate was open at the time.
    #[derive(Clone)]
    struct Recorder {
        seen: Arc<Mutex<Vec<Seen>>>,
        gate: SyncGate,
        gated: Arc<Mutex<bool>>,
    }

    impl Recorder {
        fn new(gate: SyncGate) -> Self {
            Self {
                seen: Arc::default(),
                gate,
                gated: Arc::new(Mutex::new(true)),
            }
        }

        fn record(&self, seen: Seen) {
            if !self.gate.is_synced() {
                *self.gated.lock().unwrap() = false;
            }
            self.seen.lock().unwrap().push(seen);
        }

        fn seen(&self) -> Vec<Seen> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl EventHandler for Recorder {
        fn on_added(&mut self, obj: &ManagedObject) {
            self.record(Seen::Added(obj.key.name.clone()));
        }

        fn on_updated(&mut self, _previous: &ManagedObject, current: &ManagedObject) {
            self.record(Seen::Updated(current.key.name.clone()));
        }

        fn on_deleted(&mut self, obj: &ManagedObject) {
            self.record(Seen::Deleted(obj.key.name.clone()));
        }

        fn on_synced(&mut self) {
            self.record(Seen::Synced);
        }
    }

    fn pod(name: &str, rv: &str) -> ManagedObject {
        ManagedObject::new("ns", name).with_resource_version(rv)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    fn start(
        source: ChannelSource,
    ) -> (Recorder, StoreReader, SyncGate, CancellationToken) {
        let sync = CacheSynchronizer::new(source, Duration::from_millis(10));
        let gate = sync.gate();
        let reader = sync.reader();
        let recorder = Recorder::new(sync.gate());
        let stop = CancellationToken::new();
        tokio::spawn(sync.run(recorder.clone(), stop.clone()));
        (recorder, reader, gate, stop)
    }

    #[tokio::test]
    async fn nothing_is_delivered_before_initial_sync() {
        let (feed, source) = ChannelSource::channel();
        let (recorder, reader, gate, _stop) = start(source);

        feed.apply(pod("early", "1"));
        settle().await;
        assert!(!gate.is_synced());
        assert!(recorder.seen().is_empty());
        assert!(reader.is_empty());

        feed.list(vec![pod("early", "1"), pod("b", "1")]);
        settle().await;
        assert!(gate.is_synced());
        assert_eq!(
            recorder.seen(),
            vec![Seen::Added("early".into()), Seen::Added("b".into())]
        );
        assert!(*recorder.gated.lock().unwrap());
    }

    #[tokio::test]
    async fn first_observation_is_added_even_after_an_early_watch_event() {
        let (feed, source) = ChannelSource::channel();
        let (recorder, reader, _gate, _stop) = start(source);

        feed.apply(pod("a", "1"));
        feed.delete(pod("gone", "1"));
        feed.list(vec![pod("a", "2").with_label("delete-pod", "true")]);
        settle().await;

        assert_eq!(recorder.seen(), vec![Seen::Added("a".into())]);
        assert_eq!(reader.len(), 1);
    }

    #[tokio::test]
    async fn synced_hook_runs_once_before_first_delivery() {
        let (feed, source) = ChannelSource::channel();
        let sync = CacheSynchronizer::new(source, Duration::from_millis(10));
        let recorder = Recorder::new(sync.gate());
        let stop = CancellationToken::new();
        tokio::spawn(sync.run(recorder.clone(), stop.clone()));

        feed.list(vec![pod("a", "1")]);
        feed.disconnect();
        feed.list(vec![pod("a", "1"), pod("b", "1")]);
        settle().await;

        assert_eq!(
            recorder.seen(),
            vec![
                Seen::Synced,
                Seen::Added("a".into()),
                Seen::Added("b".into())
            ]
        );
    }

    #[tokio::test]
    async fn watch_events_follow_the_initial_list() {
        let (feed, source) = ChannelSource::channel();
        let (recorder, reader, _gate, _stop) = start(source);

        feed.list(vec![pod("a", "1")]);
        feed.apply(pod("a", "2"));
        feed.apply(pod("a", "2"));
        feed.apply(pod("b", "1"));
        feed.delete(pod("a", "3"));
        settle().await;

        assert_eq!(
            recorder.seen(),
            vec![
                Seen::Added("a".into()),
                Seen::Updated("a".into()),
                Seen::Added("b".into()),
                Seen::Deleted("a".into()),
            ]
        );
        assert_eq!(reader.keys().len(), 1);
    }

    #[tokio::test]
    async fn reconnect_relists_without_duplicates_or_loss() {
        let (feed, source) = ChannelSource::channel();
        let (recorder, reader, _gate, _stop) = start(source);

        feed.list(vec![pod("a", "1"), pod("b", "1")]);
        feed.error("connection reset by peer");
        feed.disconnect();
        feed.list(vec![pod("a", "1"), pod("b", "2"), pod("c", "1")]);
        settle().await;

        assert_eq!(
            recorder.seen(),
            vec![
                Seen::Added("a".into()),
                Seen::Added("b".into()),
                Seen::Updated("b".into()),
                Seen::Added("c".into()),
            ]
        );
        assert_eq!(reader.len(), 3);
    }

    #[tokio::test]
    async fn relist_reports_objects_removed_while_disconnected() {
        let (feed, source) = ChannelSource::channel();
        let (recorder, reader, _gate, _stop) = start(source);

        feed.list(vec![pod("a", "1"), pod("b", "1")]);
        feed.disconnect();
        feed.list(vec![pod("b", "1")]);
        settle().await;

        assert_eq!(recorder.seen().last(), Some(&Seen::Deleted("a".into())));
        assert_eq!(reader.len(), 1);
    }

    #[tokio::test]
    async fn stop_ends_the_pump() {
        let (_feed, source) = ChannelSource::channel();
        let sync = CacheSynchronizer::new(source, Duration::from_millis(10));
        let recorder = Recorder::new(sync.gate());
        let stop = CancellationToken::new();
        let task = tokio::spawn(sync.run(recorder, stop.clone()));

        stop.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("synchronizer did not stop")
            .unwrap();
    }
}
