use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use reaper_core::object::ManagedObject;
use tokio::sync::{mpsc, Mutex};

use crate::{ControllerError, Result};

// ─── SourceEvent ──────────────────────────────────────────────────────────

/// One item of a list+watch stream.
///
/// A (re)list is framed as `Init`, any number of `InitApply`, then
/// `InitDone`. Everything else arrives as `Apply` or `Delete`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    Init,
    InitApply(ManagedObject),
    InitDone,
    Apply(ManagedObject),
    Delete(ManagedObject),
}

/// Stream returned by [`EventSource::watch`]. Errors are yielded in-band and
/// do not end the stream.
pub type SourceStream = BoxStream<'static, Result<SourceEvent>>;

/// A restartable producer of list+watch events.
///
/// Each call to [`watch`](EventSource::watch) opens a fresh stream that
/// starts with a full list.
pub trait EventSource: Send + Sync + 'static {
    fn watch(&self) -> SourceStream;
}

// ─── ChannelSource ────────────────────────────────────────────────────────

enum FeedItem {
    Event(Result<SourceEvent>),
    Disconnect,
}

/// An [`EventSource`] fed by hand through a [`ChannelFeed`].
///
/// Used to drive the controller without an API server. All streams opened by
/// [`watch`](EventSource::watch) read from the same channel, one at a time.
pub struct ChannelSource {
    rx: Arc<Mutex<mpsc::UnboundedReceiver<FeedItem>>>,
}

impl ChannelSource {
    pub fn channel() -> (ChannelFeed, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            ChannelFeed { tx },
            Self {
                rx: Arc::new(Mutex::new(rx)),
            },
        )
    }
}

impl EventSource for ChannelSource {
    fn watch(&self) -> SourceStream {
        let rx = Arc::clone(&self.rx);
        stream::unfold(rx, |rx| async move {
            let item = rx.lock().await.recv().await?;
            match item {
                FeedItem::Event(event) => Some((event, rx)),
                FeedItem::Disconnect => None,
            }
        })
        .boxed()
    }
}

/// Sending half of a [`ChannelSource`].
#[derive(Clone)]
pub struct ChannelFeed {
    tx: mpsc::UnboundedSender<FeedItem>,
}

impl ChannelFeed {
    pub fn send(&self, event: SourceEvent) {
        let _ = self.tx.send(FeedItem::Event(Ok(event)));
    }

    /// Emit a complete list: `Init`, one `InitApply` per object, `InitDone`.
    pub fn list(&self, objects: impl IntoIterator<Item = ManagedObject>) {
        self.send(SourceEvent::Init);
        for obj in objects {
            self.send(SourceEvent::InitApply(obj));
        }
        self.send(SourceEvent::InitDone);
    }

    pub fn apply(&self, obj: ManagedObject) {
        self.send(SourceEvent::Apply(obj));
    }

    pub fn delete(&self, obj: ManagedObject) {
        self.send(SourceEvent::Delete(obj));
    }

    /// Yield an in-band stream error.
    pub fn error(&self, message: impl Into<String>) {
        let _ = self
            .tx
            .send(FeedItem::Event(Err(ControllerError::Source(message.into()))));
    }

    /// End the currently open stream, as a dropped connection would.
    pub fn disconnect(&self) {
        let _ = self.tx.send(FeedItem::Disconnect);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_is_framed_by_init_and_init_done() {
        let (feed, source) = ChannelSource::channel();
        feed.list(vec![ManagedObject::new("ns", "a")]);
        feed.disconnect();

        let events: Vec<_> = source
            .watch()
            .map(|e| e.unwrap())
            .collect()
            .await;
        assert_eq!(
            events,
            vec![
                SourceEvent::Init,
                SourceEvent::InitApply(ManagedObject::new("ns", "a")),
                SourceEvent::InitDone,
            ]
        );
    }

    #[tokio::test]
    async fn disconnect_ends_only_the_current_stream() {
        let (feed, source) = ChannelSource::channel();
        feed.apply(ManagedObject::new("ns", "a"));
        feed.disconnect();
        feed.apply(ManagedObject::new("ns", "b"));
        feed.disconnect();

        let first: Vec<_> = source.watch().collect().await;
        let second: Vec<_> = source.watch().collect().await;
        assert_eq!(first.len(), 1);
        assert!(matches!(
            second[0],
            Ok(SourceEvent::Apply(ref o)) if o.key.name == "b"
        ));
    }

    #[tokio::test]
    async fn errors_are_yielded_in_band() {
        let (feed, source) = ChannelSource::channel();
        feed.error("connection reset");
        feed.apply(ManagedObject::new("ns", "a"));
        feed.disconnect();

        let items: Vec<_> = source.watch().collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_err());
        assert!(items[1].is_ok());
    }
}
