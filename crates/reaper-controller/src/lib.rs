//! `reaper-controller`: the reconciliation loop behind `pod-reaper`.
//!
//! # Architecture
//!
//! ```text
//! EventSource (PodSource | ChannelSource)
//!     │  Init / InitApply / InitDone / Apply / Delete
//!     ▼
//! CacheSynchronizer  ← owns the Store, opens the SyncGate after the first list
//!     │  ObjectEvent (Added / Updated / Deleted)
//!     ▼
//! Reaper (EventHandler) ← Classifier decides; never awaits
//!     │  ObjectKey
//!     ▼
//! Dispatcher         ← bounded workers, per-key collapsing, retry + backoff
//!     │  ObjectDeleter::delete
//!     ▼
//! DispatchReport     ← broadcast to subscribers
//! ```
//!
//! [`Lifecycle`] wires these together and walks
//! `Initializing → Syncing → Running → Stopping → Stopped`.

pub mod deleter;
pub mod dispatcher;
pub mod error;
pub mod lifecycle;
pub mod pods;
pub mod reaper;
pub mod source;
pub mod synchronizer;

pub use deleter::{DeleteOutcome, ObjectDeleter};
pub use dispatcher::{
    DispatchHandle, DispatchOutcome, DispatchReport, Dispatcher, Submission,
};
pub use error::{ActionError, ControllerError};
pub use lifecycle::{Lifecycle, LifecycleState};
pub use pods::{connect, KubeDeleter, PodSource};
pub use reaper::Reaper;
pub use source::{ChannelFeed, ChannelSource, EventSource, SourceEvent, SourceStream};
pub use synchronizer::{CacheSynchronizer, EventHandler, SyncGate};

/// Convenience `Result` alias for this crate.
pub type Result<T> = std::result::Result<T, ControllerError>;
