use std::fmt;
use std::sync::Arc;

use reaper_core::cache::StoreReader;
use reaper_core::classifier::Classifier;
use reaper_core::config::ReaperConfig;
use reaper_core::object::ManagedObject;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

use crate::deleter::ObjectDeleter;
use crate::dispatcher::{DispatchReport, Dispatcher};
use crate::reaper::Reaper;
use crate::source::EventSource;
use crate::synchronizer::{CacheSynchronizer, EventHandler, SyncGate};
use crate::{ControllerError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Initializing,
    Syncing,
    Running,
    Stopping,
    Stopped,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Initializing => "initializing",
            LifecycleState::Syncing => "syncing",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the sync phase ended.
enum SyncPhase {
    Synced,
    StopRequested,
    Failed(ControllerError),
}

/// Owns startup and shutdown of the reconciliation loop.
///
/// `run` walks `Initializing → Syncing → Running → Stopping → Stopped`. A sync
/// that does not finish within `sync_timeout_secs` goes straight to `Stopped`
/// and returns [`ControllerError::SyncTimeout`].
pub struct Lifecycle<S> {
    config: ReaperConfig,
    synchronizer: CacheSynchronizer<S>,
    dispatcher: Dispatcher,
    state: Arc<watch::Sender<LifecycleState>>,
}

impl<S: EventSource> Lifecycle<S> {
    pub fn new(config: ReaperConfig, source: S, deleter: Arc<dyn ObjectDeleter>) -> Self {
        let synchronizer = CacheSynchronizer::new(source, config.resync_backoff());
        let dispatcher = Dispatcher::new(deleter, config.dispatch.clone());
        let (state, _) = watch::channel(LifecycleState::Initializing);
        Self {
            config,
            synchronizer,
            dispatcher,
            state: Arc::new(state),
        }
    }

    pub fn state(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Terminal delete reports. Subscribe before calling [`run`](Self::run)
    /// to see every one.
    pub fn reports(&self) -> BroadcastStream<DispatchReport> {
        BroadcastStream::new(self.dispatcher.subscribe())
    }

    pub fn cache(&self) -> StoreReader {
        self.synchronizer.reader()
    }

    pub fn sync_gate(&self) -> SyncGate {
        self.synchronizer.gate()
    }

    /// Run until `stop` is cancelled.
    ///
    /// Returns an error when the initial sync times out or the synchronizer
    /// dies on its own; a requested stop returns `Ok(())`.
    pub async fn run(self, stop: CancellationToken) -> Result<()> {
        let Self {
            config,
            synchronizer,
            dispatcher,
            state,
        } = self;

        let children = stop.child_token();
        let (dispatch, dispatch_task) = dispatcher.spawn(children.clone());
        let reaper = Reaper::new(
            Classifier::new(config.marker_label.clone(), config.trigger),
            dispatch,
        );
        let handler = Running {
            inner: reaper,
            state: Arc::clone(&state),
        };
        let mut gate = synchronizer.gate();

        transition(&state, LifecycleState::Syncing);
        let mut pump = tokio::spawn(synchronizer.run(handler, children.clone()));

        let sync_timeout = config.sync_timeout();
        let mut pump_joined = false;
        let phase = tokio::select! {
            biased;
            _ = stop.cancelled() => SyncPhase::StopRequested,
            joined = &mut pump => {
                pump_joined = true;
                SyncPhase::Failed(pump_exited(joined))
            }
            waited = tokio::time::timeout(sync_timeout, gate.wait()) => match waited {
                Ok(true) => SyncPhase::Synced,
                Ok(false) => SyncPhase::Failed(ControllerError::SynchronizerExited),
                Err(_) => SyncPhase::Failed(ControllerError::SyncTimeout(sync_timeout)),
            },
        };

        let result = match phase {
            SyncPhase::Failed(e) => {
                tracing::error!(error = %e, "cache sync failed");
                children.cancel();
                if !pump_joined {
                    join_quietly(pump).await;
                }
                join_quietly(dispatch_task).await;
                transition(&state, LifecycleState::Stopped);
                return Err(e);
            }
            SyncPhase::StopRequested => Ok(()),
            SyncPhase::Synced => {
                enter_running(&state);
                tracing::info!(
                    marker = %config.marker_label,
                    trigger = %config.trigger,
                    "controller running"
                );
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => Ok(()),
                    joined = &mut pump => {
                        pump_joined = true;
                        // The pump also returns once the shared token fires.
                        if stop.is_cancelled() {
                            Ok(())
                        } else {
                            Err(pump_exited(joined))
                        }
                    }
                }
            }
        };

        transition(&state, LifecycleState::Stopping);
        children.cancel();
        if !pump_joined {
            join_quietly(pump).await;
        }
        join_quietly(dispatch_task).await;
        transition(&state, LifecycleState::Stopped);
        tracing::info!("controller stopped");
        result
    }
}

fn transition(state: &watch::Sender<LifecycleState>, next: LifecycleState) {
    let previous = state.send_replace(next);
    tracing::debug!(from = %previous, to = %next, "lifecycle transition");
}

/// Promote `Syncing` to `Running`. A no-op in any other state.
fn enter_running(state: &watch::Sender<LifecycleState>) {
    let promoted = state.send_if_modified(|current| {
        if *current == LifecycleState::Syncing {
            *current = LifecycleState::Running;
            true
        } else {
            false
        }
    });
    if promoted {
        tracing::debug!(
            from = %LifecycleState::Syncing,
            to = %LifecycleState::Running,
            "lifecycle transition"
        );
    }
}

/// Reports `Running` from inside the pump, before the first list is
/// delivered, so no delete is dispatched while the state still says
/// `Syncing`.
struct Running<H> {
    inner: H,
    state: Arc<watch::Sender<LifecycleState>>,
}

impl<H: EventHandler> EventHandler for Running<H> {
    fn on_added(&mut self, obj: &ManagedObject) {
        self.inner.on_added(obj);
    }

    fn on_updated(&mut self, previous: &ManagedObject, current: &ManagedObject) {
        self.inner.on_updated(previous, current);
    }

    fn on_deleted(&mut self, obj: &ManagedObject) {
        self.inner.on_deleted(obj);
    }

    fn on_synced(&mut self) {
        enter_running(&self.state);
        self.inner.on_synced();
    }
}

fn pump_exited(joined: std::result::Result<(), JoinError>) -> ControllerError {
    match joined {
        Ok(()) => ControllerError::SynchronizerExited,
        Err(e) => ControllerError::Join(e),
    }
}

async fn join_quietly(task: JoinHandle<()>) {
    if let Err(e) = task.await {
        if !e.is_cancelled() {
            tracing::error!(error = %e, "background task failed during shutdown");
        }
    }
}
