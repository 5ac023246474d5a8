use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use reaper_core::config::DispatchConfig;
use reaper_core::object::ObjectKey;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

use crate::deleter::{DeleteOutcome, ObjectDeleter};
use crate::error::ActionError;

const REPORT_CAPACITY: usize = 256;

// ─── Reports ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Deleted,
    AlreadyGone,
    /// Fatal error, or retries exhausted on a retryable one.
    Failed { error: ActionError },
}

/// Terminal result of one dispatched delete, published to subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub key: ObjectKey,
    #[serde(flatten)]
    pub outcome: DispatchOutcome,
    pub attempts: u32,
    pub finished_at: DateTime<Utc>,
}

/// What happened to a [`DispatchHandle::dispatch`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Queued,
    /// A delete for this key is already queued or running.
    Collapsed,
    /// The dispatcher has stopped.
    Closed,
}

// ─── DispatchHandle ───────────────────────────────────────────────────────

type Pending = Arc<Mutex<HashSet<ObjectKey>>>;

fn lock(pending: &Pending) -> MutexGuard<'_, HashSet<ObjectKey>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cheap, cloneable submission side of a running [`Dispatcher`].
#[derive(Clone)]
pub struct DispatchHandle {
    tx: mpsc::UnboundedSender<ObjectKey>,
    pending: Pending,
    reports: broadcast::Sender<DispatchReport>,
}

impl DispatchHandle {
    /// Queue a delete for `key`. Never waits.
    pub fn dispatch(&self, key: ObjectKey) -> Submission {
        let mut pending = lock(&self.pending);
        if pending.contains(&key) {
            return Submission::Collapsed;
        }
        if self.tx.send(key.clone()).is_err() {
            return Submission::Closed;
        }
        pending.insert(key);
        Submission::Queued
    }

    /// Number of keys queued or in flight.
    pub fn pending(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchReport> {
        self.reports.subscribe()
    }

    pub fn reports(&self) -> BroadcastStream<DispatchReport> {
        BroadcastStream::new(self.subscribe())
    }
}

// ─── Dispatcher ───────────────────────────────────────────────────────────

/// Bounded pool of delete workers fed by an identity-keyed queue.
pub struct Dispatcher {
    deleter: Arc<dyn ObjectDeleter>,
    settings: DispatchConfig,
    reports: broadcast::Sender<DispatchReport>,
}

impl Dispatcher {
    pub fn new(deleter: Arc<dyn ObjectDeleter>, settings: DispatchConfig) -> Self {
        let (reports, _) = broadcast::channel(REPORT_CAPACITY);
        Self {
            deleter,
            settings,
            reports,
        }
    }

    /// Subscribe to reports before the dispatcher is spawned.
    pub fn subscribe(&self) -> broadcast::Receiver<DispatchReport> {
        self.reports.subscribe()
    }

    /// Start the dispatch loop. It runs until `stop` is cancelled or every
    /// handle is dropped, then drains in-flight work for at most
    /// `shutdown_grace`.
    pub fn spawn(self, stop: CancellationToken) -> (DispatchHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending: Pending = Arc::default();
        let handle = DispatchHandle {
            tx,
            pending: Arc::clone(&pending),
            reports: self.reports.clone(),
        };
        let task = tokio::spawn(self.run(rx, pending, stop));
        (handle, task)
    }

    async fn run(
        self,
        mut rx: mpsc::UnboundedReceiver<ObjectKey>,
        pending: Pending,
        stop: CancellationToken,
    ) {
        let workers = self.settings.workers.max(1);
        let mut jobs: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                Some(joined) = jobs.join_next(), if !jobs.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "delete task failed");
                    }
                }
                next = rx.recv(), if jobs.len() < workers => match next {
                    Some(key) => {
                        jobs.spawn(run_job(
                            Arc::clone(&self.deleter),
                            self.settings.clone(),
                            key,
                            Arc::clone(&pending),
                            self.reports.clone(),
                        ));
                    }
                    None => break,
                },
            }
        }

        rx.close();
        let mut dropped = 0usize;
        while let Ok(key) = rx.try_recv() {
            lock(&pending).remove(&key);
            dropped += 1;
        }
        if dropped > 0 {
            tracing::warn!(dropped, "dropping queued deletes on shutdown");
        }

        if !jobs.is_empty() {
            let grace = self.settings.shutdown_grace();
            let drained = tokio::time::timeout(grace, async {
                while jobs.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                tracing::warn!(
                    in_flight = jobs.len(),
                    ?grace,
                    "shutdown grace elapsed, aborting in-flight deletes"
                );
                jobs.abort_all();
                while jobs.join_next().await.is_some() {}
            }
        }

        lock(&pending).clear();
        tracing::debug!("dispatcher stopped");
    }
}

async fn run_job(
    deleter: Arc<dyn ObjectDeleter>,
    settings: DispatchConfig,
    key: ObjectKey,
    pending: Pending,
    reports: broadcast::Sender<DispatchReport>,
) {
    let report = execute(deleter.as_ref(), &settings, key).await;
    lock(&pending).remove(&report.key);
    // No subscribers is fine.
    let _ = reports.send(report);
}

/// Run one delete to completion, retrying retryable failures with backoff.
async fn execute(
    deleter: &dyn ObjectDeleter,
    settings: &DispatchConfig,
    key: ObjectKey,
) -> DispatchReport {
    let max_attempts = settings.max_attempts.max(1);
    let mut attempts = 0u32;

    let outcome = loop {
        attempts += 1;
        match deleter.delete(&key).await {
            Ok(DeleteOutcome::Deleted) => {
                tracing::debug!(key = %key, attempts, "delete succeeded");
                break DispatchOutcome::Deleted;
            }
            Ok(DeleteOutcome::AlreadyGone) => {
                tracing::debug!(key = %key, attempts, "object already gone");
                break DispatchOutcome::AlreadyGone;
            }
            Err(error) if error.is_retryable() && attempts < max_attempts => {
                let delay = settings.backoff_for(attempts - 1);
                tracing::warn!(key = %key, attempts, ?delay, error = %error, "delete failed, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(error) => {
                tracing::error!(key = %key, attempts, error = %error, "delete failed");
                break DispatchOutcome::Failed { error };
            }
        }
    };

    DispatchReport {
        key,
        outcome,
        attempts,
        finished_at: Utc::now(),
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────
