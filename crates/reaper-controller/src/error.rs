use reaper_core::ReaperError;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("no connection profile: not running in-cluster and no home directory for ~/.kube/config")]
    NoConnectionProfile,

    #[error("failed to load kubeconfig: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    #[error(transparent)]
    Kube(#[from] kube::Error),

    #[error("watch stream error: {0}")]
    Watch(#[from] kube::runtime::watcher::Error),

    #[error("event source error: {0}")]
    Source(String),

    #[error("timed out after {0:?} waiting for caches to sync")]
    SyncTimeout(Duration),

    #[error("cache synchronizer exited before a stop was requested")]
    SynchronizerExited,

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Core(#[from] ReaperError),
}

/// Failure of a single remote delete attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum ActionError {
    /// Transient: network trouble, conflicts, throttling, server errors.
    #[error("retryable: {0}")]
    Retryable(String),

    /// Will not succeed on retry: forbidden, unauthorized, invalid.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl ActionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ActionError::Retryable(_))
    }
}
