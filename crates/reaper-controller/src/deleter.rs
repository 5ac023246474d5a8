use futures::future::BoxFuture;
use reaper_core::object::ObjectKey;

use crate::error::ActionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The authority no longer knows the object; double-deletes land here.
    AlreadyGone,
}

/// The remote mutation used by the dispatcher.
///
/// Implementations are shared across worker tasks and must be safe to call
/// concurrently. They are constructed once and handed to the
/// [`Dispatcher`](crate::Dispatcher); nothing reaches for a global client.
pub trait ObjectDeleter: Send + Sync + 'static {
    fn delete<'a>(&'a self, key: &'a ObjectKey)
        -> BoxFuture<'a, Result<DeleteOutcome, ActionError>>;
}
