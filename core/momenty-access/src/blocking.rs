//! Bridge from async callers to the synchronous store.

use crate::error::{AccessError, AccessResult};

/// Runs `f` on tokio's blocking pool.
///
/// Store calls take std locks and may wait on SQLite, so they must not run
/// on an async worker. A panic inside `f` comes back as
/// [`AccessError::Task`].
pub(crate) async fn run_blocking<T, F>(f: F) -> AccessResult<T>
where
    F: FnOnce() -> AccessResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AccessError::Task(e.to_string()))?
}
