//! Deadline-bounded lock acquisition.

use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};

use crate::LockTimeout;

/// Acquires `mutex`, giving up after `limit`.
///
/// Gateway calls are single bounded request/responses; a caller stuck
/// behind a lock gets [`LockTimeout`] rather than hanging.
pub async fn lock_within<T>(
    mutex: &Mutex<T>,
    limit: Duration,
) -> Result<MutexGuard<'_, T>, LockTimeout> {
    tokio::time::timeout(limit, mutex.lock())
        .await
        .map_err(|_| LockTimeout(limit))
}
