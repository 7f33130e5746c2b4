use std::sync::Arc;

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// Process-wide read-write lock shared by a server and its service
///
/// Readers run concurrently; a writer excludes readers and other writers. The lock is not
/// reentrant: a task holding a guard must not acquire another one.
#[derive(Clone, Default)]
pub struct Transaction {
    lock: Arc<RwLock<()>>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn read(&self) -> OwnedRwLockReadGuard<()> {
        self.lock.clone().read_owned().await
    }

    pub async fn write(&self) -> OwnedRwLockWriteGuard<()> {
        self.lock.clone().write_owned().await
    }

    /// Write guard if no reader or writer currently holds the lock
    pub fn try_write(&self) -> Option<OwnedRwLockWriteGuard<()>> {
        self.lock.clone().try_write_owned().ok()
    }
}
