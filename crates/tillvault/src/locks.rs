//! Per-path reader/writer locks.
//!
//! One writer or many readers per [`ConfigPath`]. Locks for different
//! paths never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tillvault_core::ConfigPath;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// Idle entries are swept once the table grows past this.
const SWEEP_THRESHOLD: usize = 1024;

#[derive(Default)]
pub struct PathLocks {
    table: Mutex<HashMap<ConfigPath, Arc<RwLock<()>>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared access. Waits for any in-flight write on the same path.
    pub async fn read(&self, path: &ConfigPath) -> OwnedRwLockReadGuard<()> {
        self.lock_for(path).read_owned().await
    }

    /// Exclusive access.
    pub async fn write(&self, path: &ConfigPath) -> OwnedRwLockWriteGuard<()> {
        self.lock_for(path).write_owned().await
    }

    /// Number of tracked paths.
    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // The table is only ever touched in short, non-panicking sections.
    fn table(&self) -> MutexGuard<'_, HashMap<ConfigPath, Arc<RwLock<()>>>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_for(&self, path: &ConfigPath) -> Arc<RwLock<()>> {
        let mut table = self.table();

        if table.len() >= SWEEP_THRESHOLD {
            // Only the table holds a reference: nobody is waiting or holding.
            table.retain(|_, lock| Arc::strong_count(lock) > 1);
        }

        table
            .entry(path.clone())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tillvault_core::PathResolver;

    fn path(raw: &str) -> ConfigPath {
        PathResolver::default().resolve(raw).unwrap()
    }

    #[tokio::test]
    async fn test_readers_share() {
        let locks = PathLocks::new();
        let p = path(r"config\a\v");
        let _r1 = locks.read(&p).await;
        let r2 = tokio::time::timeout(Duration::from_millis(100), locks.read(&p)).await;
        assert!(r2.is_ok());
    }

    #[tokio::test]
    async fn test_writer_excludes_readers() {
        let locks = PathLocks::new();
        let p = path(r"config\a\v");
        let _w = locks.write(&p).await;
        let blocked = tokio::time::timeout(Duration::from_millis(50), locks.read(&p)).await;
        assert!(blocked.is_err());
    }

    #[tokio::test]
    async fn test_paths_are_independent() {
        let locks = PathLocks::new();
        let _w = locks.write(&path(r"config\a\v")).await;
        let other = tokio::time::timeout(Duration::from_millis(100), locks.write(&path(r"config\a\w"))).await;
        assert!(other.is_ok());
        assert_eq!(locks.len(), 2);
    }
}
