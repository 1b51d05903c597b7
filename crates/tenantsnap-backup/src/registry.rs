//! In-process coordination between concurrent calls on the same backup.
//!
//! Two things are tracked per backup name: an async mutex that serializes
//! ledger merges, and the set of physical tables currently being scanned.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Mutex as AsyncMutex;

#[derive(Default)]
pub struct JobRegistry {
    merge_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    scanning: Mutex<HashSet<(String, String)>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The merge lock for `backup_name`, created on first use.
    pub fn merge_lock(&self, backup_name: &str) -> Arc<AsyncMutex<()>> {
        lock(&self.merge_locks)
            .entry(backup_name.to_string())
            .or_default()
            .clone()
    }

    /// Claim the scan of `physical_table` for `backup_name`.
    ///
    /// Returns `None` if another call holds it. The claim is released when
    /// the guard drops.
    pub fn claim_scan(self: &Arc<Self>, backup_name: &str, physical_table: &str) -> Option<ScanClaim> {
        let key = (backup_name.to_string(), physical_table.to_string());
        if !lock(&self.scanning).insert(key.clone()) {
            return None;
        }
        Some(ScanClaim {
            registry: Arc::clone(self),
            key,
        })
    }

    /// Number of scans currently running for `backup_name`.
    pub fn active_scans(&self, backup_name: &str) -> usize {
        lock(&self.scanning)
            .iter()
            .filter(|(backup, _)| backup == backup_name)
            .count()
    }

    /// Drop the merge lock of a deleted backup, unless a caller still holds it.
    ///
    /// A lock that is still shared stays registered, so a backup created
    /// again under the same name keeps serializing on the same mutex.
    pub fn forget(&self, backup_name: &str) {
        let mut locks = lock(&self.merge_locks);
        if locks
            .get(backup_name)
            .is_some_and(|held| Arc::strong_count(held) == 1)
        {
            locks.remove(backup_name);
        }
    }
}

/// Exclusive right to scan one physical table for one backup.
pub struct ScanClaim {
    registry: Arc<JobRegistry>,
    key: (String, String),
}

impl Drop for ScanClaim {
    fn drop(&mut self) {
        lock(&self.registry.scanning).remove(&self.key);
    }
}
