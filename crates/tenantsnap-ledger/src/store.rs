//! Ledger — redb-backed persistence for backup jobs and their segments.
//!
//! Every mutation runs inside one redb write transaction. redb admits a
//! single writer at a time, so read-modify-write through
//! [`Ledger::update_backup`] is atomic with respect to every other writer
//! sharing the database.

use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use tenantsnap_core::{BackupJob, Segment, SegmentKey, TenantTable};

use crate::error::{LedgerError, LedgerResult};
use crate::record::{LedgerRecord, SegmentEntry};
use crate::tables::*;

/// Convert any `Display` error into a `LedgerError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| LedgerError::$variant(e.to_string())
    };
}

/// Thread-safe ledger backed by redb.
#[derive(Clone)]
pub struct Ledger {
    db: Arc<Database>,
}

impl Ledger {
    /// Open (or create) a persistent ledger at the given path.
    pub fn open(path: &Path) -> LedgerResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let ledger = Self { db: Arc::new(db) };
        ledger.ensure_tables()?;
        debug!(?path, "ledger opened");
        Ok(ledger)
    }

    /// Create an ephemeral in-memory ledger (for testing).
    pub fn open_in_memory() -> LedgerResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let ledger = Self { db: Arc::new(db) };
        ledger.ensure_tables()?;
        debug!("in-memory ledger opened");
        Ok(ledger)
    }

    fn ensure_tables(&self) -> LedgerResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(BACKUPS).map_err(map_err!(Table))?;
        txn.open_table(SEGMENTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Backups ────────────────────────────────────────────────────

    /// Insert a new backup record. Fails if the name is taken, whatever its status.
    pub fn create_backup(&self, job: &BackupJob) -> LedgerResult<()> {
        let value = LedgerRecord::encode(job)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(BACKUPS).map_err(map_err!(Table))?;
            if table
                .get(job.name.as_str())
                .map_err(map_err!(Read))?
                .is_some()
            {
                return Err(LedgerError::AlreadyExists(job.name.clone()));
            }
            table
                .insert(job.name.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(backup = %job.name, "backup record created");
        Ok(())
    }

    /// Get a backup by name.
    pub fn get_backup(&self, name: &str) -> LedgerResult<Option<BackupJob>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(BACKUPS).map_err(map_err!(Table))?;
        match table.get(name).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(LedgerRecord::decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Atomically replace a backup record with `f(current)`.
    ///
    /// Nothing is written when `f` fails; its error is returned as is.
    pub fn update_backup<E, F>(&self, name: &str, f: F) -> Result<BackupJob, E>
    where
        E: From<LedgerError>,
        F: FnOnce(BackupJob) -> Result<BackupJob, E>,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated = {
            let mut table = txn.open_table(BACKUPS).map_err(map_err!(Table))?;
            let current = match table.get(name).map_err(map_err!(Read))? {
                Some(guard) => LedgerRecord::decode(guard.value())?,
                None => return Err(LedgerError::NotFound(name.to_string()).into()),
            };
            let updated = f(current)?;
            let value = LedgerRecord::encode(&updated)?;
            table
                .insert(name, value.as_slice())
                .map_err(map_err!(Write))?;
            updated
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(backup = %name, status = %updated.status, "backup record updated");
        Ok(updated)
    }

    /// Delete a backup record and every segment stored under it.
    ///
    /// Returns the record as it was before deletion.
    pub fn delete_backup(&self, name: &str) -> LedgerResult<Option<BackupJob>> {
        let prefix = backup_prefix(name);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let (removed, segments) = {
            let mut backups = txn.open_table(BACKUPS).map_err(map_err!(Table))?;
            let removed = match backups.remove(name).map_err(map_err!(Write))? {
                Some(guard) => Some(LedgerRecord::decode(guard.value())?),
                None => None,
            };

            let mut table = txn.open_table(SEGMENTS).map_err(map_err!(Table))?;
            let keys = keys_with_prefix(&table, &prefix)?;
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
            (removed, keys.len())
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(backup = %name, existed = removed.is_some(), segments, "backup deleted");
        Ok(removed)
    }

    /// List up to `limit` backups in name order, starting after `start_after`.
    ///
    /// The flag is true when more backups follow the returned page.
    pub fn list_backups(
        &self,
        start_after: Option<&str>,
        limit: usize,
    ) -> LedgerResult<(Vec<BackupJob>, bool)> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(BACKUPS).map_err(map_err!(Table))?;
        let lower = match start_after {
            Some(name) => Bound::Excluded(name),
            None => Bound::Unbounded,
        };
        let mut results = Vec::new();
        let mut has_more = false;
        for entry in table
            .range::<&str>((lower, Bound::Unbounded))
            .map_err(map_err!(Read))?
        {
            let (_, value) = entry.map_err(map_err!(Read))?;
            if results.len() == limit {
                has_more = true;
                break;
            }
            results.push(LedgerRecord::decode(value.value())?);
        }
        Ok((results, has_more))
    }

    // ── Segments ───────────────────────────────────────────────────

    /// Insert or replace one segment.
    pub fn put_segment(&self, key: &SegmentKey, segment: &Segment) -> LedgerResult<()> {
        let table_key = segment_key(key);
        let entry = SegmentEntry {
            key: key.clone(),
            segment: segment.clone(),
        };
        let value = serde_json::to_vec(&entry).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SEGMENTS).map_err(map_err!(Table))?;
            table
                .insert(table_key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Page through the segments of one tenant-table in a backup.
    ///
    /// Segments from every physical table are returned together, in key
    /// order. Pass the last key of a page as `start_after` to continue.
    pub fn list_segments(
        &self,
        backup_name: &str,
        owner: &TenantTable,
        start_after: Option<&SegmentKey>,
        limit: usize,
    ) -> LedgerResult<Vec<SegmentEntry>> {
        let prefix = tenant_table_prefix(backup_name, owner);
        let resume = start_after.map(segment_key);
        let lower = match &resume {
            Some(key) => Bound::Excluded(key.as_str()),
            None => Bound::Included(prefix.as_str()),
        };
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SEGMENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table
            .range::<&str>((lower, Bound::Unbounded))
            .map_err(map_err!(Read))?
        {
            if results.len() >= limit {
                break;
            }
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(&prefix) {
                break;
            }
            let segment: SegmentEntry =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(segment);
        }
        Ok(results)
    }

    /// Delete specific segments. Returns how many existed.
    pub fn delete_segments(&self, keys: &[SegmentKey]) -> LedgerResult<usize> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut removed = 0;
        {
            let mut table = txn.open_table(SEGMENTS).map_err(map_err!(Table))?;
            for key in keys {
                let table_key = segment_key(key);
                if table
                    .remove(table_key.as_str())
                    .map_err(map_err!(Write))?
                    .is_some()
                {
                    removed += 1;
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(removed)
    }

    /// Delete every segment a backup holds from one physical table.
    ///
    /// Used before a scan so that leftovers of an earlier attempt that never
    /// got to clean up are not restored alongside the new segments.
    pub fn delete_table_segments(
        &self,
        backup_name: &str,
        physical_table: &str,
    ) -> LedgerResult<usize> {
        let prefix = backup_prefix(backup_name);
        let wanted = escape(physical_table);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let removed = {
            let mut table = txn.open_table(SEGMENTS).map_err(map_err!(Table))?;
            let keys: Vec<String> = keys_with_prefix(&table, &prefix)?
                .into_iter()
                .filter(|key| physical_table_of(key) == Some(wanted.as_str()))
                .collect();
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
            keys.len()
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(removed)
    }

    /// Number of segments stored under a backup.
    pub fn count_segments(&self, backup_name: &str) -> LedgerResult<usize> {
        let prefix = backup_prefix(backup_name);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SEGMENTS).map_err(map_err!(Table))?;
        Ok(keys_with_prefix(&table, &prefix)?.len())
    }
}

/// Collect every key in `table` that starts with `prefix`.
fn keys_with_prefix<T>(table: &T, prefix: &str) -> LedgerResult<Vec<String>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    let mut keys = Vec::new();
    for entry in table.range(prefix..).map_err(map_err!(Read))? {
        let (key, _) = entry.map_err(map_err!(Read))?;
        let key = key.value();
        if !key.starts_with(prefix) {
            break;
        }
        keys.push(key.to_string());
    }
    Ok(keys)
}
