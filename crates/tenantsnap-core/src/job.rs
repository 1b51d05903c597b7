//! Backup job state and the merge rules that fold scan deltas into it.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{TenantTable, TenantTableKey};

/// Lifecycle status of a backup job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupStatus {
    InProgress,
    Complete,
    Failed,
}

impl BackupStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, BackupStatus::Complete | BackupStatus::Failed)
    }

    /// Forward-only transition. Re-entering the current state is allowed;
    /// leaving a terminal state is not.
    pub fn transition(self, next: BackupStatus) -> Result<BackupStatus, InvalidTransition> {
        match (self, next) {
            (from, to) if from == to => Ok(to),
            (BackupStatus::InProgress, to) => Ok(to),
            (from, to) => Err(InvalidTransition { from, to }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BackupStatus::InProgress => "IN_PROGRESS",
            BackupStatus::Complete => "COMPLETE",
            BackupStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal status transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: BackupStatus,
    pub to: BackupStatus,
}

/// Why a delta could not be merged into a job.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    #[error("cannot merge backup '{incoming}' into '{existing}'")]
    IdentityMismatch { existing: String, incoming: String },

    #[error("backup '{name}' is {status}, no further merges accepted")]
    Terminal { name: String, status: BackupStatus },

    #[error("physical table '{0}' already merged")]
    AlreadyMerged(String),

    #[error(transparent)]
    Transition(#[from] InvalidTransition),

    #[error("row count overflow for {0}")]
    CountOverflow(TenantTableKey),
}

/// One full-snapshot attempt, identified by a unique name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupJob {
    pub name: String,
    pub status: BackupStatus,
    /// Milliseconds since the Unix epoch; never changes after creation.
    pub creation_time: u64,
    pub tenant_tables: BTreeMap<TenantTableKey, u64>,
    /// Physical tables whose deltas are already folded into `tenant_tables`.
    pub merged_tables: BTreeSet<String>,
}

impl BackupJob {
    pub fn new(name: impl Into<String>, creation_time: u64) -> Self {
        Self {
            name: name.into(),
            status: BackupStatus::InProgress,
            creation_time,
            tenant_tables: BTreeMap::new(),
            merged_tables: BTreeSet::new(),
        }
    }

    /// Row count recorded for a tenant-table, if it appears in this backup.
    pub fn row_count(&self, tenant_table: &TenantTable) -> Option<u64> {
        self.tenant_tables
            .get(&tenant_table.in_backup(&self.name))
            .copied()
    }

    pub fn total_rows(&self) -> u64 {
        self.tenant_tables.values().sum()
    }

    /// Fold `delta` into a copy of this job.
    ///
    /// Counts add, the creation time is kept, and status only moves
    /// forward. `self` is left untouched on error.
    pub fn merge(&self, delta: &BackupDelta) -> Result<BackupJob, MergeError> {
        if delta.backup_name != self.name {
            return Err(MergeError::IdentityMismatch {
                existing: self.name.clone(),
                incoming: delta.backup_name.clone(),
            });
        }
        if self.status.is_terminal() {
            return Err(MergeError::Terminal {
                name: self.name.clone(),
                status: self.status,
            });
        }
        if let Some(table) = &delta.physical_table {
            if self.merged_tables.contains(table) {
                return Err(MergeError::AlreadyMerged(table.clone()));
            }
        }

        let mut merged = self.clone();
        for (key, count) in &delta.tenant_tables {
            if key.backup_name != self.name {
                return Err(MergeError::IdentityMismatch {
                    existing: self.name.clone(),
                    incoming: key.backup_name.clone(),
                });
            }
            let slot = merged.tenant_tables.entry(key.clone()).or_insert(0);
            *slot = slot
                .checked_add(*count)
                .ok_or_else(|| MergeError::CountOverflow(key.clone()))?;
        }
        if let Some(status) = delta.status {
            merged.status = self.status.transition(status)?;
        }
        if let Some(table) = &delta.physical_table {
            merged.merged_tables.insert(table.clone());
        }
        Ok(merged)
    }
}

/// Row counts produced by one unit of work, not yet merged into a job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupDelta {
    pub backup_name: String,
    /// Physical table the counts came from; `None` for status-only deltas.
    pub physical_table: Option<String>,
    pub status: Option<BackupStatus>,
    pub tenant_tables: BTreeMap<TenantTableKey, u64>,
    /// Rows the mapping provider attributed to no tenant. Never merged.
    pub skipped_rows: u64,
}

impl BackupDelta {
    /// An empty delta for rows scanned out of `physical_table`.
    pub fn for_table(backup_name: impl Into<String>, physical_table: impl Into<String>) -> Self {
        Self {
            backup_name: backup_name.into(),
            physical_table: Some(physical_table.into()),
            ..Self::default()
        }
    }

    /// A delta that only moves the job's status.
    pub fn status_only(backup_name: impl Into<String>, status: BackupStatus) -> Self {
        Self {
            backup_name: backup_name.into(),
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn record(&mut self, owner: &TenantTable, rows: u64) {
        *self
            .tenant_tables
            .entry(owner.in_backup(&self.backup_name))
            .or_insert(0) += rows;
    }

    pub fn total_rows(&self) -> u64 {
        self.tenant_tables.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(table: &str, counts: &[(&str, &str, u64)]) -> BackupDelta {
        let mut d = BackupDelta::for_table("b1", table);
        for (tenant, vt, n) in counts {
            d.record(&TenantTable::new(*tenant, *vt), *n);
        }
        d
    }

    fn fold(job: &BackupJob, deltas: &[&BackupDelta]) -> BackupJob {
        deltas
            .iter()
            .fold(job.clone(), |acc, d| acc.merge(d).unwrap())
    }

    #[test]
    fn status_transitions_are_forward_only() {
        use BackupStatus::*;
        assert_eq!(InProgress.transition(Complete), Ok(Complete));
        assert_eq!(InProgress.transition(Failed), Ok(Failed));
        assert_eq!(InProgress.transition(InProgress), Ok(InProgress));
        assert_eq!(Complete.transition(Complete), Ok(Complete));
        assert!(Complete.transition(InProgress).is_err());
        assert!(Complete.transition(Failed).is_err());
        assert!(Failed.transition(Complete).is_err());
    }

    #[test]
    fn status_uses_ledger_names() {
        let json = serde_json::to_string(&BackupStatus::InProgress).unwrap();
        assert_eq!(json, "\"IN_PROGRESS\"");
        assert_eq!(BackupStatus::Failed.to_string(), "FAILED");
    }

    #[test]
    fn merge_is_order_independent() {
        let job = BackupJob::new("b1", 1234);
        let p1 = delta("p1", &[("t1", "orders", 10), ("t2", "orders", 3)]);
        let p2 = delta("p2", &[("t1", "orders", 4), ("t3", "users", 5)]);
        let p3 = delta("p3", &[("t2", "orders", 1)]);

        let a = fold(&job, &[&p1, &p2, &p3]);
        let b = fold(&job, &[&p3, &p1, &p2]);
        let c = fold(&job, &[&p2, &p3, &p1]);

        assert_eq!(a.tenant_tables, b.tenant_tables);
        assert_eq!(b.tenant_tables, c.tenant_tables);
        assert_eq!(a.row_count(&TenantTable::new("t1", "orders")), Some(14));
        assert_eq!(a.row_count(&TenantTable::new("t2", "orders")), Some(4));
        assert_eq!(a.total_rows(), 23);
    }

    #[test]
    fn merge_rejects_other_backup() {
        let job = BackupJob::new("b1", 1);
        let mut other = delta("p1", &[("t1", "orders", 1)]);
        other.backup_name = "b2".into();

        let err = job.merge(&other).unwrap_err();
        assert!(matches!(err, MergeError::IdentityMismatch { .. }));
        assert!(job.tenant_tables.is_empty());
    }

    #[test]
    fn merge_keeps_creation_time() {
        let job = BackupJob::new("b1", 42);
        let merged = fold(
            &job,
            &[&delta("p1", &[("t1", "a", 1)]), &delta("p2", &[("t1", "a", 2)])],
        );
        assert_eq!(merged.creation_time, 42);
    }

    #[test]
    fn merge_same_table_twice_is_rejected() {
        let job = BackupJob::new("b1", 1);
        let p1 = delta("p1", &[("t1", "orders", 10)]);
        let once = job.merge(&p1).unwrap();

        assert_eq!(
            once.merge(&p1).unwrap_err(),
            MergeError::AlreadyMerged("p1".into())
        );
        assert_eq!(once.row_count(&TenantTable::new("t1", "orders")), Some(10));
    }

    #[test]
    fn merge_never_regresses_terminal_status() {
        let job = BackupJob::new("b1", 1);
        let done = job
            .merge(&BackupDelta::status_only("b1", BackupStatus::Complete))
            .unwrap();

        let err = done
            .merge(&BackupDelta::status_only("b1", BackupStatus::InProgress))
            .unwrap_err();
        assert!(matches!(err, MergeError::Terminal { .. }));
        assert!(done.merge(&delta("p9", &[("t1", "a", 1)])).is_err());
    }
}
