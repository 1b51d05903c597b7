//! Request and result values for the public entry points.

use serde::{Deserialize, Serialize};

use crate::job::{BackupJob, BackupStatus};
use crate::types::{TenantTable, TenantTableKey};

/// Names the backup job a create/scan/complete call applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateBackupRequest {
    pub backup_name: String,
}

impl CreateBackupRequest {
    pub fn new(backup_name: impl Into<String>) -> Self {
        Self {
            backup_name: backup_name.into(),
        }
    }
}

/// Restore one tenant-table out of a backup into a different tenant-table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreRequest {
    pub source: TenantTableKey,
    pub target: TenantTable,
}

impl RestoreRequest {
    pub fn new(source: TenantTableKey, target: TenantTable) -> Self {
        Self { source, target }
    }

    /// True when the target names the tenant-table the backup was taken from.
    pub fn is_in_place(&self) -> bool {
        self.source.tenant_table() == self.target
    }
}

/// Result of one restore call. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreOutcome {
    pub backup_name: String,
    pub status: BackupStatus,
    /// Tenant and table the rows were written to.
    pub tenant_id: String,
    pub virtual_table_name: String,
    pub rows_restored: u64,
    pub rows_failed: u64,
    /// First write error of a FAILED restore.
    pub error: Option<String>,
}

/// One page request against the backup catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListBackupsRequest {
    /// Page size; the configured default applies when unset.
    pub limit: Option<usize>,
    /// Continue after this backup name (the previous page's cursor).
    pub exclusive_start_backup_name: Option<String>,
}

impl ListBackupsRequest {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            exclusive_start_backup_name: None,
        }
    }

    pub fn after(mut self, cursor: impl Into<String>) -> Self {
        self.exclusive_start_backup_name = Some(cursor.into());
        self
    }
}

/// Catalog view of a backup job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSummary {
    pub backup_name: String,
    pub status: BackupStatus,
    pub creation_time: u64,
    pub tenant_table_count: usize,
    pub total_rows: u64,
}

impl From<&BackupJob> for BackupSummary {
    fn from(job: &BackupJob) -> Self {
        Self {
            backup_name: job.name.clone(),
            status: job.status,
            creation_time: job.creation_time,
            tenant_table_count: job.tenant_tables.len(),
            total_rows: job.total_rows(),
        }
    }
}

/// One page of the backup catalog, lexicographically ordered by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupPage {
    pub backups: Vec<BackupSummary>,
    /// Set when more backups follow; pass it back as the next start name.
    pub last_evaluated_backup_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_place_restore_is_detected() {
        let source = TenantTableKey::new("b1", "t1", "orders");
        assert!(RestoreRequest::new(source.clone(), TenantTable::new("t1", "orders")).is_in_place());
        assert!(!RestoreRequest::new(source.clone(), TenantTable::new("t2", "orders")).is_in_place());
        assert!(!RestoreRequest::new(source, TenantTable::new("t1", "orders_copy")).is_in_place());
    }
}
