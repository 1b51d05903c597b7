//! Backup orchestrator — owns a backup job's lifecycle.
//!
//! The orchestrator:
//! - Creates the ledger entry for a new job
//! - Dispatches physical-table scans onto a bounded worker pool
//! - Merges each scan's delta into the ledger, one merge per backup at a time
//! - Moves the job to COMPLETE or FAILED
//!
//! Each physical table is merged at most once per job. Re-running a scan
//! for a table that is already merged returns the job unchanged, which is
//! how an interrupted backup resumes.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use tenantsnap_core::{
    epoch_millis, BackupConfig, BackupDelta, BackupJob, BackupStatus, CreateBackupRequest,
    KvStore, MappingProvider, MergeError,
};
use tenantsnap_ledger::Ledger;

use crate::error::{BackupError, BackupResult};
use crate::registry::JobRegistry;
use crate::snapshotter::TableSnapshotter;

/// Outcome of one table in a pooled dispatch.
#[derive(Debug)]
pub struct TableScanResult {
    pub physical_table: String,
    pub result: BackupResult<BackupJob>,
}

#[derive(Clone)]
pub struct BackupOrchestrator {
    ledger: Ledger,
    snapshotter: Arc<TableSnapshotter>,
    jobs: Arc<JobRegistry>,
    scan_slots: Arc<Semaphore>,
}

impl BackupOrchestrator {
    pub fn new(
        ledger: Ledger,
        store: Arc<dyn KvStore>,
        mapping: Arc<dyn MappingProvider>,
        jobs: Arc<JobRegistry>,
        config: &BackupConfig,
    ) -> Self {
        let snapshotter = TableSnapshotter::new(store, mapping, ledger.clone(), config);
        Self::with_snapshotter(ledger, Arc::new(snapshotter), jobs, config)
    }

    /// Build around an existing snapshotter.
    pub fn with_snapshotter(
        ledger: Ledger,
        snapshotter: Arc<TableSnapshotter>,
        jobs: Arc<JobRegistry>,
        config: &BackupConfig,
    ) -> Self {
        Self {
            ledger,
            snapshotter,
            jobs,
            scan_slots: Arc::new(Semaphore::new(config.max_concurrent_scans)),
        }
    }

    /// Start a new backup job in IN_PROGRESS.
    ///
    /// A name can only be used once: creating a backup whose name is
    /// already in the ledger fails with `Conflict`, whatever its status.
    pub fn create_backup(&self, request: &CreateBackupRequest) -> BackupResult<BackupJob> {
        let name = request.backup_name.trim();
        if name.is_empty() || name != request.backup_name {
            return Err(BackupError::InvalidRequest(format!(
                "invalid backup name '{}'",
                request.backup_name
            )));
        }
        let job = BackupJob::new(name, epoch_millis());
        self.ledger.create_backup(&job)?;
        info!(backup = %name, creation_time = job.creation_time, "backup created");
        Ok(job)
    }

    /// Scan one physical table and merge its rows into the job.
    pub async fn backup_physical_mt_table(
        &self,
        request: &CreateBackupRequest,
        physical_table: &str,
    ) -> BackupResult<BackupJob> {
        let name = request.backup_name.as_str();
        let job = self.load_open_job(name)?;
        if job.merged_tables.contains(physical_table) {
            debug!(backup = %name, table = %physical_table, "table already merged, skipping scan");
            return Ok(job);
        }

        let _claim = self.jobs.claim_scan(name, physical_table).ok_or_else(|| {
            BackupError::Conflict(format!(
                "scan of '{physical_table}' already running for backup '{name}'"
            ))
        })?;
        // A concurrent call may have finished this table before the claim was taken.
        let job = self.load_open_job(name)?;
        if job.merged_tables.contains(physical_table) {
            return Ok(job);
        }

        let delta = {
            let _slot = self
                .scan_slots
                .acquire()
                .await
                .map_err(|e| BackupError::Worker(e.to_string()))?;
            match self.snapshotter.snapshot(name, physical_table).await {
                Ok(delta) => delta,
                Err(e) if e.is_retryable() => {
                    warn!(backup = %name, table = %physical_table, error = %e, "scan interrupted, table can be retried");
                    return Err(e);
                }
                Err(e) => {
                    error!(backup = %name, table = %physical_table, error = %e, "scan failed");
                    self.fail_job(name, &e);
                    return Err(e);
                }
            }
        };

        let merged = match self.merge(&delta).await {
            Ok(merged) => merged,
            Err(e) => {
                // The table is not in `merged_tables`, so nothing counts these segments.
                self.discard_segments(name, physical_table, &e);
                return Err(e);
            }
        };
        info!(
            backup = %name,
            table = %physical_table,
            rows = delta.total_rows(),
            skipped = delta.skipped_rows,
            tenant_tables = merged.tenant_tables.len(),
            "physical table merged"
        );
        Ok(merged)
    }

    /// Scan several physical tables on the worker pool.
    ///
    /// At most `max_concurrent_scans` run at once. Results come back in the
    /// order the tables were given; one table failing does not stop the others.
    pub async fn backup_physical_mt_tables(
        &self,
        request: &CreateBackupRequest,
        physical_tables: &[String],
    ) -> Vec<TableScanResult> {
        let mut set = JoinSet::new();
        for (index, table) in physical_tables.iter().enumerate() {
            let this = self.clone();
            let request = request.clone();
            let table = table.clone();
            set.spawn(async move {
                let result = this.backup_physical_mt_table(&request, &table).await;
                (index, result)
            });
        }

        let mut results: Vec<Option<BackupResult<BackupJob>>> =
            physical_tables.iter().map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => error!(backup = %request.backup_name, error = %e, "scan task aborted"),
            }
        }

        physical_tables
            .iter()
            .zip(results)
            .map(|(table, result)| TableScanResult {
                physical_table: table.clone(),
                result: result.unwrap_or_else(|| {
                    Err(BackupError::Worker(format!("scan task for '{table}' aborted")))
                }),
            })
            .collect()
    }

    /// Move the job to COMPLETE. Completing a complete job is a no-op.
    pub async fn mark_backup_complete(&self, request: &CreateBackupRequest) -> BackupResult<BackupJob> {
        let name = request.backup_name.as_str();
        let running = self.jobs.active_scans(name);
        if running > 0 {
            return Err(BackupError::Conflict(format!(
                "backup '{name}' still has {running} scan(s) running"
            )));
        }
        let job = self.set_status(name, BackupStatus::Complete).await?;
        info!(backup = %name, rows = job.total_rows(), tenant_tables = job.tenant_tables.len(), "backup complete");
        Ok(job)
    }

    /// Move the job to FAILED, keeping the counts merged so far.
    ///
    /// Does not wait for running scans. Their merges are then rejected and
    /// the segments they wrote are discarded.
    pub async fn mark_backup_failed(&self, request: &CreateBackupRequest) -> BackupResult<BackupJob> {
        let name = request.backup_name.as_str();
        let job = self.set_status(name, BackupStatus::Failed).await?;
        warn!(backup = %name, rows = job.total_rows(), "backup marked failed");
        Ok(job)
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn load_open_job(&self, name: &str) -> BackupResult<BackupJob> {
        let job = self
            .ledger
            .get_backup(name)?
            .ok_or_else(|| BackupError::NotFound(format!("backup '{name}'")))?;
        if job.status.is_terminal() {
            return Err(BackupError::InvalidState(format!(
                "backup '{name}' is {}",
                job.status
            )));
        }
        Ok(job)
    }

    async fn merge(&self, delta: &BackupDelta) -> BackupResult<BackupJob> {
        let lock = self.jobs.merge_lock(&delta.backup_name);
        let _guard = lock.lock().await;
        self.ledger
            .update_backup(&delta.backup_name, |current| match current.merge(delta) {
                Ok(merged) => Ok(merged),
                Err(MergeError::AlreadyMerged(table)) => {
                    debug!(backup = %current.name, %table, "delta already merged");
                    Ok(current)
                }
                Err(e) => Err(BackupError::from(e)),
            })
    }

    async fn set_status(&self, name: &str, status: BackupStatus) -> BackupResult<BackupJob> {
        let lock = self.jobs.merge_lock(name);
        let _guard = lock.lock().await;
        self.ledger.update_backup(name, |current| {
            if current.status == status {
                return Ok(current);
            }
            current
                .merge(&BackupDelta::status_only(name, status))
                .map_err(BackupError::from)
        })
    }

    /// Best effort: the merge error is what the caller sees either way.
    fn discard_segments(&self, name: &str, physical_table: &str, cause: &BackupError) {
        match self.ledger.delete_table_segments(name, physical_table) {
            Ok(removed) => warn!(backup = %name, table = %physical_table, removed, cause = %cause, "merge rejected, scan segments discarded"),
            Err(e) => warn!(backup = %name, table = %physical_table, error = %e, "could not discard segments of rejected scan"),
        }
    }

    /// Best effort: the scan error is what the caller sees either way.
    fn fail_job(&self, name: &str, cause: &BackupError) {
        let result = self.ledger.update_backup(name, |current| {
            current
                .merge(&BackupDelta::status_only(name, BackupStatus::Failed))
                .map_err(BackupError::from)
        });
        match result {
            Ok(_) => warn!(backup = %name, cause = %cause, "backup marked failed"),
            Err(e) => warn!(backup = %name, error = %e, "could not mark backup failed"),
        }
    }
}
