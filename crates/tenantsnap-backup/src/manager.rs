//! Single entry point over the orchestrators and the catalog.

use std::sync::Arc;

use tenantsnap_core::{
    BackupConfig, BackupJob, BackupPage, CreateBackupRequest, KvStore, ListBackupsRequest,
    MappingProvider, RestoreOutcome, RestoreRequest,
};
use tenantsnap_ledger::Ledger;

use crate::catalog::BackupCatalog;
use crate::error::BackupResult;
use crate::orchestrator::{BackupOrchestrator, TableScanResult};
use crate::registry::JobRegistry;
use crate::restore::RestoreOrchestrator;

/// Backup, restore, and catalog calls for one ledger and one store.
///
/// Cheap to share: wrap it in an `Arc` and call it from any task.
pub struct MtBackupManager {
    backups: BackupOrchestrator,
    restores: RestoreOrchestrator,
    catalog: BackupCatalog,
}

impl MtBackupManager {
    pub fn new(
        ledger: Ledger,
        store: Arc<dyn KvStore>,
        mapping: Arc<dyn MappingProvider>,
        config: &BackupConfig,
    ) -> Self {
        let jobs = Arc::new(JobRegistry::new());
        Self {
            backups: BackupOrchestrator::new(
                ledger.clone(),
                Arc::clone(&store),
                Arc::clone(&mapping),
                Arc::clone(&jobs),
                config,
            ),
            restores: RestoreOrchestrator::new(ledger.clone(), store, mapping, config),
            catalog: BackupCatalog::new(ledger, jobs, config.default_list_page_size),
        }
    }

    pub fn create_backup(&self, request: &CreateBackupRequest) -> BackupResult<BackupJob> {
        self.backups.create_backup(request)
    }

    pub async fn backup_physical_mt_table(
        &self,
        request: &CreateBackupRequest,
        physical_table: &str,
    ) -> BackupResult<BackupJob> {
        self.backups
            .backup_physical_mt_table(request, physical_table)
            .await
    }

    pub async fn backup_physical_mt_tables(
        &self,
        request: &CreateBackupRequest,
        physical_tables: &[String],
    ) -> Vec<TableScanResult> {
        self.backups
            .backup_physical_mt_tables(request, physical_tables)
            .await
    }

    pub async fn mark_backup_complete(
        &self,
        request: &CreateBackupRequest,
    ) -> BackupResult<BackupJob> {
        self.backups.mark_backup_complete(request).await
    }

    pub async fn mark_backup_failed(&self, request: &CreateBackupRequest) -> BackupResult<BackupJob> {
        self.backups.mark_backup_failed(request).await
    }

    pub fn get_backup(&self, name: &str) -> BackupResult<Option<BackupJob>> {
        self.catalog.get_backup(name)
    }

    pub fn delete_backup(&self, name: &str) -> BackupResult<Option<BackupJob>> {
        self.catalog.delete_backup(name)
    }

    pub fn list_backups(&self, request: &ListBackupsRequest) -> BackupResult<BackupPage> {
        self.catalog.list_backups(request)
    }

    pub async fn restore_tenant_table_backup(
        &self,
        request: &RestoreRequest,
    ) -> BackupResult<RestoreOutcome> {
        self.restores.restore_tenant_table_backup(request).await
    }
}
