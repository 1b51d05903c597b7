//! Read and delete access to backup jobs.

use std::sync::Arc;

use tracing::info;

use tenantsnap_core::{BackupJob, BackupPage, BackupSummary, ListBackupsRequest};
use tenantsnap_ledger::Ledger;

use crate::error::{BackupError, BackupResult};
use crate::registry::JobRegistry;

pub struct BackupCatalog {
    ledger: Ledger,
    jobs: Arc<JobRegistry>,
    default_page_size: usize,
}

impl BackupCatalog {
    pub fn new(ledger: Ledger, jobs: Arc<JobRegistry>, default_page_size: usize) -> Self {
        Self {
            ledger,
            jobs,
            default_page_size,
        }
    }

    pub fn get_backup(&self, name: &str) -> BackupResult<Option<BackupJob>> {
        Ok(self.ledger.get_backup(name)?)
    }

    /// Remove a backup and all of its segments. Returns the job as it was.
    ///
    /// Refused while any scan of the backup is running.
    pub fn delete_backup(&self, name: &str) -> BackupResult<Option<BackupJob>> {
        let running = self.jobs.active_scans(name);
        if running > 0 {
            return Err(BackupError::Conflict(format!(
                "backup '{name}' has {running} scan(s) running"
            )));
        }
        let removed = self.ledger.delete_backup(name)?;
        self.jobs.forget(name);
        if let Some(job) = &removed {
            info!(backup = %name, status = %job.status, rows = job.total_rows(), "backup deleted");
        }
        Ok(removed)
    }

    /// One page of backups in name order.
    pub fn list_backups(&self, request: &ListBackupsRequest) -> BackupResult<BackupPage> {
        let limit = request.limit.unwrap_or(self.default_page_size);
        if limit == 0 {
            return Err(BackupError::InvalidRequest(
                "page size must be greater than zero".into(),
            ));
        }
        let (jobs, has_more) = self
            .ledger
            .list_backups(request.exclusive_start_backup_name.as_deref(), limit)?;
        let last_evaluated_backup_name = if has_more {
            jobs.last().map(|job| job.name.clone())
        } else {
            None
        };
        Ok(BackupPage {
            backups: jobs.iter().map(BackupSummary::from).collect(),
            last_evaluated_backup_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog_with(names: &[&str]) -> BackupCatalog {
        let ledger = Ledger::open_in_memory().unwrap();
        for (i, name) in names.iter().enumerate() {
            ledger.create_backup(&BackupJob::new(*name, i as u64)).unwrap();
        }
        BackupCatalog::new(ledger, Arc::new(JobRegistry::new()), 2)
    }

    #[test]
    fn pages_in_name_order() {
        let catalog = catalog_with(&["delta", "alpha", "echo", "charlie", "bravo"]);

        let mut names = Vec::new();
        let mut request = ListBackupsRequest::default();
        let mut pages = 0;
        loop {
            let page = catalog.list_backups(&request).unwrap();
            assert!(page.backups.len() <= 2);
            names.extend(page.backups.into_iter().map(|b| b.backup_name));
            pages += 1;
            match page.last_evaluated_backup_name {
                Some(cursor) => request = ListBackupsRequest::default().after(cursor),
                None => break,
            }
        }
        assert_eq!(names, ["alpha", "bravo", "charlie", "delta", "echo"]);
        assert_eq!(pages, 3);
    }

    #[test]
    fn exact_page_has_no_cursor() {
        let catalog = catalog_with(&["a", "b"]);
        let page = catalog.list_backups(&ListBackupsRequest::with_limit(2)).unwrap();
        assert_eq!(page.backups.len(), 2);
        assert!(page.last_evaluated_backup_name.is_none());
    }

    #[test]
    fn zero_page_size_is_rejected() {
        let catalog = catalog_with(&["a"]);
        assert!(matches!(
            catalog.list_backups(&ListBackupsRequest::with_limit(0)),
            Err(BackupError::InvalidRequest(_))
        ));
    }

    #[test]
    fn delete_returns_previous_record() {
        let catalog = catalog_with(&["a"]);
        let removed = catalog.delete_backup("a").unwrap().unwrap();
        assert_eq!(removed.name, "a");
        assert!(catalog.get_backup("a").unwrap().is_none());
        assert!(catalog.delete_backup("a").unwrap().is_none());
    }

    #[test]
    fn delete_is_refused_while_scanning() {
        let ledger = Ledger::open_in_memory().unwrap();
        ledger.create_backup(&BackupJob::new("a", 0)).unwrap();
        let jobs = Arc::new(JobRegistry::new());
        let catalog = BackupCatalog::new(ledger, jobs.clone(), 10);

        let claim = jobs.claim_scan("a", "p1").unwrap();
        assert!(matches!(catalog.delete_backup("a"), Err(BackupError::Conflict(_))));
        drop(claim);
        assert!(catalog.delete_backup("a").unwrap().is_some());
    }
}
