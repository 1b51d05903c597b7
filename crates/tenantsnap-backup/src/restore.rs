//! Restore orchestrator — copies one backed-up tenant-table into another.
//!
//! Segments are read by logical identity only, so rows backed up from any
//! physical table, under any mapping strategy, restore the same way. The
//! destination is resolved through the mapping provider when the restore
//! runs.
//!
//! Every segment's checksum is verified before the first write, so a
//! corrupt backup fails without touching the target. Writes then fan out on
//! a `JoinSet` holding at most `restore_write_concurrency` tasks. Retryable
//! store errors back off exponentially; the first row that still fails
//! stops further dispatch. Rows already written stay written.

use std::sync::Arc;

use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, warn};

use tenantsnap_core::{
    BackupConfig, BackupStatus, KvStore, MappingProvider, RestoreOutcome, RestoreRequest,
    RetryConfig, Row, SegmentKey, StoreError, TenantTable,
};
use tenantsnap_ledger::Ledger;

use crate::error::{BackupError, BackupResult};

/// Segments fetched from the ledger per read.
const SEGMENT_PAGE: usize = 32;

pub struct RestoreOrchestrator {
    ledger: Ledger,
    store: Arc<dyn KvStore>,
    mapping: Arc<dyn MappingProvider>,
    write_concurrency: usize,
    retry: RetryConfig,
}

#[derive(Default)]
struct WriteTally {
    restored: u64,
    failed: u64,
    first_error: Option<BackupError>,
}

impl WriteTally {
    fn record(&mut self, joined: Result<BackupResult<()>, JoinError>) {
        let error = match joined {
            Ok(Ok(())) => {
                self.restored += 1;
                return;
            }
            Ok(Err(e)) => e,
            Err(e) => BackupError::Worker(format!("write task aborted: {e}")),
        };
        self.failed += 1;
        self.first_error.get_or_insert(error);
    }
}

impl RestoreOrchestrator {
    pub fn new(
        ledger: Ledger,
        store: Arc<dyn KvStore>,
        mapping: Arc<dyn MappingProvider>,
        config: &BackupConfig,
    ) -> Self {
        Self {
            ledger,
            store,
            mapping,
            write_concurrency: config.restore_write_concurrency.max(1),
            retry: config.write_retry.clone(),
        }
    }

    /// Restore `request.source` from its backup into `request.target`.
    ///
    /// Validation failures, a corrupt segment included, return an error
    /// before anything is written. Once writing starts, a failed row yields
    /// an outcome with status FAILED carrying the first write error.
    pub async fn restore_tenant_table_backup(
        &self,
        request: &RestoreRequest,
    ) -> BackupResult<RestoreOutcome> {
        let source = &request.source;
        let target = &request.target;
        if request.is_in_place() {
            return Err(BackupError::InvalidRequest(format!(
                "restore target {target} is the backup source"
            )));
        }

        let job = self
            .ledger
            .get_backup(&source.backup_name)?
            .ok_or_else(|| BackupError::NotFound(format!("backup '{}'", source.backup_name)))?;
        if job.status != BackupStatus::Complete {
            return Err(BackupError::InvalidRequest(format!(
                "backup '{}' is {}, only complete backups can be restored",
                job.name, job.status
            )));
        }
        let owner = source.tenant_table();
        let recorded = job
            .row_count(&owner)
            .ok_or_else(|| BackupError::NotFound(format!("tenant-table {source}")))?;

        let location = self.mapping.resolve_physical_location(target)?;
        debug!(
            backup = %job.name,
            source = %owner,
            %target,
            table = %location.physical_table,
            recorded,
            "restore started"
        );

        let segments = self.verify_segments(&job.name, &owner)?;

        let mut writes: JoinSet<BackupResult<()>> = JoinSet::new();
        let mut tally = WriteTally::default();
        let mut cursor: Option<SegmentKey> = None;

        'segments: loop {
            let page =
                self.ledger
                    .list_segments(&job.name, &owner, cursor.as_ref(), SEGMENT_PAGE)?;
            let exhausted = page.len() < SEGMENT_PAGE;
            for entry in page {
                for row in &entry.segment.rows {
                    while writes.len() >= self.write_concurrency {
                        if let Some(joined) = writes.join_next().await {
                            tally.record(joined);
                        }
                    }
                    if tally.failed > 0 {
                        break 'segments;
                    }
                    writes.spawn(write_row(
                        Arc::clone(&self.store),
                        location.physical_table.clone(),
                        location.encode(row),
                        self.retry.clone(),
                    ));
                }
                cursor = Some(entry.key);
            }
            if exhausted {
                break;
            }
        }

        while let Some(joined) = writes.join_next().await {
            tally.record(joined);
        }

        let status = if tally.failed == 0 {
            BackupStatus::Complete
        } else {
            BackupStatus::Failed
        };
        match &tally.first_error {
            Some(error) => warn!(
                backup = %job.name,
                source = %owner,
                %target,
                segments,
                restored = tally.restored,
                failed = tally.failed,
                %error,
                "restore failed"
            ),
            None => {
                if tally.restored != recorded {
                    warn!(
                        backup = %job.name,
                        source = %owner,
                        restored = tally.restored,
                        recorded,
                        "restored row count differs from backup record"
                    );
                }
                info!(backup = %job.name, source = %owner, %target, segments, rows = tally.restored, "restore complete");
            }
        }

        Ok(RestoreOutcome {
            backup_name: job.name,
            status,
            tenant_id: target.tenant_id.clone(),
            virtual_table_name: target.virtual_table_name.clone(),
            rows_restored: tally.restored,
            rows_failed: tally.failed,
            error: tally.first_error.map(|e| e.to_string()),
        })
    }

    /// Check every segment of `owner` against its checksum. Returns how many there are.
    fn verify_segments(&self, backup_name: &str, owner: &TenantTable) -> BackupResult<u64> {
        let mut cursor: Option<SegmentKey> = None;
        let mut verified = 0;
        loop {
            let page = self
                .ledger
                .list_segments(backup_name, owner, cursor.as_ref(), SEGMENT_PAGE)?;
            let exhausted = page.len() < SEGMENT_PAGE;
            for entry in page {
                if !entry.segment.verify() {
                    let key = entry.key;
                    warn!(backup = %backup_name, source = %owner, sequence = key.sequence, "segment checksum mismatch");
                    return Err(BackupError::SourceRead {
                        source: StoreError::Permanent(format!(
                            "segment {} of {owner} in backup '{backup_name}' failed its checksum",
                            key.sequence
                        )),
                        table: key.physical_table,
                    });
                }
                verified += 1;
                cursor = Some(entry.key);
            }
            if exhausted {
                return Ok(verified);
            }
        }
    }
}

async fn write_row(
    store: Arc<dyn KvStore>,
    table: String,
    row: Row,
    retry: RetryConfig,
) -> BackupResult<()> {
    let mut attempt = 1;
    loop {
        let error = match store.put(&table, row.clone()).await {
            Ok(()) => return Ok(()),
            Err(source) => BackupError::TargetWrite {
                table: table.clone(),
                source,
            },
        };
        if !error.is_retryable() || attempt >= retry.max_attempts {
            return Err(error);
        }
        let delay = retry.backoff(attempt);
        debug!(%table, attempt, delay_ms = delay.as_millis() as u64, %error, "retrying write");
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryKvStore, SharedTableMapping};
    use tenantsnap_core::{BackupDelta, BackupJob, Segment, TenantTable, TenantTableKey};

    fn fast_retry() -> BackupConfig {
        BackupConfig {
            restore_write_concurrency: 2,
            write_retry: RetryConfig {
                max_attempts: 3,
                initial_backoff_ms: 1,
                max_backoff_ms: 4,
            },
            ..BackupConfig::default()
        }
    }

    /// A ledger holding backup `b1` in `status` with `rows` rows of t1.orders in one segment.
    fn ledger_with(status: BackupStatus, rows: usize) -> Ledger {
        let ledger = Ledger::open_in_memory().unwrap();
        let owner = TenantTable::new("t1", "orders");
        ledger.create_backup(&BackupJob::new("b1", 1)).unwrap();

        let segment = Segment::new(
            (0..rows)
                .map(|i| Row::new(format!("k{i:03}").into_bytes(), b"v".to_vec()))
                .collect(),
        );
        ledger
            .put_segment(&SegmentKey::new("b1", &owner, "p1", 0), &segment)
            .unwrap();

        let mut delta = BackupDelta::for_table("b1", "p1");
        delta.record(&owner, rows as u64);
        ledger
            .update_backup::<BackupError, _>("b1", |job| Ok(job.merge(&delta)?))
            .unwrap();
        if status != BackupStatus::InProgress {
            ledger
                .update_backup::<BackupError, _>("b1", |job| {
                    Ok(job.merge(&BackupDelta::status_only("b1", status))?)
                })
                .unwrap();
        }
        ledger
    }

    fn restorer(ledger: Ledger, store: Arc<MemoryKvStore>) -> RestoreOrchestrator {
        let mapping = Arc::new(SharedTableMapping::new(["p1"]));
        RestoreOrchestrator::new(ledger, store, mapping, &fast_retry())
    }

    fn to_t2() -> RestoreRequest {
        RestoreRequest::new(
            TenantTableKey::new("b1", "t1", "orders"),
            TenantTable::new("t2", "orders"),
        )
    }

    #[tokio::test]
    async fn restores_every_row_under_target_prefix() {
        let store = Arc::new(MemoryKvStore::new());
        let restorer = restorer(ledger_with(BackupStatus::Complete, 10), store.clone());

        let outcome = restorer.restore_tenant_table_backup(&to_t2()).await.unwrap();

        assert_eq!(outcome.status, BackupStatus::Complete);
        assert_eq!(outcome.rows_restored, 10);
        assert_eq!(outcome.tenant_id, "t2");
        let rows = store.rows("p1");
        assert_eq!(rows.len(), 10);
        let prefix = SharedTableMapping::key_prefix(&TenantTable::new("t2", "orders"));
        assert!(rows.iter().all(|r| r.key.starts_with(&prefix)));
    }

    #[tokio::test]
    async fn in_place_restore_writes_nothing() {
        let store = Arc::new(MemoryKvStore::new());
        let restorer = restorer(ledger_with(BackupStatus::Complete, 3), store.clone());
        let request = RestoreRequest::new(
            TenantTableKey::new("b1", "t1", "orders"),
            TenantTable::new("t1", "orders"),
        );

        let err = restorer.restore_tenant_table_backup(&request).await.unwrap_err();
        assert!(matches!(err, BackupError::InvalidRequest(_)));
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test]
    async fn only_complete_backups_restore() {
        for status in [BackupStatus::InProgress, BackupStatus::Failed] {
            let store = Arc::new(MemoryKvStore::new());
            let restorer = restorer(ledger_with(status, 3), store.clone());
            let err = restorer.restore_tenant_table_backup(&to_t2()).await.unwrap_err();
            assert!(matches!(err, BackupError::InvalidRequest(_)), "{status}");
            assert_eq!(store.put_count(), 0);
        }
    }

    #[tokio::test]
    async fn unknown_backup_or_tenant_table_is_not_found() {
        let store = Arc::new(MemoryKvStore::new());
        let restorer = restorer(ledger_with(BackupStatus::Complete, 3), store);

        let missing_backup = RestoreRequest::new(
            TenantTableKey::new("b9", "t1", "orders"),
            TenantTable::new("t2", "orders"),
        );
        let missing_table = RestoreRequest::new(
            TenantTableKey::new("b1", "t1", "invoices"),
            TenantTable::new("t2", "invoices"),
        );
        for request in [missing_backup, missing_table] {
            assert!(matches!(
                restorer.restore_tenant_table_backup(&request).await,
                Err(BackupError::NotFound(_))
            ));
        }
    }

    #[tokio::test]
    async fn throttled_writes_are_retried() {
        let store = Arc::new(MemoryKvStore::new());
        store.fail_next_put(StoreError::Throttled("slow down".into()));
        store.fail_next_put(StoreError::Unavailable("blip".into()));
        let restorer = restorer(ledger_with(BackupStatus::Complete, 4), store.clone());

        let outcome = restorer.restore_tenant_table_backup(&to_t2()).await.unwrap();

        assert_eq!(outcome.status, BackupStatus::Complete);
        assert_eq!(outcome.rows_restored, 4);
        assert_eq!(store.rows("p1").len(), 4);
        assert_eq!(store.put_count(), 6);
    }

    #[tokio::test]
    async fn rejected_writes_fail_the_outcome_only() {
        let store = Arc::new(MemoryKvStore::new());
        store.reject_puts_to("p1");
        let ledger = ledger_with(BackupStatus::Complete, 20);
        let restorer = restorer(ledger.clone(), store.clone());

        let outcome = restorer.restore_tenant_table_backup(&to_t2()).await.unwrap();

        assert_eq!(outcome.status, BackupStatus::Failed);
        assert_eq!(outcome.rows_restored, 0);
        assert!(outcome.rows_failed >= 1);
        let error = outcome.error.as_deref().unwrap();
        assert!(error.starts_with("target write failed on p1"), "{error}");
        // Dispatch stops after the first failure.
        assert!(store.put_count() < 20);
        // The source backup is untouched.
        assert_eq!(
            ledger.get_backup("b1").unwrap().unwrap().status,
            BackupStatus::Complete
        );
    }

    #[tokio::test]
    async fn write_failures_surface_as_target_write() {
        let store = Arc::new(MemoryKvStore::new());
        let retry = fast_retry().write_retry;
        let row = Row::new(b"k".to_vec(), b"v".to_vec());

        for _ in 0..retry.max_attempts {
            store.fail_next_put(StoreError::Throttled("busy".into()));
        }
        let err = write_row(store.clone(), "p1".into(), row.clone(), retry.clone())
            .await
            .unwrap_err();
        assert!(matches!(&err, BackupError::TargetWrite { table, .. } if table == "p1"));
        assert!(err.is_retryable());
        assert_eq!(store.put_count(), retry.max_attempts as usize);

        store.reject_puts_to("p1");
        let err = write_row(store.clone(), "p1".into(), row, retry).await.unwrap_err();
        assert!(matches!(
            err,
            BackupError::TargetWrite {
                source: StoreError::Permanent(_),
                ..
            }
        ));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn corrupt_segment_is_a_read_error() {
        let store = Arc::new(MemoryKvStore::new());
        let ledger = ledger_with(BackupStatus::Complete, 2);
        let owner = TenantTable::new("t1", "orders");
        let mut segment = Segment::new(vec![Row::new(b"x".to_vec(), b"1".to_vec())]);
        segment.rows[0].value = b"tampered".to_vec();
        ledger
            .put_segment(&SegmentKey::new("b1", &owner, "p1", 1), &segment)
            .unwrap();
        let restorer = restorer(ledger, store.clone());

        let err = restorer.restore_tenant_table_backup(&to_t2()).await.unwrap_err();
        assert!(matches!(err, BackupError::SourceRead { .. }));
        assert!(!err.is_retryable());
        // The valid segment ahead of the corrupt one is not written either.
        assert_eq!(store.put_count(), 0);
        assert!(store.rows("p1").is_empty());
    }
}
