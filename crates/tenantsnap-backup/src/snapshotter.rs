//! Table snapshotter — scans one physical table into per-tenant segments.
//!
//! The snapshotter keeps no state between calls. It reads a physical table
//! page by page, asks the mapping provider who owns each row, packs the
//! logical rows into segments keyed by their owner, and returns the row
//! counts as a [`BackupDelta`]. Merging that delta into the job is the
//! orchestrator's business.
//!
//! A delta is only returned once the scan is exhausted. If the scan fails
//! partway, the segments this attempt already wrote are removed again, so a
//! retry starts from a clean slate. Segments left by an attempt that died
//! without cleaning up are cleared when the next attempt starts.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use tenantsnap_core::{
    BackupConfig, BackupDelta, KvStore, MappingProvider, Row, ScanCursor, Segment, SegmentKey,
    TenantTable,
};
use tenantsnap_ledger::Ledger;

use crate::error::{BackupError, BackupResult};

pub struct TableSnapshotter {
    store: Arc<dyn KvStore>,
    mapping: Arc<dyn MappingProvider>,
    ledger: Ledger,
    page_size: usize,
    segment_max_rows: usize,
}

/// Segment bookkeeping for one scan attempt.
struct ScanState<'a> {
    backup_name: &'a str,
    physical_table: &'a str,
    next_sequence: u64,
    written: Vec<SegmentKey>,
}

impl TableSnapshotter {
    pub fn new(
        store: Arc<dyn KvStore>,
        mapping: Arc<dyn MappingProvider>,
        ledger: Ledger,
        config: &BackupConfig,
    ) -> Self {
        Self {
            store,
            mapping,
            ledger,
            page_size: config.scan_page_size,
            segment_max_rows: config.segment_max_rows,
        }
    }

    /// Scan `physical_table` to the end and write its rows as segments of `backup_name`.
    pub async fn snapshot(
        &self,
        backup_name: &str,
        physical_table: &str,
    ) -> BackupResult<BackupDelta> {
        let stale = self.ledger.delete_table_segments(backup_name, physical_table)?;
        if stale > 0 {
            warn!(backup = %backup_name, table = %physical_table, stale, "removed segments of an abandoned scan");
        }
        let mut state = ScanState {
            backup_name,
            physical_table,
            next_sequence: 0,
            written: Vec::new(),
        };
        match self.scan(&mut state).await {
            Ok(delta) => Ok(delta),
            Err(e) => {
                self.purge(&state);
                Err(e)
            }
        }
    }

    async fn scan(&self, state: &mut ScanState<'_>) -> BackupResult<BackupDelta> {
        let table = state.physical_table;
        let mut delta = BackupDelta::for_table(state.backup_name, table);
        let mut pending: BTreeMap<TenantTable, Vec<Row>> = BTreeMap::new();
        let mut cursor: Option<ScanCursor> = None;
        let mut pages = 0u64;

        loop {
            let page = self
                .store
                .scan(table, cursor.as_ref(), self.page_size)
                .await
                .map_err(|source| BackupError::SourceRead {
                    table: table.to_string(),
                    source,
                })?;
            pages += 1;

            for row in page.rows {
                let Some(owned) = self.mapping.resolve_owner(table, &row)? else {
                    delta.skipped_rows += 1;
                    continue;
                };
                delta.record(&owned.owner, 1);
                let rows = pending.entry(owned.owner.clone()).or_default();
                rows.push(owned.row);
                if rows.len() >= self.segment_max_rows {
                    let full = std::mem::take(rows);
                    self.write_segment(state, &owned.owner, full)?;
                }
            }

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        for (owner, rows) in pending {
            if !rows.is_empty() {
                self.write_segment(state, &owner, rows)?;
            }
        }

        debug!(
            backup = %state.backup_name,
            %table,
            pages,
            rows = delta.total_rows(),
            tenant_tables = delta.tenant_tables.len(),
            segments = state.written.len(),
            skipped = delta.skipped_rows,
            "physical table scanned"
        );
        Ok(delta)
    }

    fn write_segment(
        &self,
        state: &mut ScanState<'_>,
        owner: &TenantTable,
        rows: Vec<Row>,
    ) -> BackupResult<()> {
        let key = SegmentKey::new(
            state.backup_name,
            owner,
            state.physical_table,
            state.next_sequence,
        );
        state.next_sequence += 1;
        self.ledger.put_segment(&key, &Segment::new(rows))?;
        state.written.push(key);
        Ok(())
    }

    fn purge(&self, state: &ScanState<'_>) {
        if state.written.is_empty() {
            return;
        }
        match self.ledger.delete_segments(&state.written) {
            Ok(removed) => debug!(
                backup = %state.backup_name,
                table = %state.physical_table,
                removed,
                "purged segments of interrupted scan"
            ),
            Err(e) => warn!(
                backup = %state.backup_name,
                table = %state.physical_table,
                error = %e,
                "failed to purge segments of interrupted scan"
            ),
        }
    }
}
