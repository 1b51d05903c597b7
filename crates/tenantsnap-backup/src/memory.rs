//! In-memory collaborators for tests and embedding.
//!
//! `MemoryKvStore` is an ordered map of physical tables with one-shot fault
//! injection. The two mapping providers model the placement strategies a
//! multi-tenant store typically moves between: every tenant-table sharing a
//! physical table with tenant-prefixed keys, or one physical table per
//! tenant-table.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tenantsnap_core::{
    KvStore, MappingError, MappingProvider, OwnedRow, PhysicalLocation, Row, ScanCursor, ScanPage,
    StoreError, StoreFuture, TenantTable,
};

type Table = BTreeMap<Vec<u8>, Vec<u8>>;

#[derive(Default)]
struct Faults {
    /// table → (successful pages left before failing, error to return).
    scan: HashMap<String, (usize, StoreError)>,
    /// Errors handed out to the next puts, in order.
    put: VecDeque<StoreError>,
    /// Tables whose puts always fail permanently.
    rejecting: HashSet<String>,
}

/// Ordered in-memory key-value store.
#[derive(Default)]
pub struct MemoryKvStore {
    tables: Mutex<HashMap<String, Table>>,
    faults: Mutex<Faults>,
    puts: AtomicUsize,
    scans: AtomicUsize,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a row directly, bypassing fault injection and counters.
    pub fn insert(&self, physical_table: &str, row: Row) {
        lock(&self.tables)
            .entry(physical_table.to_string())
            .or_default()
            .insert(row.key, row.value);
    }

    pub fn create_table(&self, physical_table: &str) {
        lock(&self.tables)
            .entry(physical_table.to_string())
            .or_default();
    }

    /// All rows of a physical table in key order.
    pub fn rows(&self, physical_table: &str) -> Vec<Row> {
        lock(&self.tables)
            .get(physical_table)
            .map(|t| {
                t.iter()
                    .map(|(k, v)| Row::new(k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of `put` calls that reached the store, failed ones included.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Number of `scan` calls that reached the store, failed ones included.
    pub fn scan_count(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }

    /// Fail the scan of `physical_table` once `after_pages` pages were served.
    pub fn fail_scan_after(&self, physical_table: &str, after_pages: usize, error: StoreError) {
        lock(&self.faults)
            .scan
            .insert(physical_table.to_string(), (after_pages, error));
    }

    /// Queue `error` for an upcoming put. Queued errors are handed out in order.
    pub fn fail_next_put(&self, error: StoreError) {
        lock(&self.faults).put.push_back(error);
    }

    /// Make every put to `physical_table` fail permanently.
    pub fn reject_puts_to(&self, physical_table: &str) {
        lock(&self.faults)
            .rejecting
            .insert(physical_table.to_string());
    }

    fn scan_now(
        &self,
        physical_table: &str,
        cursor: Option<&ScanCursor>,
        limit: usize,
    ) -> Result<ScanPage, StoreError> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        {
            let mut faults = lock(&self.faults);
            let exhausted = match faults.scan.get_mut(physical_table) {
                Some((0, _)) => true,
                Some((left, _)) => {
                    *left -= 1;
                    false
                }
                None => false,
            };
            if exhausted {
                if let Some((_, error)) = faults.scan.remove(physical_table) {
                    return Err(error);
                }
            }
        }

        let tables = lock(&self.tables);
        let table = tables
            .get(physical_table)
            .ok_or_else(|| StoreError::TableNotFound(physical_table.to_string()))?;
        let lower = match cursor {
            Some(ScanCursor(last)) => Bound::Excluded(last.clone()),
            None => Bound::Unbounded,
        };
        let mut iter = table.range((lower, Bound::Unbounded));
        let rows: Vec<Row> = iter
            .by_ref()
            .take(limit)
            .map(|(k, v)| Row::new(k.clone(), v.clone()))
            .collect();
        let next_cursor = match (iter.next(), rows.last()) {
            (Some(_), Some(last)) => Some(ScanCursor(last.key.clone())),
            _ => None,
        };
        Ok(ScanPage { rows, next_cursor })
    }

    fn put_now(&self, physical_table: &str, row: Row) -> Result<(), StoreError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        {
            let mut faults = lock(&self.faults);
            if faults.rejecting.contains(physical_table) {
                return Err(StoreError::Permanent(format!(
                    "writes to {physical_table} are rejected"
                )));
            }
            if let Some(error) = faults.put.pop_front() {
                return Err(error);
            }
        }
        lock(&self.tables)
            .entry(physical_table.to_string())
            .or_default()
            .insert(row.key, row.value);
        Ok(())
    }
}

impl KvStore for MemoryKvStore {
    fn scan<'a>(
        &'a self,
        physical_table: &'a str,
        cursor: Option<&'a ScanCursor>,
        limit: usize,
    ) -> StoreFuture<'a, ScanPage> {
        Box::pin(async move { self.scan_now(physical_table, cursor, limit) })
    }

    fn put<'a>(&'a self, physical_table: &'a str, row: Row) -> StoreFuture<'a, ()> {
        Box::pin(async move { self.put_now(physical_table, row) })
    }
}

// ── Mapping strategies ────────────────────────────────────────────

const KEY_SEPARATOR: u8 = 0x1f;

/// All tenant-tables share physical tables; keys carry a
/// `{tenant}\x1f{virtual_table}\x1f` prefix.
///
/// Every listed table is recognized when scanning; new placements go to the first one.
#[derive(Debug, Clone)]
pub struct SharedTableMapping {
    tables: Vec<String>,
}

impl SharedTableMapping {
    pub fn new<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tables: tables.into_iter().map(Into::into).collect(),
        }
    }

    pub fn key_prefix(tenant_table: &TenantTable) -> Vec<u8> {
        let mut prefix = Vec::new();
        prefix.extend_from_slice(tenant_table.tenant_id.as_bytes());
        prefix.push(KEY_SEPARATOR);
        prefix.extend_from_slice(tenant_table.virtual_table_name.as_bytes());
        prefix.push(KEY_SEPARATOR);
        prefix
    }

    /// Physical form of a logical row for `tenant_table`.
    pub fn physical_row(tenant_table: &TenantTable, row: &Row) -> Row {
        PhysicalLocation::new("", Self::key_prefix(tenant_table)).encode(row)
    }
}

impl MappingProvider for SharedTableMapping {
    fn resolve_owner(
        &self,
        physical_table: &str,
        row: &Row,
    ) -> Result<Option<OwnedRow>, MappingError> {
        if !self.tables.iter().any(|t| t == physical_table) {
            return Ok(None);
        }
        let mut parts = row.key.splitn(3, |b| *b == KEY_SEPARATOR);
        let (Some(tenant), Some(table), Some(key)) = (parts.next(), parts.next(), parts.next())
        else {
            // Not tenant data (e.g. table bookkeeping rows).
            return Ok(None);
        };
        let unattributable = |reason: &str| MappingError::Unattributable {
            table: physical_table.to_string(),
            reason: reason.to_string(),
        };
        let tenant_id =
            std::str::from_utf8(tenant).map_err(|_| unattributable("tenant id is not utf-8"))?;
        let virtual_table_name =
            std::str::from_utf8(table).map_err(|_| unattributable("table name is not utf-8"))?;
        Ok(Some(OwnedRow {
            owner: TenantTable::new(tenant_id, virtual_table_name),
            row: Row::new(key.to_vec(), row.value.clone()),
        }))
    }

    fn resolve_physical_location(
        &self,
        tenant_table: &TenantTable,
    ) -> Result<PhysicalLocation, MappingError> {
        let table = self
            .tables
            .first()
            .ok_or_else(|| MappingError::NoPlacement(tenant_table.clone()))?;
        Ok(PhysicalLocation::new(
            table.clone(),
            Self::key_prefix(tenant_table),
        ))
    }
}

/// Every tenant-table gets its own physical table named `{tenant}.{virtual_table}`.
///
/// Tenant ids must not contain `.`.
#[derive(Debug, Clone, Default)]
pub struct TablePerTenantMapping;

impl TablePerTenantMapping {
    pub fn table_name(tenant_table: &TenantTable) -> String {
        format!(
            "{}.{}",
            tenant_table.tenant_id, tenant_table.virtual_table_name
        )
    }
}

impl MappingProvider for TablePerTenantMapping {
    fn resolve_owner(
        &self,
        physical_table: &str,
        row: &Row,
    ) -> Result<Option<OwnedRow>, MappingError> {
        let (tenant_id, virtual_table_name) =
            physical_table
                .split_once('.')
                .ok_or_else(|| MappingError::Unattributable {
                    table: physical_table.to_string(),
                    reason: "table name is not {tenant}.{table}".to_string(),
                })?;
        Ok(Some(OwnedRow {
            owner: TenantTable::new(tenant_id, virtual_table_name),
            row: row.clone(),
        }))
    }

    fn resolve_physical_location(
        &self,
        tenant_table: &TenantTable,
    ) -> Result<PhysicalLocation, MappingError> {
        if tenant_table.tenant_id.contains('.') {
            return Err(MappingError::NoPlacement(tenant_table.clone()));
        }
        Ok(PhysicalLocation::new(Self::table_name(tenant_table), Vec::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(rows: usize) -> MemoryKvStore {
        let store = MemoryKvStore::new();
        for i in 0..rows {
            store.insert(
                "p1",
                Row::new(format!("k{i:03}").into_bytes(), b"v".to_vec()),
            );
        }
        store
    }

    #[tokio::test]
    async fn scan_pages_through_table() {
        let store = seeded(5);
        let mut cursor = None;
        let mut seen = Vec::new();
        loop {
            let page = store.scan("p1", cursor.as_ref(), 2).await.unwrap();
            seen.extend(page.rows);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        assert_eq!(seen.len(), 5);
        assert_eq!(store.scan_count(), 3);
    }

    #[tokio::test]
    async fn scan_exact_page_has_no_cursor() {
        let store = seeded(2);
        let page = store.scan("p1", None, 2).await.unwrap();
        assert_eq!(page.rows.len(), 2);
        assert!(page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn scan_unknown_table_fails() {
        let store = MemoryKvStore::new();
        let err = store.scan("nope", None, 10).await.unwrap_err();
        assert_eq!(err, StoreError::TableNotFound("nope".into()));
    }

    #[tokio::test]
    async fn scan_fault_fires_once() {
        let store = seeded(4);
        store.fail_scan_after("p1", 1, StoreError::Unavailable("blip".into()));

        let first = store.scan("p1", None, 2).await.unwrap();
        assert!(store.scan("p1", first.next_cursor.as_ref(), 2).await.is_err());
        assert!(store.scan("p1", first.next_cursor.as_ref(), 2).await.is_ok());
    }

    #[tokio::test]
    async fn put_faults_and_counts() {
        let store = MemoryKvStore::new();
        store.fail_next_put(StoreError::Throttled("slow".into()));

        let row = Row::new(b"a".to_vec(), b"1".to_vec());
        assert!(store.put("t", row.clone()).await.is_err());
        store.put("t", row.clone()).await.unwrap();
        assert_eq!(store.rows("t"), vec![row]);
        assert_eq!(store.put_count(), 2);

        store.reject_puts_to("t");
        assert!(matches!(
            store.put("t", Row::new(b"b".to_vec(), vec![])).await,
            Err(StoreError::Permanent(_))
        ));
    }

    #[test]
    fn shared_mapping_roundtrips_ownership() {
        let mapping = SharedTableMapping::new(["mt_shared"]);
        let owner = TenantTable::new("acme", "orders");
        let logical = Row::new(b"42".to_vec(), b"payload".to_vec());
        let physical = SharedTableMapping::physical_row(&owner, &logical);

        let owned = mapping.resolve_owner("mt_shared", &physical).unwrap().unwrap();
        assert_eq!(owned.owner, owner);
        assert_eq!(owned.row, logical);

        let loc = mapping.resolve_physical_location(&owner).unwrap();
        assert_eq!(loc.physical_table, "mt_shared");
        assert_eq!(loc.encode(&logical), physical);
    }

    #[test]
    fn shared_mapping_skips_foreign_rows() {
        let mapping = SharedTableMapping::new(["mt_shared"]);
        let bookkeeping = Row::new(b"__schema".to_vec(), vec![]);
        assert!(mapping.resolve_owner("mt_shared", &bookkeeping).unwrap().is_none());

        let owner = TenantTable::new("acme", "orders");
        let row = SharedTableMapping::physical_row(&owner, &Row::new(b"1".to_vec(), vec![]));
        assert!(mapping.resolve_owner("other_table", &row).unwrap().is_none());
    }

    #[test]
    fn table_per_tenant_mapping() {
        let mapping = TablePerTenantMapping;
        let owner = TenantTable::new("acme", "orders");
        let loc = mapping.resolve_physical_location(&owner).unwrap();
        assert_eq!(loc.physical_table, "acme.orders");
        assert!(loc.key_prefix.is_empty());

        let row = Row::new(b"1".to_vec(), b"x".to_vec());
        let owned = mapping.resolve_owner("acme.orders", &row).unwrap().unwrap();
        assert_eq!(owned.owner, owner);
        assert_eq!(owned.row, row);

        assert!(mapping.resolve_owner("unscoped", &row).is_err());
        assert!(mapping
            .resolve_physical_location(&TenantTable::new("a.b", "orders"))
            .is_err());
    }
}
