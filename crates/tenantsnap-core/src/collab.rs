//! Contracts for the external collaborators tenantsnap runs against.
//!
//! The key-value store is consumed only through paginated scans and single
//! row puts. The mapping provider owns the knowledge of how tenant-tables
//! are placed onto physical tables. Both are injected as trait objects so
//! tests can swap in in-memory versions.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::types::{OwnedRow, PhysicalLocation, Row, TenantTable};

/// Errors surfaced by the store. Transient variants are safe to retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("throttled: {0}")]
    Throttled(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("physical table not found: {0}")]
    TableNotFound(String),

    #[error("{0}")]
    Permanent(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Throttled(_) | StoreError::Unavailable(_))
    }
}

/// Errors surfaced by the mapping provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    #[error("cannot attribute row in {table}: {reason}")]
    Unattributable { table: String, reason: String },

    #[error("no placement for tenant-table {0}")]
    NoPlacement(TenantTable),
}

/// Opaque continuation token returned by [`KvStore::scan`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScanCursor(pub Vec<u8>);

/// One page of a physical table scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    pub rows: Vec<Row>,
    /// `None` once the table is exhausted.
    pub next_cursor: Option<ScanCursor>,
}

/// Boxed future alias for store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// The shared multi-tenant key-value store.
pub trait KvStore: Send + Sync {
    /// Fetch up to `limit` rows of `physical_table`, continuing after `cursor`.
    fn scan<'a>(
        &'a self,
        physical_table: &'a str,
        cursor: Option<&'a ScanCursor>,
        limit: usize,
    ) -> StoreFuture<'a, ScanPage>;

    /// Write one physical row into `physical_table`, replacing any row with the same key.
    fn put<'a>(&'a self, physical_table: &'a str, row: Row) -> StoreFuture<'a, ()>;
}

/// Translates between physical rows and logical tenant-tables.
pub trait MappingProvider: Send + Sync {
    /// Which tenant-table owns `row`, with the row in its logical form.
    ///
    /// `Ok(None)` means the row belongs to no tenant (bookkeeping rows and the like).
    fn resolve_owner(
        &self,
        physical_table: &str,
        row: &Row,
    ) -> Result<Option<OwnedRow>, MappingError>;

    /// Where `tenant_table` lives under the current placement strategy.
    fn resolve_physical_location(
        &self,
        tenant_table: &TenantTable,
    ) -> Result<PhysicalLocation, MappingError>;
}
