//! tenantsnap-backup — per-tenant-table backup and restore.
//!
//! Backs up a multi-tenant key-value store one physical table at a time
//! and restores any single tenant-table into another. The pieces:
//!
//! - [`TableSnapshotter`] scans a physical table into per-owner segments
//! - [`BackupOrchestrator`] runs the job lifecycle and merges scan deltas
//! - [`RestoreOrchestrator`] writes a backed-up tenant-table to a new home
//! - [`BackupCatalog`] lists, reads, and deletes jobs
//!
//! [`MtBackupManager`] wires all of them to one ledger and one store.
//!
//! # Architecture
//!
//! ```text
//! MtBackupManager
//!   ├── BackupOrchestrator
//!   │     ├── TableSnapshotter (KvStore scan → MappingProvider → segments)
//!   │     ├── JobRegistry (per-backup merge lock, in-flight scans)
//!   │     └── Ledger (job records, atomic merge)
//!   ├── RestoreOrchestrator (segments → MappingProvider → KvStore put)
//!   └── BackupCatalog (Ledger listing and cascading delete)
//! ```

pub mod catalog;
pub mod error;
pub mod manager;
pub mod memory;
pub mod orchestrator;
pub mod registry;
pub mod restore;
pub mod snapshotter;

pub use catalog::BackupCatalog;
pub use error::{BackupError, BackupResult};
pub use manager::MtBackupManager;
pub use memory::{MemoryKvStore, SharedTableMapping, TablePerTenantMapping};
pub use orchestrator::{BackupOrchestrator, TableScanResult};
pub use registry::JobRegistry;
pub use restore::RestoreOrchestrator;
pub use snapshotter::TableSnapshotter;
