//! tenantsnap-ledger — the backup metadata ledger and segment store.
//!
//! Backed by [redb](https://docs.rs/redb). One record per backup job holds
//! its status, creation time, per-tenant-table row counts, and the set of
//! physical tables already merged. Segments of backed-up rows live in a
//! second table under keys that start with the backup name, so deleting a
//! backup cascades with a single prefix sweep.
//!
//! The `Ledger` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod record;
pub mod store;
pub mod tables;

pub use error::{LedgerError, LedgerResult};
pub use record::{LedgerRecord, SegmentEntry, LEDGER_FORMAT_VERSION};
pub use store::Ledger;
