//! tenantsnap-core — shared types for per-tenant-table backups.
//!
//! Holds the domain model (jobs, deltas, segments, requests), the
//! collaborator contracts for the key-value store and mapping provider, and
//! the TOML configuration.

pub mod collab;
pub mod config;
pub mod job;
pub mod request;
pub mod segment;
pub mod types;

pub use collab::{KvStore, MappingError, MappingProvider, ScanCursor, ScanPage, StoreError, StoreFuture};
pub use config::{BackupConfig, ConfigError, RetryConfig};
pub use job::{BackupDelta, BackupJob, BackupStatus, InvalidTransition, MergeError};
pub use request::*;
pub use segment::{Segment, SegmentKey};
pub use types::*;
