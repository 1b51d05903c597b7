//! Backup and restore error types.

use thiserror::Error;

use tenantsnap_core::{MappingError, MergeError, StoreError};
use tenantsnap_ledger::LedgerError;

/// Errors that can occur during backup, restore, and catalog operations.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("source read failed on {table}: {source}")]
    SourceRead {
        table: String,
        #[source]
        source: StoreError,
    },

    #[error("target write failed on {table}: {source}")]
    TargetWrite {
        table: String,
        #[source]
        source: StoreError,
    },

    #[error("mapping error: {0}")]
    Mapping(#[from] MappingError),

    #[error("ledger error: {0}")]
    Ledger(#[source] LedgerError),

    #[error("scan worker failed: {0}")]
    Worker(String),
}

impl BackupError {
    /// True when the caller may retry the same call unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            BackupError::SourceRead { source, .. } | BackupError::TargetWrite { source, .. } => {
                source.is_retryable()
            }
            _ => false,
        }
    }
}

impl From<LedgerError> for BackupError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::AlreadyExists(name) => {
                BackupError::Conflict(format!("backup '{name}' already exists"))
            }
            LedgerError::NotFound(name) => BackupError::NotFound(format!("backup '{name}'")),
            other => BackupError::Ledger(other),
        }
    }
}

impl From<MergeError> for BackupError {
    fn from(e: MergeError) -> Self {
        match e {
            MergeError::IdentityMismatch { .. } | MergeError::AlreadyMerged(_) => {
                BackupError::Conflict(e.to_string())
            }
            MergeError::Terminal { .. }
            | MergeError::Transition(_)
            | MergeError::CountOverflow(_) => BackupError::InvalidState(e.to_string()),
        }
    }
}

pub type BackupResult<T> = Result<T, BackupError>;
