//! Error types for the backup ledger.

use thiserror::Error;

/// Result type alias for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("unsupported ledger format {found} (supported: {supported})")]
    IncompatibleFormat { found: String, supported: String },

    #[error("backup already exists: {0}")]
    AlreadyExists(String),

    #[error("backup not found: {0}")]
    NotFound(String),
}
