//! Row storage errors

use thiserror::Error;

use super::record::RecordId;

/// Result type for row storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by row storage
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// Row is write-locked by another transaction
    #[error("Record {record} is locked by transaction {holder}")]
    LockConflict { record: RecordId, holder: u64 },

    /// Relation is not known to the store
    #[error("Relation {0} does not exist")]
    UnknownRelation(u32),

    /// Storage could not serve the request
    #[error("Row storage unavailable: {0}")]
    Unavailable(String),
}
