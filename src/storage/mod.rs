//! Row storage for the execution layer
//!
//! Row storage is a collaborator: the executor reads rows by record
//! identifier, walks a relation in storage order, and write-locks rows on
//! behalf of a transaction. [`MemoryRowStore`] implements [`RowStorage`] in
//! memory.
//!
//! # Design Principles
//!
//! - Rows are copied out; nothing returned borrows the store
//! - Storage order and index order are unrelated
//! - A lock conflict is the only retryable storage error

mod errors;
mod record;
mod store;

pub use errors::{StorageError, StorageResult};
pub use record::{Record, RecordId, RelationId, Row, Value};
pub use store::{MemoryRowStore, RowStorage};
