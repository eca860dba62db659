//! Page decoding errors

use thiserror::Error;

use super::PageId;

/// Result type for page operations
pub type PageResult<T> = Result<T, PageError>;

/// Errors raised while fetching or decoding index pages
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PageError {
    /// Page is not present in the cache
    #[error("Page {0} not found")]
    NotFound(PageId),

    /// Stored CRC32 does not match the page contents
    #[error("Page {0} failed checksum validation")]
    ChecksumMismatch(PageId),

    /// Page or entry extends past the end of the buffer
    #[error("Page {page} truncated at offset {offset}")]
    Truncated { page: PageId, offset: usize },

    /// Page type byte is neither leaf nor interior
    #[error("Page {page} has unknown type {kind}")]
    UnknownType { page: PageId, kind: u8 },

    /// Entry is structurally invalid
    #[error("Page {page} entry at offset {offset}: {reason}")]
    BadEntry {
        page: PageId,
        offset: usize,
        reason: &'static str,
    },
}
