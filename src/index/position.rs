//! Saved cursor positions

use crate::page::{EntryOffset, PageId};

/// Where a scan last stopped: page, entry offset and the page incarnation
/// at the time.
///
/// The offset is only meaningful while the page is pinned and its
/// incarnation is unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorPosition {
    pub page: PageId,
    pub offset: EntryOffset,
    pub incarnation: u64,
}

impl CursorPosition {
    /// Whether the page has been rewritten since this position was taken
    pub fn is_stale(&self, current_incarnation: u64) -> bool {
        self.incarnation != current_incarnation
    }
}
