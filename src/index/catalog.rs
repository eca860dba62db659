//! Index catalog
//!
//! The catalog tells a scan, at its first fetch, whether the index the
//! plan was compiled against can still be used and where its root is.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::key::IndexId;
use crate::page::PageId;

/// Current state of an index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStatus {
    /// Usable, rooted at `root`
    Active { root: PageId },
    /// Exists but is being rebuilt or was deactivated
    Inactive,
    /// Dropped or never existed
    Unknown,
}

/// Catalog lookups performed by index scans
pub trait IndexCatalog: Send + Sync {
    /// Current status of `index`
    fn status(&self, index: IndexId) -> IndexStatus;
}

/// In-memory catalog
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    entries: RwLock<HashMap<IndexId, IndexStatus>>,
}

impl MemoryCatalog {
    /// Creates an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<IndexId, IndexStatus>> {
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<IndexId, IndexStatus>> {
        self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers an active index
    pub fn register(&self, index: IndexId, root: PageId) {
        self.write().insert(index, IndexStatus::Active { root });
    }

    /// Marks an index inactive
    pub fn deactivate(&self, index: IndexId) {
        if let Some(status) = self.write().get_mut(&index) {
            *status = IndexStatus::Inactive;
        }
    }

    /// Forgets an index
    pub fn drop_index(&self, index: IndexId) {
        self.write().remove(&index);
    }
}

impl IndexCatalog for MemoryCatalog {
    fn status(&self, index: IndexId) -> IndexStatus {
        self.read().get(&index).copied().unwrap_or(IndexStatus::Unknown)
    }
}
