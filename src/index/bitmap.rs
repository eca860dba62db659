//! Sparse record bitmaps
//!
//! Used for the visited set of an index scan and for inversion bitmaps
//! supplied by other index conditions.

use roaring::RoaringTreemap;

use crate::storage::RecordId;

/// Set of record identifiers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordBitmap {
    ids: RoaringTreemap,
}

impl RecordBitmap {
    /// Creates an empty bitmap
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `id`. Returns false if it was already present.
    pub fn insert(&mut self, id: RecordId) -> bool {
        self.ids.insert(id.0)
    }

    pub fn contains(&self, id: RecordId) -> bool {
        self.ids.contains(id.0)
    }

    /// Number of identifiers in the set
    pub fn len(&self) -> usize {
        self.ids.len() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Removes every identifier
    pub fn clear(&mut self) {
        self.ids.clear();
    }
}

impl FromIterator<RecordId> for RecordBitmap {
    fn from_iter<I: IntoIterator<Item = RecordId>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().map(|id| id.0).collect(),
        }
    }
}
