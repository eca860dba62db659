//! Index keys, bounds and scan bookkeeping
//!
//! Everything an index scan needs besides the pages themselves:
//!
//! - Key encoding and index descriptors
//! - Key and bound comparison
//! - Saved cursor positions
//! - Record bitmaps (visited set, inversion)
//! - The catalog status check done at first fetch
//! - Retrieval ranges and their evaluation
//!
//! # Ordering
//!
//! Entries are ordered by (key, record id). Keys compare bytewise with the
//! prefix rule of [`compare_keys`]; record ids ascend in both directions.

mod bitmap;
mod catalog;
mod compare;
mod key;
mod position;
mod range;

pub use bitmap::RecordBitmap;
pub use catalog::{IndexCatalog, IndexStatus, MemoryCatalog};
pub use compare::{compare_keys, Bound};
pub use key::{IndexDescriptor, IndexId};
pub use position::CursorPosition;
pub use range::{
    BoundSpec, BoundValues, InversionSource, KeyRange, RangeChain, RangeFeed, RangeIterator,
    RangeSource, RecordListInversion, ScanRange, ValueRange,
};

use std::cmp::Ordering;

use crate::storage::RecordId;

/// Orders two index entries: key first, then record id
pub fn compare_entries(
    a_key: &[u8],
    a_record: RecordId,
    b_key: &[u8],
    b_record: RecordId,
    descending: bool,
) -> Ordering {
    compare_keys(a_key, b_key, descending).then(a_record.cmp(&b_record))
}
