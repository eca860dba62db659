//! Index page layout and entry decoding
//!
//! ```text
//! +------------------+
//! | Page Type        | (u8: 1 = leaf, 2 = interior)
//! +------------------+
//! | Level            | (u8: 0 for leaves)
//! +------------------+
//! | Sibling          | (u32 LE, 0 = end of level)
//! +------------------+
//! | Entry Count      | (u16 LE)
//! +------------------+
//! | Checksum         | (u32 LE)
//! +------------------+
//! | Entries          |
//! +------------------+
//! ```
//!
//! Each entry stores only the part of its key that differs from the previous
//! entry on the same page:
//!
//! ```text
//! prefix (u16 LE) | suffix length (u16 LE) | suffix | record id (u64 LE) [| child (u32 LE)]
//! ```
//!
//! The child page is present on interior pages only. The first entry of a
//! page always has prefix 0.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::checksum::compute_page_checksum;
use super::errors::{PageError, PageResult};
use crate::storage::RecordId;

/// Size of the fixed page header in bytes
pub const PAGE_HEADER_SIZE: usize = 12;

const OFFSET_SIBLING: usize = 2;
const OFFSET_COUNT: usize = 6;
const CHECKSUM_RANGE: std::ops::Range<usize> = 8..12;

const KIND_LEAF: u8 = 1;
const KIND_INTERIOR: u8 = 2;

/// Page identifier. Zero never names a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageId(pub u32);

impl PageId {
    fn from_raw(raw: u32) -> Option<Self> {
        if raw == 0 {
            None
        } else {
            Some(PageId(raw))
        }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Leaf or interior page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    /// Bottom level, entries point at records
    Leaf,
    /// Upper levels, entries point at child pages
    Interior,
}

/// Byte offset of an entry inside a page.
///
/// Only the page module creates offsets; everyone else stores and returns them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryOffset(usize);

impl EntryOffset {
    /// Offset of the entry following one that consumed `consumed` bytes
    pub fn advance(self, consumed: usize) -> Self {
        EntryOffset(self.0 + consumed)
    }

    /// Raw value, for logs and plan output
    pub fn get(&self) -> usize {
        self.0
    }
}

/// Fixed-size part of a decoded entry. The key lives in the caller's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedEntry {
    pub record_id: RecordId,
    pub child: Option<PageId>,
}

/// A fully materialized entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageEntry {
    pub key: Vec<u8>,
    pub record_id: RecordId,
    pub child: Option<PageId>,
}

/// An owned, validated index page
#[derive(Debug, Clone)]
pub struct IndexPage {
    id: PageId,
    kind: PageKind,
    level: u8,
    sibling: Option<PageId>,
    count: u16,
    data: Vec<u8>,
}

fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&data[offset..offset + 4]);
    u32::from_le_bytes(buf)
}

fn read_u64(data: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&data[offset..offset + 8]);
    u64::from_le_bytes(buf)
}

impl IndexPage {
    /// Validates a raw page image.
    ///
    /// Header fields are range-checked; entries are checked lazily as they
    /// are decoded.
    pub fn parse(id: PageId, data: Vec<u8>, verify_checksum: bool) -> PageResult<Self> {
        if data.len() < PAGE_HEADER_SIZE {
            return Err(PageError::Truncated {
                page: id,
                offset: data.len(),
            });
        }

        let kind = match data[0] {
            KIND_LEAF => PageKind::Leaf,
            KIND_INTERIOR => PageKind::Interior,
            other => return Err(PageError::UnknownType { page: id, kind: other }),
        };
        let level = data[1];
        if (kind == PageKind::Leaf) != (level == 0) {
            return Err(PageError::BadEntry {
                page: id,
                offset: 1,
                reason: "level does not match page type",
            });
        }

        if verify_checksum {
            let stored = read_u32(&data, CHECKSUM_RANGE.start);
            if compute_page_checksum(&data, CHECKSUM_RANGE) != stored {
                return Err(PageError::ChecksumMismatch(id));
            }
        }

        Ok(Self {
            id,
            kind,
            level,
            sibling: PageId::from_raw(read_u32(&data, OFFSET_SIBLING)),
            count: read_u16(&data, OFFSET_COUNT),
            data,
        })
    }

    /// Returns the page identifier
    pub fn id(&self) -> PageId {
        self.id
    }

    /// Returns the page type
    pub fn kind(&self) -> PageKind {
        self.kind
    }

    /// Returns true for bottom-level pages
    pub fn is_leaf(&self) -> bool {
        self.kind == PageKind::Leaf
    }

    /// Returns the tree level (0 for leaves)
    pub fn level(&self) -> u8 {
        self.level
    }

    /// Returns the right sibling, if any
    pub fn sibling(&self) -> Option<PageId> {
        self.sibling
    }

    /// Returns the number of entries on the page
    pub fn entry_count(&self) -> usize {
        self.count as usize
    }

    /// Offset of the first entry
    pub fn first_offset(&self) -> EntryOffset {
        EntryOffset(PAGE_HEADER_SIZE)
    }

    /// Decodes the entry at `offset`.
    ///
    /// `key` must hold the full key of the previous entry (or anything, for
    /// the first entry of the page); on return it holds this entry's key.
    /// Returns `None` at the end of the page, otherwise the entry and the
    /// number of bytes it occupies.
    pub fn decode_entry(
        &self,
        offset: EntryOffset,
        key: &mut Vec<u8>,
    ) -> PageResult<Option<(DecodedEntry, usize)>> {
        let start = offset.0;
        if start == self.data.len() {
            return Ok(None);
        }
        if start < PAGE_HEADER_SIZE || start > self.data.len() {
            return Err(PageError::BadEntry {
                page: self.id,
                offset: start,
                reason: "offset outside entry area",
            });
        }

        let truncated = || PageError::Truncated {
            page: self.id,
            offset: start,
        };

        let mut pos = start;
        if pos + 4 > self.data.len() {
            return Err(truncated());
        }
        let prefix = read_u16(&self.data, pos) as usize;
        let suffix_len = read_u16(&self.data, pos + 2) as usize;
        pos += 4;

        if start == PAGE_HEADER_SIZE && prefix != 0 {
            return Err(PageError::BadEntry {
                page: self.id,
                offset: start,
                reason: "first entry of page is prefix-compressed",
            });
        }
        if prefix > key.len() {
            return Err(PageError::BadEntry {
                page: self.id,
                offset: start,
                reason: "prefix longer than previous key",
            });
        }
        if pos + suffix_len + 8 > self.data.len() {
            return Err(truncated());
        }

        key.truncate(prefix);
        key.extend_from_slice(&self.data[pos..pos + suffix_len]);
        pos += suffix_len;

        let record_id = RecordId(read_u64(&self.data, pos));
        pos += 8;

        let child = match self.kind {
            PageKind::Leaf => None,
            PageKind::Interior => {
                if pos + 4 > self.data.len() {
                    return Err(truncated());
                }
                let child = PageId::from_raw(read_u32(&self.data, pos)).ok_or(
                    PageError::BadEntry {
                        page: self.id,
                        offset: start,
                        reason: "interior entry without child page",
                    },
                )?;
                pos += 4;
                Some(child)
            }
        };

        Ok(Some((DecodedEntry { record_id, child }, pos - start)))
    }

    /// Decodes every entry on the page
    pub fn entries(&self) -> PageResult<Vec<PageEntry>> {
        let mut entries = Vec::with_capacity(self.entry_count());
        let mut key = Vec::new();
        let mut offset = self.first_offset();

        while let Some((entry, consumed)) = self.decode_entry(offset, &mut key)? {
            entries.push(PageEntry {
                key: key.clone(),
                record_id: entry.record_id,
                child: entry.child,
            });
            offset = offset.advance(consumed);
        }

        if entries.len() != self.entry_count() {
            return Err(PageError::BadEntry {
                page: self.id,
                offset: offset.0,
                reason: "entry count does not match header",
            });
        }
        Ok(entries)
    }
}

/// Encodes a page from entries already in index order
pub struct IndexPageBuilder {
    id: PageId,
    kind: PageKind,
    level: u8,
    sibling: Option<PageId>,
    count: u16,
    prev_key: Vec<u8>,
    data: Vec<u8>,
}

impl IndexPageBuilder {
    /// Starts a leaf page
    pub fn leaf(id: PageId) -> Self {
        Self::new(id, PageKind::Leaf, 0)
    }

    /// Starts an interior page at `level` (1 = directly above the leaves)
    pub fn interior(id: PageId, level: u8) -> Self {
        Self::new(id, PageKind::Interior, level.max(1))
    }

    fn new(id: PageId, kind: PageKind, level: u8) -> Self {
        Self {
            id,
            kind,
            level,
            sibling: None,
            count: 0,
            prev_key: Vec::new(),
            data: vec![0u8; PAGE_HEADER_SIZE],
        }
    }

    /// Sets the right sibling
    pub fn sibling(mut self, sibling: Option<PageId>) -> Self {
        self.sibling = sibling;
        self
    }

    /// Appends an entry. `child` is required on interior pages and ignored on leaves.
    pub fn push(&mut self, key: &[u8], record_id: RecordId, child: Option<PageId>) -> PageResult<()> {
        let offset = self.data.len();
        let too_long = PageError::BadEntry {
            page: self.id,
            offset,
            reason: "key longer than 65535 bytes",
        };

        let prefix = self
            .prev_key
            .iter()
            .zip(key.iter())
            .take_while(|(a, b)| a == b)
            .count();
        let prefix_u16 = u16::try_from(prefix).map_err(|_| too_long.clone())?;
        let suffix_u16 = u16::try_from(key.len() - prefix).map_err(|_| too_long)?;
        self.count = self.count.checked_add(1).ok_or(PageError::BadEntry {
            page: self.id,
            offset,
            reason: "too many entries",
        })?;

        self.data.extend_from_slice(&prefix_u16.to_le_bytes());
        self.data.extend_from_slice(&suffix_u16.to_le_bytes());
        self.data.extend_from_slice(&key[prefix..]);
        self.data.extend_from_slice(&record_id.0.to_le_bytes());

        if self.kind == PageKind::Interior {
            let child = child.ok_or(PageError::BadEntry {
                page: self.id,
                offset,
                reason: "interior entry without child page",
            })?;
            self.data.extend_from_slice(&child.0.to_le_bytes());
        }

        self.prev_key.clear();
        self.prev_key.extend_from_slice(key);
        Ok(())
    }

    /// Writes the header and checksum and returns the page image
    pub fn finish(mut self) -> Vec<u8> {
        self.data[0] = match self.kind {
            PageKind::Leaf => KIND_LEAF,
            PageKind::Interior => KIND_INTERIOR,
        };
        self.data[1] = self.level;
        let sibling = self.sibling.map(|p| p.0).unwrap_or(0);
        self.data[OFFSET_SIBLING..OFFSET_SIBLING + 4].copy_from_slice(&sibling.to_le_bytes());
        self.data[OFFSET_COUNT..OFFSET_COUNT + 2].copy_from_slice(&self.count.to_le_bytes());

        let checksum = compute_page_checksum(&self.data, CHECKSUM_RANGE);
        self.data[CHECKSUM_RANGE].copy_from_slice(&checksum.to_le_bytes());
        self.data
    }
}
