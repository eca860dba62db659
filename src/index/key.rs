//! Index descriptors and key encoding
//!
//! Keys are byte strings whose bytewise order is the index order.
//!
//! - A non-null value is a `0x01` marker followed by order-preserving bytes
//!   (integers big-endian with the sign bit flipped, text as UTF-8,
//!   booleans as 0/1). NULL is the empty string, so it sorts first.
//! - Compound keys cut every segment into 4-byte groups, each preceded by
//!   `segment_count - segment_index`. Groups are zero-padded, except the
//!   last group of a partial ("starting with") bound.
//! - Descending indexes store the byte complement of the whole key.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::compare::Bound;
use crate::storage::{RelationId, Row, Value};

const NON_NULL_MARKER: u8 = 0x01;
const GROUP_SIZE: usize = 4;

/// Index identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexId(pub u32);

impl fmt::Display for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Static description of an index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub id: IndexId,
    pub name: String,
    pub relation: RelationId,
    /// Field positions of the key segments, most significant first
    pub segments: Vec<usize>,
    pub descending: bool,
    /// Skip NULL entries of a single-segment index unless the scan asks for them
    pub ignore_nulls: bool,
}

impl IndexDescriptor {
    /// Ascending index over the given field positions
    pub fn new(id: IndexId, name: impl Into<String>, relation: RelationId, segments: Vec<usize>) -> Self {
        Self {
            id,
            name: name.into(),
            relation,
            segments,
            descending: false,
            ignore_nulls: false,
        }
    }

    /// Makes the index descending
    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }

    /// Makes single-segment scans skip NULL keys
    pub fn ignoring_nulls(mut self) -> Self {
        self.ignore_nulls = true;
        self
    }

    /// Number of key segments
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Key the index stores for `row`
    pub fn derive_key(&self, row: &Row) -> Vec<u8> {
        let values: Vec<Option<Value>> = self
            .segments
            .iter()
            .map(|&position| row.field(position).cloned())
            .collect();
        self.encode(&values, false)
    }

    /// Encodes a full or leading subset of segment values.
    ///
    /// With `partial`, the last value is a prefix and its final group is
    /// left unpadded.
    pub fn encode(&self, values: &[Option<Value>], partial: bool) -> Vec<u8> {
        let mut key = Vec::new();
        let count = self.segment_count();

        if count <= 1 {
            if let Some(Some(value)) = values.first() {
                encode_value(value, &mut key);
            }
        } else {
            for (index, value) in values.iter().enumerate().take(count) {
                let mut bytes = Vec::new();
                if let Some(value) = value {
                    encode_value(value, &mut bytes);
                }
                let last = index + 1 == values.len();
                let marker = (count - index) as u8;
                for group in bytes.chunks(GROUP_SIZE) {
                    key.push(marker);
                    key.extend_from_slice(group);
                    if group.len() < GROUP_SIZE && !(partial && last) {
                        key.resize(key.len() + GROUP_SIZE - group.len(), 0);
                    }
                }
            }
        }

        if self.descending {
            for byte in key.iter_mut() {
                *byte = !*byte;
            }
        }
        key
    }

    /// Encodes segment values as a scan bound
    pub fn bound(&self, values: &[Option<Value>], partial: bool) -> Bound {
        let prefix = partial || values.len() < self.segment_count();
        Bound::new(self.encode(values, partial), prefix)
    }

    /// Whether `key` is the NULL key of a single-segment index
    pub fn is_null_key(&self, key: &[u8]) -> bool {
        self.segment_count() == 1 && key.is_empty()
    }
}

fn encode_value(value: &Value, out: &mut Vec<u8>) {
    out.push(NON_NULL_MARKER);
    match value {
        Value::Int(v) => out.extend_from_slice(&((*v as u64) ^ (1 << 63)).to_be_bytes()),
        Value::Text(v) => out.extend_from_slice(v.as_bytes()),
        Value::Bool(v) => out.push(u8::from(*v)),
    }
}
