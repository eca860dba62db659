//! Key and bound comparison
//!
//! Stored keys are compared bytewise. When one key is a prefix of the
//! other, ascending indexes order the shorter key first and descending
//! indexes the longer one (the complement of a prefix is still a prefix).
//!
//! A bound is a *prefix bound* when it names fewer segments than the index
//! has, or when its last segment is a "starting with" value. Candidates are
//! compared against a prefix bound on the bound's length only.
//!
//! Bounds are always expressed in scan order: on a descending index the
//! lower bound holds the largest value.

use std::cmp::Ordering;

/// Compares two stored keys in index order
pub fn compare_keys(a: &[u8], b: &[u8], descending: bool) -> Ordering {
    let common = a.len().min(b.len());
    match a[..common].cmp(&b[..common]) {
        Ordering::Equal if descending => b.len().cmp(&a.len()),
        Ordering::Equal => a.len().cmp(&b.len()),
        other => other,
    }
}

/// A lower or upper scan bound
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bound {
    key: Vec<u8>,
    prefix: bool,
}

impl Bound {
    /// Creates a bound over an encoded key
    pub fn new(key: Vec<u8>, prefix: bool) -> Self {
        Self { key, prefix }
    }

    /// Encoded bound key
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Whether only the bound's length takes part in comparisons
    pub fn is_prefix(&self) -> bool {
        self.prefix
    }

    /// Orders `candidate` relative to this bound
    pub fn compare(&self, candidate: &[u8], descending: bool) -> Ordering {
        let candidate = if self.prefix && candidate.len() > self.key.len() {
            &candidate[..self.key.len()]
        } else {
            candidate
        };
        compare_keys(candidate, &self.key, descending)
    }

    /// Whether `candidate` is at or after this lower bound
    pub fn admits_lower(&self, candidate: &[u8], descending: bool) -> bool {
        self.compare(candidate, descending) != Ordering::Less
    }

    /// Whether `candidate` is past this upper bound
    pub fn exceeds_upper(&self, candidate: &[u8], descending: bool) -> bool {
        self.compare(candidate, descending) == Ordering::Greater
    }
}
