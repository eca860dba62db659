//! Retrieval ranges
//!
//! A compiled index retrieval is a list of disjoint key ranges
//! ([`KeyRange`], bound expressions in value order) or an externally
//! chained source ([`RangeChain`]). At the first fetch of a scan the source
//! is opened into a [`RangeFeed`] of evaluated ranges, and a
//! [`RangeIterator`] turns those into encoded [`ScanRange`]s in scan order,
//! dropping the ones that cannot match.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use super::bitmap::RecordBitmap;
use super::compare::Bound;
use super::key::IndexDescriptor;
use crate::executor::{ExecResult, Request, StreamId};
use crate::expr::ValueExpr;
use crate::storage::{RecordId, Value};

/// Compiled bound: one expression per leading key segment
#[derive(Clone)]
pub struct BoundSpec {
    pub values: Vec<Arc<dyn ValueExpr>>,
    /// The last value is a "starting with" prefix
    pub partial: bool,
}

impl BoundSpec {
    /// Bound over whole segment values
    pub fn new(values: Vec<Arc<dyn ValueExpr>>) -> Self {
        Self {
            values,
            partial: false,
        }
    }

    /// Bound whose last value is a prefix
    pub fn partial(values: Vec<Arc<dyn ValueExpr>>) -> Self {
        Self {
            values,
            partial: true,
        }
    }

    fn evaluate(&self, request: &Request) -> ExecResult<BoundValues> {
        let values = self
            .values
            .iter()
            .map(|expr| expr.evaluate(request))
            .collect::<ExecResult<Vec<_>>>()?;
        Ok(BoundValues {
            values,
            partial: self.partial,
        })
    }

    fn describe(&self) -> String {
        let parts: Vec<String> = self.values.iter().map(|v| v.describe()).collect();
        let suffix = if self.partial { "*" } else { "" };
        format!("({}){}", parts.join(", "), suffix)
    }
}

/// Compiled key range, bounds in value order (lower holds the smaller value)
#[derive(Clone)]
pub struct KeyRange {
    pub lower: Option<BoundSpec>,
    pub upper: Option<BoundSpec>,
    /// The range is an IS NULL lookup, so NULL bound values are meaningful
    pub match_nulls: bool,
}

impl KeyRange {
    /// Every entry of the index
    pub fn unbounded() -> Self {
        Self {
            lower: None,
            upper: None,
            match_nulls: false,
        }
    }

    /// Entries whose leading segments equal `values`
    pub fn equal(values: Vec<Arc<dyn ValueExpr>>) -> Self {
        Self {
            lower: Some(BoundSpec::new(values.clone())),
            upper: Some(BoundSpec::new(values)),
            match_nulls: false,
        }
    }

    /// Entries between two bounds, both inclusive
    pub fn between(lower: BoundSpec, upper: BoundSpec) -> Self {
        Self {
            lower: Some(lower),
            upper: Some(upper),
            match_nulls: false,
        }
    }

    /// Entries at or above `lower`
    pub fn at_least(lower: BoundSpec) -> Self {
        Self {
            lower: Some(lower),
            upper: None,
            match_nulls: false,
        }
    }

    /// Entries at or below `upper`
    pub fn at_most(upper: BoundSpec) -> Self {
        Self {
            lower: None,
            upper: Some(upper),
            match_nulls: false,
        }
    }

    /// Entries whose first segment starts with `prefix`
    pub fn starting_with(prefix: Arc<dyn ValueExpr>) -> Self {
        Self {
            lower: Some(BoundSpec::partial(vec![prefix.clone()])),
            upper: Some(BoundSpec::partial(vec![prefix])),
            match_nulls: false,
        }
    }

    /// Entries whose first segment is NULL
    pub fn is_null(null: Arc<dyn ValueExpr>) -> Self {
        Self {
            lower: Some(BoundSpec::new(vec![null.clone()])),
            upper: Some(BoundSpec::new(vec![null])),
            match_nulls: true,
        }
    }

    fn evaluate(&self, request: &Request) -> ExecResult<ValueRange> {
        Ok(ValueRange {
            lower: self.lower.as_ref().map(|b| b.evaluate(request)).transpose()?,
            upper: self.upper.as_ref().map(|b| b.evaluate(request)).transpose()?,
            match_nulls: self.match_nulls,
        })
    }

    fn describe(&self) -> String {
        let side = |bound: &Option<BoundSpec>| bound.as_ref().map(|b| b.describe()).unwrap_or_else(|| "-".to_string());
        format!("[{} .. {}]", side(&self.lower), side(&self.upper))
    }

    fn collect_streams(&self, streams: &mut BTreeSet<StreamId>) {
        for bound in self.lower.iter().chain(self.upper.iter()) {
            for value in &bound.values {
                value.collect_streams(streams);
            }
        }
    }
}

/// Evaluated bound values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundValues {
    pub values: Vec<Option<Value>>,
    pub partial: bool,
}

impl BoundValues {
    fn has_null(&self) -> bool {
        self.values.iter().any(|v| v.is_none())
    }
}

/// Evaluated range, bounds in value order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueRange {
    pub lower: Option<BoundValues>,
    pub upper: Option<BoundValues>,
    pub match_nulls: bool,
}

/// Per-scan supply of evaluated ranges, pulled one at a time
pub trait RangeFeed: Send {
    /// Next range, or `None` when the retrieval is exhausted
    fn next_range(&mut self) -> ExecResult<Option<ValueRange>>;
}

/// Externally supplied range chain (e.g. a recursive CTE feeding keys)
pub trait RangeChain: Send + Sync {
    /// Starts a feed for one scan cycle
    fn start(&self, request: &Request) -> ExecResult<Box<dyn RangeFeed>>;

    /// Plan description
    fn describe(&self) -> String;
}

struct StaticFeed(VecDeque<ValueRange>);

impl RangeFeed for StaticFeed {
    fn next_range(&mut self) -> ExecResult<Option<ValueRange>> {
        Ok(self.0.pop_front())
    }
}

/// Where an index scan's ranges come from
#[derive(Clone)]
pub enum RangeSource {
    /// Compiled list of disjoint ranges in scan order
    Static(Vec<KeyRange>),
    /// Ranges produced while the scan runs
    External(Arc<dyn RangeChain>),
}

impl RangeSource {
    /// Evaluates the source for one scan cycle
    pub fn open(&self, request: &Request) -> ExecResult<Box<dyn RangeFeed>> {
        match self {
            RangeSource::Static(ranges) => {
                let evaluated = ranges
                    .iter()
                    .map(|range| range.evaluate(request))
                    .collect::<ExecResult<VecDeque<_>>>()?;
                Ok(Box::new(StaticFeed(evaluated)))
            }
            RangeSource::External(chain) => chain.start(request),
        }
    }

    /// Plan description
    pub fn describe(&self) -> String {
        match self {
            RangeSource::Static(ranges) => {
                let parts: Vec<String> = ranges.iter().map(|r| r.describe()).collect();
                parts.join(" OR ")
            }
            RangeSource::External(chain) => chain.describe(),
        }
    }

    /// Streams referenced by bound expressions
    pub fn collect_streams(&self, streams: &mut BTreeSet<StreamId>) {
        if let RangeSource::Static(ranges) = self {
            for range in ranges {
                range.collect_streams(streams);
            }
        }
    }
}

/// Encoded range in scan order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRange {
    pub lower: Option<Bound>,
    pub upper: Option<Bound>,
    pub match_nulls: bool,
}

/// Pulls evaluated ranges and encodes them against one index
pub struct RangeIterator {
    feed: Box<dyn RangeFeed>,
    index: Arc<IndexDescriptor>,
}

impl RangeIterator {
    /// Wraps a feed for `index`
    pub fn new(feed: Box<dyn RangeFeed>, index: Arc<IndexDescriptor>) -> Self {
        Self { feed, index }
    }

    /// Next range that can match anything, in scan order
    pub fn next_range(&mut self) -> ExecResult<Option<ScanRange>> {
        while let Some(range) = self.feed.next_range()? {
            if let Some(scan) = self.encode(range) {
                return Ok(Some(scan));
            }
        }
        Ok(None)
    }

    fn encode(&self, range: ValueRange) -> Option<ScanRange> {
        let bounds = [&range.lower, &range.upper];
        if !range.match_nulls && bounds.iter().any(|b| b.as_ref().map(|b| b.has_null()).unwrap_or(false)) {
            return None;
        }

        let encode = |bound: Option<BoundValues>| bound.map(|b| self.index.bound(&b.values, b.partial));
        let (lower, upper) = if self.index.descending {
            (encode(range.upper), encode(range.lower))
        } else {
            (encode(range.lower), encode(range.upper))
        };

        if let (Some(lower), Some(upper)) = (&lower, &upper) {
            if upper.exceeds_upper(lower.key(), self.index.descending) {
                return None;
            }
        }

        Some(ScanRange {
            lower,
            upper,
            match_nulls: range.match_nulls,
        })
    }
}

/// Bitmap of records satisfying other index conditions
pub trait InversionSource: Send + Sync {
    /// Evaluates the bitmap for one scan cycle
    fn evaluate(&self, request: &Request) -> ExecResult<RecordBitmap>;

    /// Plan description
    fn describe(&self) -> String;
}

/// Inversion over a fixed list of records
#[derive(Debug, Clone)]
pub struct RecordListInversion {
    records: Vec<RecordId>,
}

impl RecordListInversion {
    /// Creates an inversion over `records`
    pub fn new(records: Vec<RecordId>) -> Self {
        Self { records }
    }
}

impl InversionSource for RecordListInversion {
    fn evaluate(&self, _request: &Request) -> ExecResult<RecordBitmap> {
        Ok(self.records.iter().copied().collect())
    }

    fn describe(&self) -> String {
        format!("record list ({} records)", self.records.len())
    }
}
