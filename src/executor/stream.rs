//! The record stream contract
//!
//! Every operator is pulled through the same lifecycle:
//!
//! ```text
//! open -> get_record* -> close
//!            |
//!            +-> refetch_record / lock_record on the current row
//! ```
//!
//! - `get_record` returns false at end of stream and keeps returning false
//! - `close` is idempotent and cascades to every child that was opened
//! - operators keep nothing mutable in themselves; per-request state lives
//!   in the request's impure area

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::branch::ConditionalStream;
use super::errors::ExecResult;
use super::explain::PlanNode;
use super::index_scan::IndexTableScan;
use super::limit::{FirstRows, SkipRows};
use super::procedure::ProcedureScan;
use super::request::Request;
use super::table_scan::FullTableScan;
use crate::storage::Row;

/// Record-pool slot of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId(pub u16);

impl StreamId {
    pub(crate) fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Impure-area slot of an operator, assigned when the plan is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateSlot(pub u16);

impl StateSlot {
    pub(crate) fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for StateSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Operations shared by every operator
pub trait RecordStream {
    /// Prepares the stream for fetching. On error the stream stays closed.
    fn open(&self, request: &mut Request) -> ExecResult<()>;

    /// Advances to the next row; false at end of stream
    fn get_record(&self, request: &mut Request) -> ExecResult<bool>;

    /// Releases everything acquired since `open`. Idempotent.
    fn close(&self, request: &mut Request);

    /// Re-reads the current row without advancing
    fn refetch_record(&self, request: &mut Request) -> ExecResult<bool>;

    /// Write-locks the current row
    fn lock_record(&self, request: &mut Request) -> ExecResult<bool>;

    /// Row most recently produced by this stream
    fn current_row<'r>(&self, request: &'r Request) -> Option<&'r Row>;

    /// Streams this operator produces (and, with `expand_all`, reads)
    fn find_used_streams(&self, streams: &mut BTreeSet<StreamId>, expand_all: bool);

    /// Whether evaluating this operator needs any of `streams`
    fn is_dependent(&self, streams: &BTreeSet<StreamId>) -> bool;

    /// Marks the output records of this subtree invalid
    fn invalidate_records(&self, request: &mut Request);

    /// Plan description of this subtree
    fn explain(&self) -> PlanNode;
}

/// Closed family of operators
pub enum StreamOperator {
    IndexScan(IndexTableScan),
    FullScan(FullTableScan),
    First(FirstRows),
    Skip(SkipRows),
    Branch(ConditionalStream),
    Procedure(ProcedureScan),
}

impl StreamOperator {
    fn inner(&self) -> &dyn RecordStream {
        match self {
            StreamOperator::IndexScan(op) => op,
            StreamOperator::FullScan(op) => op,
            StreamOperator::First(op) => op,
            StreamOperator::Skip(op) => op,
            StreamOperator::Branch(op) => op,
            StreamOperator::Procedure(op) => op,
        }
    }
}

impl RecordStream for StreamOperator {
    fn open(&self, request: &mut Request) -> ExecResult<()> {
        self.inner().open(request)
    }

    fn get_record(&self, request: &mut Request) -> ExecResult<bool> {
        request.reschedule()?;
        self.inner().get_record(request)
    }

    fn close(&self, request: &mut Request) {
        self.inner().close(request)
    }

    fn refetch_record(&self, request: &mut Request) -> ExecResult<bool> {
        self.inner().refetch_record(request)
    }

    fn lock_record(&self, request: &mut Request) -> ExecResult<bool> {
        self.inner().lock_record(request)
    }

    fn current_row<'r>(&self, request: &'r Request) -> Option<&'r Row> {
        self.inner().current_row(request)
    }

    fn find_used_streams(&self, streams: &mut BTreeSet<StreamId>, expand_all: bool) {
        self.inner().find_used_streams(streams, expand_all)
    }

    fn is_dependent(&self, streams: &BTreeSet<StreamId>) -> bool {
        self.inner().is_dependent(streams)
    }

    fn invalidate_records(&self, request: &mut Request) {
        self.inner().invalidate_records(request)
    }

    fn explain(&self) -> PlanNode {
        self.inner().explain()
    }
}
