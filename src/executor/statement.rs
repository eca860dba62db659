//! Compiled statements and the cursor that drives them
//!
//! [`PlanBuilder`] hands out stream ids and state slots while the operator
//! tree is assembled. The finished [`Statement`] is immutable and shared by
//! every request that runs it; a [`StatementCursor`] drives one request
//! through it.

use std::collections::BTreeSet;
use std::sync::Arc;

use super::branch::ConditionalStream;
use super::errors::{ExecError, ExecResult};
use super::explain::ExplainPlan;
use super::index_scan::IndexTableScan;
use super::limit::{FirstRows, SkipRows};
use super::procedure::{Procedure, ProcedureScan};
use super::request::Request;
use super::stream::{RecordStream, StateSlot, StreamId, StreamOperator};
use super::table_scan::FullTableScan;
use crate::expr::{BoolExpr, ValueExpr};
use crate::index::{IndexDescriptor, InversionSource, RangeSource};
use crate::observability::{log_event_with_fields, Event};
use crate::storage::{RelationId, Row};

/// Assembles an operator tree, numbering streams and state slots
#[derive(Debug, Default)]
pub struct PlanBuilder {
    streams: u16,
    slots: u16,
}

impl PlanBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a record stream. Allocate before building expressions
    /// that read it.
    pub fn stream(&mut self) -> StreamId {
        let id = StreamId(self.streams);
        self.streams += 1;
        id
    }

    fn slot(&mut self) -> StateSlot {
        let slot = StateSlot(self.slots);
        self.slots += 1;
        slot
    }

    pub fn index_scan(
        &mut self,
        stream: StreamId,
        index: Arc<IndexDescriptor>,
        ranges: RangeSource,
        inversion: Option<Arc<dyn InversionSource>>,
    ) -> StreamOperator {
        let slot = self.slot();
        StreamOperator::IndexScan(IndexTableScan::new(stream, slot, index, ranges, inversion))
    }

    pub fn full_scan(&mut self, stream: StreamId, relation: RelationId, name: &str) -> StreamOperator {
        let slot = self.slot();
        StreamOperator::FullScan(FullTableScan::new(stream, slot, relation, name))
    }

    /// FIRST `count` rows of `child`
    pub fn first(&mut self, child: StreamOperator, count: Arc<dyn ValueExpr>) -> StreamOperator {
        let slot = self.slot();
        StreamOperator::First(FirstRows::new(slot, child, count))
    }

    /// SKIP `count` rows of `child`
    pub fn skip(&mut self, child: StreamOperator, count: Arc<dyn ValueExpr>) -> StreamOperator {
        let slot = self.slot();
        StreamOperator::Skip(SkipRows::new(slot, child, count))
    }

    pub fn branch(
        &mut self,
        condition: Arc<dyn BoolExpr>,
        when_true: StreamOperator,
        when_false: StreamOperator,
    ) -> StreamOperator {
        let slot = self.slot();
        StreamOperator::Branch(ConditionalStream::new(slot, condition, when_true, when_false))
    }

    pub fn procedure(
        &mut self,
        stream: StreamId,
        procedure: Arc<Procedure>,
        inputs: Vec<Arc<dyn ValueExpr>>,
    ) -> StreamOperator {
        let slot = self.slot();
        StreamOperator::Procedure(ProcedureScan::new(stream, slot, procedure, inputs))
    }

    pub fn build(self, root: StreamOperator) -> Statement {
        Statement {
            root,
            streams: self.streams as usize,
            slots: self.slots as usize,
        }
    }
}

/// Immutable operator tree plus the sizes a request needs to run it
pub struct Statement {
    root: StreamOperator,
    streams: usize,
    slots: usize,
}

impl Statement {
    pub fn root(&self) -> &StreamOperator {
        &self.root
    }

    pub fn stream_count(&self) -> usize {
        self.streams
    }

    pub fn slot_count(&self) -> usize {
        self.slots
    }

    /// Streams produced anywhere in the tree
    pub fn used_streams(&self) -> BTreeSet<StreamId> {
        let mut streams = BTreeSet::new();
        self.root.find_used_streams(&mut streams, true);
        streams
    }

    pub fn explain(&self) -> ExplainPlan {
        ExplainPlan::new(self.root.explain(), self.streams)
    }
}

/// One request running one statement
pub struct StatementCursor<'s> {
    statement: &'s Statement,
    request: Request,
    open: bool,
}

impl<'s> StatementCursor<'s> {
    /// Opens the statement's root in `request`
    pub fn open(statement: &'s Statement, mut request: Request) -> ExecResult<Self> {
        if request.slot_count() < statement.slot_count() || request.stream_count() < statement.stream_count() {
            return Err(ExecError::execution_failed(
                "Request was not created for this statement",
            ));
        }

        let request_id = request.id().to_string();
        if let Err(err) = statement.root().open(&mut request) {
            statement.root().close(&mut request);
            log_event_with_fields(
                Event::CursorUnwound,
                &[("request_id", request_id.as_str()), ("error", err.code().code())],
            );
            return Err(err);
        }
        log_event_with_fields(Event::CursorOpen, &[("request_id", request_id.as_str())]);

        Ok(Self {
            statement,
            request,
            open: true,
        })
    }

    /// Next row, or `None` at end of stream
    pub fn fetch(&mut self) -> ExecResult<Option<Row>> {
        if !self.open {
            return Ok(None);
        }

        let root = self.statement.root();
        match root.get_record(&mut self.request) {
            Ok(true) => {
                self.request.env().metrics().increment_rows_produced();
                Ok(root.current_row(&self.request).cloned())
            }
            Ok(false) => Ok(None),
            Err(err) => {
                self.unwind(&err);
                Err(err)
            }
        }
    }

    /// Re-reads the current row
    pub fn refetch(&mut self) -> ExecResult<bool> {
        if !self.open {
            return Ok(false);
        }
        let result = self.statement.root().refetch_record(&mut self.request);
        if let Err(err) = &result {
            self.unwind(err);
        }
        result
    }

    /// Locks the current row for the request's transaction
    pub fn lock(&mut self) -> ExecResult<bool> {
        if !self.open {
            return Ok(false);
        }
        let result = self.statement.root().lock_record(&mut self.request);
        if let Err(err) = &result {
            self.unwind(err);
        }
        result
    }

    /// Row most recently fetched
    pub fn current_row(&self) -> Option<&Row> {
        if !self.open {
            return None;
        }
        self.statement.root().current_row(&self.request)
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Closes the tree. Idempotent.
    pub fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        self.statement.root().close(&mut self.request);
        log_event_with_fields(
            Event::CursorClose,
            &[("request_id", self.request.id().to_string().as_str())],
        );
    }

    fn unwind(&mut self, err: &ExecError) {
        self.open = false;
        self.statement.root().close(&mut self.request);
        log_event_with_fields(
            Event::CursorUnwound,
            &[
                ("request_id", self.request.id().to_string().as_str()),
                ("error", err.code().code()),
            ],
        );
    }
}

impl Drop for StatementCursor<'_> {
    fn drop(&mut self) {
        self.close();
    }
}
