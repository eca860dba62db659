//! FIRST / SKIP row limits
//!
//! Both wrap one child and evaluate their count once, at open. A NULL count
//! is zero; a negative count fails before the child is opened.

use std::collections::BTreeSet;
use std::sync::Arc;

use super::errors::{ExecError, ExecResult};
use super::explain::PlanNode;
use super::request::Request;
use super::stream::{RecordStream, StateSlot, StreamId, StreamOperator};
use crate::expr::ValueExpr;
use crate::storage::{Row, Value};

#[derive(Debug, Default)]
struct LimitState {
    open: bool,
    remaining: i64,
}

fn evaluate_count(expr: &dyn ValueExpr, request: &Request) -> ExecResult<i64> {
    match expr.evaluate(request)? {
        None => Ok(0),
        Some(Value::Int(v)) => Ok(v),
        Some(other) => Err(ExecError::evaluation_failed(format!(
            "Row count must be an integer, got {}",
            other.type_name()
        ))),
    }
}

fn depends_on(expr: &dyn ValueExpr, streams: &BTreeSet<StreamId>) -> bool {
    let mut used = BTreeSet::new();
    expr.collect_streams(&mut used);
    used.iter().any(|s| streams.contains(s))
}

/// Returns at most N rows of its child
pub struct FirstRows {
    slot: StateSlot,
    child: Box<StreamOperator>,
    count: Arc<dyn ValueExpr>,
}

impl FirstRows {
    pub(crate) fn new(slot: StateSlot, child: StreamOperator, count: Arc<dyn ValueExpr>) -> Self {
        Self {
            slot,
            child: Box::new(child),
            count,
        }
    }
}

impl RecordStream for FirstRows {
    fn open(&self, request: &mut Request) -> ExecResult<()> {
        self.close(request);

        let value = evaluate_count(self.count.as_ref(), request)?;
        if value < 0 {
            return Err(ExecError::bad_first(value));
        }

        // FIRST 0: the child is never opened
        if value > 0 {
            self.child.open(request)?;
            let state = request.state_mut::<LimitState>(self.slot)?;
            state.open = true;
            state.remaining = value;
        }
        Ok(())
    }

    fn get_record(&self, request: &mut Request) -> ExecResult<bool> {
        let state = request.state_mut::<LimitState>(self.slot)?;
        if !state.open {
            return Ok(false);
        }
        if state.remaining <= 0 {
            self.invalidate_records(request);
            return Ok(false);
        }
        state.remaining -= 1;

        self.child.get_record(request)
    }

    fn close(&self, request: &mut Request) {
        let was_open = match request.state_mut::<LimitState>(self.slot) {
            Ok(state) => std::mem::replace(&mut state.open, false),
            Err(_) => false,
        };
        if was_open {
            self.child.close(request);
        }
    }

    fn refetch_record(&self, request: &mut Request) -> ExecResult<bool> {
        self.child.refetch_record(request)
    }

    fn lock_record(&self, request: &mut Request) -> ExecResult<bool> {
        self.child.lock_record(request)
    }

    fn current_row<'r>(&self, request: &'r Request) -> Option<&'r Row> {
        self.child.current_row(request)
    }

    fn find_used_streams(&self, streams: &mut BTreeSet<StreamId>, expand_all: bool) {
        self.child.find_used_streams(streams, expand_all);
    }

    fn is_dependent(&self, streams: &BTreeSet<StreamId>) -> bool {
        depends_on(self.count.as_ref(), streams) || self.child.is_dependent(streams)
    }

    fn invalidate_records(&self, request: &mut Request) {
        self.child.invalidate_records(request);
    }

    fn explain(&self) -> PlanNode {
        PlanNode::new("First N Records")
            .with_attribute("count", self.count.describe())
            .with_child(self.child.explain())
    }
}

/// Discards the first N rows of its child
pub struct SkipRows {
    slot: StateSlot,
    child: Box<StreamOperator>,
    count: Arc<dyn ValueExpr>,
}

impl SkipRows {
    pub(crate) fn new(slot: StateSlot, child: StreamOperator, count: Arc<dyn ValueExpr>) -> Self {
        Self {
            slot,
            child: Box::new(child),
            count,
        }
    }
}

impl RecordStream for SkipRows {
    fn open(&self, request: &mut Request) -> ExecResult<()> {
        self.close(request);

        let value = evaluate_count(self.count.as_ref(), request)?;
        if value < 0 {
            return Err(ExecError::bad_skip(value));
        }

        self.child.open(request)?;
        let state = request.state_mut::<LimitState>(self.slot)?;
        state.open = true;
        state.remaining = value.saturating_add(1);
        Ok(())
    }

    fn get_record(&self, request: &mut Request) -> ExecResult<bool> {
        loop {
            let state = request.state_mut::<LimitState>(self.slot)?;
            if !state.open {
                return Ok(false);
            }
            if state.remaining <= 1 {
                state.remaining = 0;
                return self.child.get_record(request);
            }
            state.remaining -= 1;

            if !self.child.get_record(request)? {
                return Ok(false);
            }
        }
    }

    fn close(&self, request: &mut Request) {
        let was_open = match request.state_mut::<LimitState>(self.slot) {
            Ok(state) => std::mem::replace(&mut state.open, false),
            Err(_) => false,
        };
        if was_open {
            self.child.close(request);
        }
    }

    fn refetch_record(&self, request: &mut Request) -> ExecResult<bool> {
        self.child.refetch_record(request)
    }

    fn lock_record(&self, request: &mut Request) -> ExecResult<bool> {
        self.child.lock_record(request)
    }

    fn current_row<'r>(&self, request: &'r Request) -> Option<&'r Row> {
        self.child.current_row(request)
    }

    fn find_used_streams(&self, streams: &mut BTreeSet<StreamId>, expand_all: bool) {
        self.child.find_used_streams(streams, expand_all);
    }

    fn is_dependent(&self, streams: &BTreeSet<StreamId>) -> bool {
        depends_on(self.count.as_ref(), streams) || self.child.is_dependent(streams)
    }

    fn invalidate_records(&self, request: &mut Request) {
        self.child.invalidate_records(request);
    }

    fn explain(&self) -> PlanNode {
        PlanNode::new("Skip N Records")
            .with_attribute("count", self.count.describe())
            .with_child(self.child.explain())
    }
}
