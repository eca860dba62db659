//! Single-shot conditional stream
//!
//! The condition is evaluated once per open and picks one child for the
//! whole open/close cycle. The other child is never opened or fetched.

use std::collections::BTreeSet;
use std::sync::Arc;

use super::errors::ExecResult;
use super::explain::PlanNode;
use super::request::Request;
use super::stream::{RecordStream, StateSlot, StreamId, StreamOperator};
use crate::expr::BoolExpr;
use crate::storage::Row;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Branch {
    WhenTrue,
    WhenFalse,
}

#[derive(Debug, Default)]
struct BranchState {
    selected: Option<Branch>,
}

/// Chooses between two children once per open
pub struct ConditionalStream {
    slot: StateSlot,
    condition: Arc<dyn BoolExpr>,
    when_true: Box<StreamOperator>,
    when_false: Box<StreamOperator>,
}

impl ConditionalStream {
    pub(crate) fn new(
        slot: StateSlot,
        condition: Arc<dyn BoolExpr>,
        when_true: StreamOperator,
        when_false: StreamOperator,
    ) -> Self {
        Self {
            slot,
            condition,
            when_true: Box::new(when_true),
            when_false: Box::new(when_false),
        }
    }

    fn child(&self, branch: Branch) -> &StreamOperator {
        match branch {
            Branch::WhenTrue => &self.when_true,
            Branch::WhenFalse => &self.when_false,
        }
    }

    fn selected(&self, request: &Request) -> Option<Branch> {
        request
            .state::<BranchState>(self.slot)
            .ok()
            .flatten()
            .and_then(|state| state.selected)
    }
}

impl RecordStream for ConditionalStream {
    fn open(&self, request: &mut Request) -> ExecResult<()> {
        request.state_mut::<BranchState>(self.slot)?.selected = None;

        let branch = if self.condition.evaluate(request)? {
            Branch::WhenTrue
        } else {
            Branch::WhenFalse
        };
        self.child(branch).open(request)?;
        request.state_mut::<BranchState>(self.slot)?.selected = Some(branch);
        Ok(())
    }

    fn get_record(&self, request: &mut Request) -> ExecResult<bool> {
        match self.selected(request) {
            Some(branch) => self.child(branch).get_record(request),
            None => Ok(false),
        }
    }

    fn close(&self, request: &mut Request) {
        let selected = match request.state_mut::<BranchState>(self.slot) {
            Ok(state) => state.selected.take(),
            Err(_) => None,
        };
        if let Some(branch) = selected {
            self.child(branch).close(request);
        }
    }

    fn refetch_record(&self, request: &mut Request) -> ExecResult<bool> {
        match self.selected(request) {
            Some(branch) => self.child(branch).refetch_record(request),
            None => Ok(false),
        }
    }

    fn lock_record(&self, request: &mut Request) -> ExecResult<bool> {
        match self.selected(request) {
            Some(branch) => self.child(branch).lock_record(request),
            None => Ok(false),
        }
    }

    fn current_row<'r>(&self, request: &'r Request) -> Option<&'r Row> {
        self.selected(request)
            .and_then(|branch| self.child(branch).current_row(request))
    }

    fn find_used_streams(&self, streams: &mut BTreeSet<StreamId>, expand_all: bool) {
        self.when_true.find_used_streams(streams, expand_all);
        self.when_false.find_used_streams(streams, expand_all);
    }

    fn is_dependent(&self, streams: &BTreeSet<StreamId>) -> bool {
        let mut used = BTreeSet::new();
        self.condition.collect_streams(&mut used);
        used.iter().any(|s| streams.contains(s))
            || self.when_true.is_dependent(streams)
            || self.when_false.is_dependent(streams)
    }

    fn invalidate_records(&self, request: &mut Request) {
        if let Some(branch) = self.selected(request) {
            self.child(branch).invalidate_records(request);
        }
    }

    fn explain(&self) -> PlanNode {
        PlanNode::new("Condition")
            .with_attribute("predicate", self.condition.describe())
            .with_child(self.when_true.explain())
            .with_child(self.when_false.explain())
    }
}
