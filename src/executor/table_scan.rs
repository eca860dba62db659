//! Sequential table scan
//!
//! Walks a relation in storage order. The position is the id of the last
//! row returned, so a scan survives rows being inserted or deleted behind
//! it.

use std::collections::BTreeSet;

use super::errors::ExecResult;
use super::explain::PlanNode;
use super::request::Request;
use super::stream::{RecordStream, StateSlot, StreamId};
use crate::storage::{RecordId, RelationId, Row};

#[derive(Debug, Default)]
struct TableScanState {
    open: bool,
    last: Option<RecordId>,
}

/// Every row of one relation, in storage order
pub struct FullTableScan {
    stream: StreamId,
    slot: StateSlot,
    relation: RelationId,
    name: String,
}

impl FullTableScan {
    pub(crate) fn new(stream: StreamId, slot: StateSlot, relation: RelationId, name: impl Into<String>) -> Self {
        Self {
            stream,
            slot,
            relation,
            name: name.into(),
        }
    }

    fn current_id(&self, request: &Request) -> Option<RecordId> {
        request
            .record(self.stream)
            .ok()
            .and_then(|r| r.row())
            .map(|row| row.id)
    }
}

impl RecordStream for FullTableScan {
    fn open(&self, request: &mut Request) -> ExecResult<()> {
        let state = request.state_mut::<TableScanState>(self.slot)?;
        state.open = true;
        state.last = None;
        request.record_mut(self.stream)?.invalidate();
        Ok(())
    }

    fn get_record(&self, request: &mut Request) -> ExecResult<bool> {
        let state = request.state_mut::<TableScanState>(self.slot)?;
        if !state.open {
            return Ok(false);
        }
        let after = state.last;

        match request.env().rows().next_row(self.relation, after)? {
            Some(row) => {
                request.state_mut::<TableScanState>(self.slot)?.last = Some(row.id);
                request.record_mut(self.stream)?.set(row);
                Ok(true)
            }
            None => {
                request.state_mut::<TableScanState>(self.slot)?.open = false;
                request.record_mut(self.stream)?.invalidate();
                Ok(false)
            }
        }
    }

    fn close(&self, request: &mut Request) {
        if let Ok(state) = request.state_mut::<TableScanState>(self.slot) {
            state.open = false;
            state.last = None;
        }
        self.invalidate_records(request);
    }

    fn refetch_record(&self, request: &mut Request) -> ExecResult<bool> {
        let Some(id) = self.current_id(request) else {
            return Ok(false);
        };
        match request.env().rows().fetch_row(id)? {
            Some(row) => {
                request.record_mut(self.stream)?.set(row);
                Ok(true)
            }
            None => {
                request.record_mut(self.stream)?.invalidate();
                Ok(false)
            }
        }
    }

    fn lock_record(&self, request: &mut Request) -> ExecResult<bool> {
        let Some(id) = self.current_id(request) else {
            return Ok(false);
        };
        Ok(request.env().rows().lock_row(request.transaction(), id)?)
    }

    fn current_row<'r>(&self, request: &'r Request) -> Option<&'r Row> {
        request.record(self.stream).ok().and_then(|r| r.row())
    }

    fn find_used_streams(&self, streams: &mut BTreeSet<StreamId>, _expand_all: bool) {
        streams.insert(self.stream);
    }

    fn is_dependent(&self, _streams: &BTreeSet<StreamId>) -> bool {
        false
    }

    fn invalidate_records(&self, request: &mut Request) {
        if let Ok(record) = request.record_mut(self.stream) {
            record.invalidate();
        }
    }

    fn explain(&self) -> PlanNode {
        PlanNode::new("Table Full Scan")
            .with_attribute("table", self.name.clone())
            .with_attribute("stream", self.stream.to_string())
    }
}
