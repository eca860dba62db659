//! Selectable procedure scan
//!
//! Streams the rows a stored procedure produces. The procedure runs as a
//! sub-request under the caller's transaction and timestamp:
//!
//! ```text
//! open:       instantiate -> start -> send(input message)
//! get_record: receive(output message), last field is the EOS flag (0 = end)
//! close:      unwind
//! ```
//!
//! Any failure unwinds the sub-request and leaves the stream closed before
//! the error propagates.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::errors::{ExecError, ExecResult};
use super::explain::PlanNode;
use super::request::Request;
use super::stream::{RecordStream, StateSlot, StreamId};
use crate::expr::ValueExpr;
use crate::observability::{log_event_with_fields, Event};
use crate::storage::{RecordId, Row, Value};

/// Field values exchanged with a sub-request
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    pub fields: Vec<Option<Value>>,
}

impl Message {
    pub fn new(fields: Vec<Option<Value>>) -> Self {
        Self { fields }
    }

    /// Output message carrying one row and a "more rows follow" flag
    pub fn row(mut fields: Vec<Option<Value>>) -> Self {
        fields.push(Some(Value::Int(1)));
        Self { fields }
    }

    /// Output message marking the end of the stream
    pub fn end_of_stream(outputs: usize) -> Self {
        let mut fields = vec![None; outputs];
        fields.push(Some(Value::Int(0)));
        Self { fields }
    }
}

/// Settings a sub-request inherits from its caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubRequestContext {
    pub transaction: u64,
    pub timestamp: DateTime<Utc>,
    pub producing_rows: bool,
}

/// A running instance of a procedure body
pub trait SubRequest: Send {
    fn start(&mut self, context: &SubRequestContext) -> ExecResult<()>;
    fn send(&mut self, message: Message) -> ExecResult<()>;
    fn receive(&mut self) -> ExecResult<Message>;
    /// Abandons the execution; must be safe to call in any state
    fn unwind(&mut self);
}

/// Independently compiled procedure body
pub trait ProcedureStatement: Send + Sync {
    fn instantiate(&self) -> ExecResult<Box<dyn SubRequest>>;
}

/// Procedure metadata plus its compiled body
pub struct Procedure {
    pub name: String,
    /// Has a body (not an external/package stub)
    pub implemented: bool,
    /// Not a forward declaration
    pub defined: bool,
    pub input_count: usize,
    pub output_count: usize,
    pub statement: Arc<dyn ProcedureStatement>,
}

impl Procedure {
    /// Implemented and defined procedure
    pub fn new(
        name: impl Into<String>,
        input_count: usize,
        output_count: usize,
        statement: Arc<dyn ProcedureStatement>,
    ) -> Self {
        Self {
            name: name.into(),
            implemented: true,
            defined: true,
            input_count,
            output_count,
            statement,
        }
    }
}

#[derive(Default)]
struct ProcedureState {
    sub_request: Option<Box<dyn SubRequest>>,
    rows: u64,
    /// End-of-stream was received; the sub-request is not asked again
    finished: bool,
}

/// Rows produced by a procedure call
pub struct ProcedureScan {
    stream: StreamId,
    slot: StateSlot,
    procedure: Arc<Procedure>,
    inputs: Vec<Arc<dyn ValueExpr>>,
}

impl ProcedureScan {
    pub(crate) fn new(
        stream: StreamId,
        slot: StateSlot,
        procedure: Arc<Procedure>,
        inputs: Vec<Arc<dyn ValueExpr>>,
    ) -> Self {
        Self {
            stream,
            slot,
            procedure,
            inputs,
        }
    }

    fn unwind(&self, request: &mut Request) {
        let sub_request = request
            .state_mut::<ProcedureState>(self.slot)
            .ok()
            .and_then(|state| state.sub_request.take());
        if let Some(mut sub_request) = sub_request {
            sub_request.unwind();
            log_event_with_fields(
                Event::ProcedureUnwound,
                &[("procedure", self.procedure.name.as_str())],
            );
        }
        if let Ok(record) = request.record_mut(self.stream) {
            record.invalidate();
        }
    }

    fn start(&self, request: &Request) -> ExecResult<Box<dyn SubRequest>> {
        let fields = self
            .inputs
            .iter()
            .map(|expr| expr.evaluate(request))
            .collect::<ExecResult<Vec<_>>>()?;
        if fields.len() != self.procedure.input_count {
            return Err(ExecError::execution_failed(format!(
                "Procedure {} expects {} inputs, got {}",
                self.procedure.name,
                self.procedure.input_count,
                fields.len()
            )));
        }

        let mut sub_request = self.procedure.statement.instantiate()?;
        let context = SubRequestContext {
            transaction: request.transaction(),
            timestamp: request.timestamp(),
            producing_rows: true,
        };
        let started = sub_request
            .start(&context)
            .and_then(|_| sub_request.send(Message::new(fields)));
        if let Err(err) = started {
            sub_request.unwind();
            log_event_with_fields(
                Event::ProcedureUnwound,
                &[("procedure", self.procedure.name.as_str())],
            );
            return Err(err);
        }
        Ok(sub_request)
    }

    fn receive(&self, request: &mut Request) -> ExecResult<Option<Row>> {
        let state = request.state_mut::<ProcedureState>(self.slot)?;
        if state.finished {
            return Ok(None);
        }
        let Some(sub_request) = state.sub_request.as_mut() else {
            return Ok(None);
        };

        let message = sub_request.receive()?;
        let expected = self.procedure.output_count + 1;
        if message.fields.len() != expected {
            return Err(ExecError::execution_failed(format!(
                "Procedure {} returned {} fields, expected {}",
                self.procedure.name,
                message.fields.len(),
                expected
            )));
        }

        let mut fields = message.fields;
        let more = match fields.pop().flatten() {
            Some(Value::Int(flag)) => flag != 0,
            _ => false,
        };
        if !more {
            state.finished = true;
            return Ok(None);
        }

        state.rows += 1;
        Ok(Some(Row::new(RecordId(state.rows), fields)))
    }
}

impl RecordStream for ProcedureScan {
    fn open(&self, request: &mut Request) -> ExecResult<()> {
        if !self.procedure.implemented {
            return Err(ExecError::procedure_not_implemented(&self.procedure.name));
        }
        if !self.procedure.defined {
            return Err(ExecError::procedure_not_defined(&self.procedure.name));
        }

        self.close(request);
        let sub_request = self.start(request)?;
        log_event_with_fields(
            Event::ProcedureStart,
            &[
                ("procedure", self.procedure.name.as_str()),
                ("request_id", request.id().to_string().as_str()),
            ],
        );

        let state = request.state_mut::<ProcedureState>(self.slot)?;
        state.sub_request = Some(sub_request);
        state.rows = 0;
        state.finished = false;
        Ok(())
    }

    fn get_record(&self, request: &mut Request) -> ExecResult<bool> {
        match self.receive(request) {
            Ok(Some(row)) => {
                request.record_mut(self.stream)?.set(row);
                Ok(true)
            }
            Ok(None) => {
                request.record_mut(self.stream)?.invalidate();
                Ok(false)
            }
            Err(err) => {
                self.unwind(request);
                Err(err)
            }
        }
    }

    fn close(&self, request: &mut Request) {
        let sub_request = request
            .state_mut::<ProcedureState>(self.slot)
            .ok()
            .and_then(|state| state.sub_request.take());
        if let Some(mut sub_request) = sub_request {
            sub_request.unwind();
        }
        self.invalidate_records(request);
    }

    fn refetch_record(&self, _request: &mut Request) -> ExecResult<bool> {
        Ok(true)
    }

    fn lock_record(&self, _request: &mut Request) -> ExecResult<bool> {
        Err(ExecError::lock_not_supported(&format!(
            "procedure {}",
            self.procedure.name
        )))
    }

    fn current_row<'r>(&self, request: &'r Request) -> Option<&'r Row> {
        request.record(self.stream).ok().and_then(|r| r.row())
    }

    fn find_used_streams(&self, streams: &mut BTreeSet<StreamId>, expand_all: bool) {
        streams.insert(self.stream);
        if expand_all {
            for input in &self.inputs {
                input.collect_streams(streams);
            }
        }
    }

    fn is_dependent(&self, streams: &BTreeSet<StreamId>) -> bool {
        let mut used = BTreeSet::new();
        for input in &self.inputs {
            input.collect_streams(&mut used);
        }
        used.iter().any(|s| streams.contains(s))
    }

    fn invalidate_records(&self, request: &mut Request) {
        if let Ok(record) = request.record_mut(self.stream) {
            record.invalidate();
        }
    }

    fn explain(&self) -> PlanNode {
        let inputs: Vec<String> = self.inputs.iter().map(|i| i.describe()).collect();
        PlanNode::new("Procedure Scan")
            .with_attribute("procedure", self.procedure.name.clone())
            .with_attribute("inputs", inputs.join(", "))
            .with_attribute("stream", self.stream.to_string())
    }
}
