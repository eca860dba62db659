//! Procedure Scan Tests
//!
//! - Output messages become rows until the end-of-stream flag
//! - Metadata checks happen before the body is instantiated
//! - Every failure unwinds the sub-request exactly once
//! - The sub-request inherits the caller's transaction and timestamp

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use aerostream::executor::{
    ExecError, ExecErrorCode, ExecResult, Message, PlanBuilder, Procedure, ProcedureStatement,
    RecordStream, Request, Statement, StatementCursor, SubRequest, SubRequestContext,
};
use aerostream::expr::ValueExpr;
use aerostream::storage::{RecordId, Value};
use common::*;

// =============================================================================
// Test procedure
// =============================================================================

/// Counters shared by every instance of the generator
#[derive(Default)]
struct Counters {
    instantiated: AtomicUsize,
    started: AtomicUsize,
    unwound: AtomicUsize,
    context: Mutex<Option<SubRequestContext>>,
}

/// Produces the integers 1..=n, where n is its only input. A finished run
/// rejects further receives.
struct Generator {
    counters: Arc<Counters>,
    fail_after: Option<i64>,
    bad_width: bool,
}

struct GeneratorRun {
    counters: Arc<Counters>,
    fail_after: Option<i64>,
    bad_width: bool,
    limit: i64,
    produced: i64,
    completed: bool,
}

impl ProcedureStatement for Generator {
    fn instantiate(&self) -> ExecResult<Box<dyn SubRequest>> {
        self.counters.instantiated.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(GeneratorRun {
            counters: Arc::clone(&self.counters),
            fail_after: self.fail_after,
            bad_width: self.bad_width,
            limit: 0,
            produced: 0,
            completed: false,
        }))
    }
}

impl SubRequest for GeneratorRun {
    fn start(&mut self, context: &SubRequestContext) -> ExecResult<()> {
        self.counters.started.fetch_add(1, Ordering::SeqCst);
        *self.counters.context.lock().unwrap() = Some(*context);
        Ok(())
    }

    fn send(&mut self, message: Message) -> ExecResult<()> {
        self.limit = message
            .fields
            .first()
            .cloned()
            .flatten()
            .and_then(|v| v.as_int())
            .unwrap_or(0);
        Ok(())
    }

    fn receive(&mut self) -> ExecResult<Message> {
        if self.completed {
            return Err(ExecError::execution_failed("receive after completion"));
        }
        if self.fail_after == Some(self.produced) {
            return Err(ExecError::execution_failed("generator failed"));
        }
        if self.bad_width {
            return Ok(Message::new(vec![Some(Value::Int(1))]));
        }
        if self.produced >= self.limit {
            self.completed = true;
            return Ok(Message::end_of_stream(1));
        }
        self.produced += 1;
        Ok(Message::row(vec![Some(Value::Int(self.produced * 10))]))
    }

    fn unwind(&mut self) {
        self.counters.unwound.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn generator(counters: &Arc<Counters>) -> Generator {
    Generator {
        counters: Arc::clone(counters),
        fail_after: None,
        bad_width: false,
    }
}

fn gen_procedure(body: Generator) -> Procedure {
    Procedure::new("GEN_ROWS", 1, 1, Arc::new(body))
}

fn procedure_statement(procedure: Procedure, inputs: Vec<Arc<dyn ValueExpr>>) -> Statement {
    let mut plan = PlanBuilder::new();
    let stream = plan.stream();
    let root = plan.procedure(stream, Arc::new(procedure), inputs);
    plan.build(root)
}

/// Count expression yielding the next value of a list on every evaluation
struct CountSequence(Mutex<Vec<i64>>);

impl CountSequence {
    fn new(mut counts: Vec<i64>) -> Self {
        counts.reverse();
        Self(Mutex::new(counts))
    }
}

impl ValueExpr for CountSequence {
    fn evaluate(&self, _request: &Request) -> ExecResult<Option<Value>> {
        Ok(self.0.lock().unwrap().pop().map(Value::Int))
    }

    fn describe(&self) -> String {
        "count sequence".to_string()
    }
}

fn values(rows: &[aerostream::storage::Row]) -> Vec<i64> {
    rows.iter()
        .filter_map(|row| row.field(0).and_then(|v| v.as_int()))
        .collect()
}

// =============================================================================
// Rows
// =============================================================================

#[test]
fn test_rows_until_end_of_stream() {
    let counters = Arc::new(Counters::default());
    let fx = Fixture::new();
    let statement = procedure_statement(gen_procedure(generator(&counters)), vec![int(3)]);

    let mut cursor = StatementCursor::open(&statement, fx.request(&statement)).unwrap();
    let rows = drain(&mut cursor).unwrap();
    assert_eq!(values(&rows), vec![10, 20, 30]);
    assert_eq!(ids(&rows), vec![RecordId(1), RecordId(2), RecordId(3)]);
    assert!(cursor.fetch().unwrap().is_none());

    assert_eq!(counters.started.load(Ordering::SeqCst), 1);
    assert_eq!(counters.unwound.load(Ordering::SeqCst), 0);
    cursor.close();
    assert_eq!(counters.unwound.load(Ordering::SeqCst), 1);
}

/// Fetching past the end keeps returning nothing without asking the
/// finished sub-request again.
#[test]
fn test_fetch_after_end_of_stream() {
    let counters = Arc::new(Counters::default());
    let fx = Fixture::new();
    let statement = procedure_statement(gen_procedure(generator(&counters)), vec![int(1)]);

    let mut cursor = StatementCursor::open(&statement, fx.request(&statement)).unwrap();
    assert_eq!(values(&[cursor.fetch().unwrap().unwrap()]), vec![10]);
    for _ in 0..3 {
        assert!(cursor.fetch().unwrap().is_none());
    }
    assert!(cursor.is_open());
    assert_eq!(counters.unwound.load(Ordering::SeqCst), 0);

    cursor.close();
    assert_eq!(counters.unwound.load(Ordering::SeqCst), 1);
}

#[test]
fn test_empty_procedure() {
    let counters = Arc::new(Counters::default());
    let fx = Fixture::new();
    let statement = procedure_statement(gen_procedure(generator(&counters)), vec![int(0)]);

    assert!(run(&fx, &statement).is_empty());
    assert_eq!(counters.unwound.load(Ordering::SeqCst), 1);
}

/// Row ids restart on every open.
#[test]
fn test_reopen_restarts_row_ids() {
    let counters = Arc::new(Counters::default());
    let fx = Fixture::new();
    let statement = procedure_statement(gen_procedure(generator(&counters)), vec![int(2)]);

    for _ in 0..2 {
        let rows = run(&fx, &statement);
        assert_eq!(ids(&rows), vec![RecordId(1), RecordId(2)]);
    }
    assert_eq!(counters.instantiated.load(Ordering::SeqCst), 2);
    assert_eq!(counters.unwound.load(Ordering::SeqCst), 2);
}

// =============================================================================
// Metadata checks
// =============================================================================

#[test]
fn test_input_count_mismatch() {
    let counters = Arc::new(Counters::default());
    let fx = Fixture::new();
    let procedure = Procedure::new("GEN_ROWS", 2, 1, Arc::new(generator(&counters)));
    let statement = procedure_statement(procedure, vec![int(3)]);

    let err = StatementCursor::open(&statement, fx.request(&statement))
        .err()
        .unwrap();
    assert_eq!(err.code(), ExecErrorCode::AeroExecutionFailed);
    assert_eq!(counters.instantiated.load(Ordering::SeqCst), 0);
}

/// A procedure with no body is reported before one that is only declared.
#[test]
fn test_not_implemented_wins_over_not_defined() {
    let counters = Arc::new(Counters::default());
    let fx = Fixture::new();

    let mut procedure = gen_procedure(generator(&counters));
    procedure.implemented = false;
    procedure.defined = false;
    let statement = procedure_statement(procedure, vec![int(1)]);
    let err = StatementCursor::open(&statement, fx.request(&statement))
        .err()
        .unwrap();
    assert_eq!(err.code(), ExecErrorCode::AeroProcedureNotImplemented);

    let mut procedure = gen_procedure(generator(&counters));
    procedure.defined = false;
    let statement = procedure_statement(procedure, vec![int(1)]);
    let err = StatementCursor::open(&statement, fx.request(&statement))
        .err()
        .unwrap();
    assert_eq!(err.code(), ExecErrorCode::AeroProcedureNotDefined);

    assert_eq!(counters.instantiated.load(Ordering::SeqCst), 0);
}

// =============================================================================
// Failures
// =============================================================================

/// A receive failure unwinds the sub-request once and closes the cursor.
#[test]
fn test_receive_failure_unwinds() {
    let counters = Arc::new(Counters::default());
    let fx = Fixture::new();
    let mut body = generator(&counters);
    body.fail_after = Some(2);
    let statement = procedure_statement(gen_procedure(body), vec![int(5)]);

    let mut cursor = StatementCursor::open(&statement, fx.request(&statement)).unwrap();
    assert!(cursor.fetch().unwrap().is_some());
    assert!(cursor.fetch().unwrap().is_some());
    let err = cursor.fetch().unwrap_err();
    assert_eq!(err.code(), ExecErrorCode::AeroExecutionFailed);
    assert!(!cursor.is_open());
    assert!(cursor.current_row().is_none());

    cursor.close();
    drop(cursor);
    assert_eq!(counters.unwound.load(Ordering::SeqCst), 1);
}

/// An output message of the wrong width is an error.
#[test]
fn test_wrong_output_width() {
    let counters = Arc::new(Counters::default());
    let fx = Fixture::new();
    let mut body = generator(&counters);
    body.bad_width = true;
    let statement = procedure_statement(gen_procedure(body), vec![int(5)]);

    let mut cursor = StatementCursor::open(&statement, fx.request(&statement)).unwrap();
    let err = cursor.fetch().unwrap_err();
    assert_eq!(err.code(), ExecErrorCode::AeroExecutionFailed);
    assert_eq!(counters.unwound.load(Ordering::SeqCst), 1);
}

/// Procedure rows cannot be locked; the attempt closes the tree.
#[test]
fn test_lock_not_supported() {
    let counters = Arc::new(Counters::default());
    let fx = Fixture::new();
    let statement = procedure_statement(gen_procedure(generator(&counters)), vec![int(3)]);

    let mut cursor = StatementCursor::open(&statement, fx.request(&statement)).unwrap();
    cursor.fetch().unwrap().unwrap();
    assert!(cursor.refetch().unwrap());

    let err = cursor.lock().unwrap_err();
    assert_eq!(err.code(), ExecErrorCode::AeroLockNotSupported);
    assert!(!cursor.is_open());
    assert_eq!(counters.unwound.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Context
// =============================================================================

#[test]
fn test_context_inherits_transaction_and_timestamp() {
    let counters = Arc::new(Counters::default());
    let fx = Fixture::new();
    let statement = procedure_statement(gen_procedure(generator(&counters)), vec![int(1)]);

    let request = fx.request(&statement).with_transaction(42);
    let timestamp = request.timestamp();
    let cursor = StatementCursor::open(&statement, request).unwrap();

    let context = counters.context.lock().unwrap().unwrap();
    assert_eq!(context.transaction, 42);
    assert_eq!(context.timestamp, timestamp);
    assert!(context.producing_rows);
    drop(cursor);
}

/// Under FIRST 0 the procedure is never instantiated.
#[test]
fn test_first_zero_never_instantiates() {
    let counters = Arc::new(Counters::default());
    let fx = Fixture::new();

    let mut plan = PlanBuilder::new();
    let stream = plan.stream();
    let scan = plan.procedure(stream, Arc::new(gen_procedure(generator(&counters))), vec![int(3)]);
    let root = plan.first(scan, int(0));
    let statement = plan.build(root);

    assert!(run(&fx, &statement).is_empty());
    assert_eq!(counters.instantiated.load(Ordering::SeqCst), 0);
    assert_eq!(counters.unwound.load(Ordering::SeqCst), 0);
}

/// A negative FIRST or SKIP fails before the procedure is instantiated.
#[test]
fn test_negative_count_never_instantiates() {
    let counters = Arc::new(Counters::default());
    let fx = Fixture::new();

    let mut plan = PlanBuilder::new();
    let stream = plan.stream();
    let scan = plan.procedure(stream, Arc::new(gen_procedure(generator(&counters))), vec![int(3)]);
    let root = plan.first(scan, int(-1));
    let statement = plan.build(root);
    let err = StatementCursor::open(&statement, fx.request(&statement))
        .err()
        .unwrap();
    assert_eq!(err.code(), ExecErrorCode::AeroBadFirst);

    let mut plan = PlanBuilder::new();
    let stream = plan.stream();
    let scan = plan.procedure(stream, Arc::new(gen_procedure(generator(&counters))), vec![int(3)]);
    let root = plan.skip(scan, int(-4));
    let statement = plan.build(root);
    let err = StatementCursor::open(&statement, fx.request(&statement))
        .err()
        .unwrap();
    assert_eq!(err.code(), ExecErrorCode::AeroBadSkip);

    assert_eq!(counters.instantiated.load(Ordering::SeqCst), 0);
    assert_eq!(counters.unwound.load(Ordering::SeqCst), 0);
}

/// Re-opening FIRST without a close first closes the running child.
#[test]
fn test_first_reopen_closes_running_child() {
    let counters = Arc::new(Counters::default());
    let fx = Fixture::new();

    let mut plan = PlanBuilder::new();
    let stream = plan.stream();
    let scan = plan.procedure(stream, Arc::new(gen_procedure(generator(&counters))), vec![int(3)]);
    let root = plan.first(scan, Arc::new(CountSequence::new(vec![5, 0])));
    let statement = plan.build(root);

    let mut request = fx.request(&statement);
    let root = statement.root();
    root.open(&mut request).unwrap();
    assert!(root.get_record(&mut request).unwrap());
    assert_eq!(counters.unwound.load(Ordering::SeqCst), 0);

    // second count is 0, so the child is closed and not reopened
    root.open(&mut request).unwrap();
    assert_eq!(counters.instantiated.load(Ordering::SeqCst), 1);
    assert_eq!(counters.unwound.load(Ordering::SeqCst), 1);
    assert!(!root.get_record(&mut request).unwrap());

    root.close(&mut request);
    assert_eq!(counters.unwound.load(Ordering::SeqCst), 1);
}

/// Re-opening SKIP without a close restarts the child from its first row.
#[test]
fn test_skip_reopen_restarts_child() {
    let counters = Arc::new(Counters::default());
    let fx = Fixture::new();

    let mut plan = PlanBuilder::new();
    let stream = plan.stream();
    let scan = plan.procedure(stream, Arc::new(gen_procedure(generator(&counters))), vec![int(3)]);
    let root = plan.skip(scan, Arc::new(CountSequence::new(vec![1, 0])));
    let statement = plan.build(root);

    let mut request = fx.request(&statement);
    let root = statement.root();
    root.open(&mut request).unwrap();
    assert!(root.get_record(&mut request).unwrap());
    assert_eq!(values(&[root.current_row(&request).unwrap().clone()]), vec![20]);

    root.open(&mut request).unwrap();
    assert_eq!(counters.unwound.load(Ordering::SeqCst), 1);
    assert!(root.get_record(&mut request).unwrap());
    assert_eq!(values(&[root.current_row(&request).unwrap().clone()]), vec![10]);

    root.close(&mut request);
    assert_eq!(counters.instantiated.load(Ordering::SeqCst), 2);
    assert_eq!(counters.unwound.load(Ordering::SeqCst), 2);
}

/// FIRST stops pulling early; closing still unwinds the body.
#[test]
fn test_first_over_procedure_unwinds_on_close() {
    let counters = Arc::new(Counters::default());
    let fx = Fixture::new();

    let mut plan = PlanBuilder::new();
    let stream = plan.stream();
    let scan = plan.procedure(stream, Arc::new(gen_procedure(generator(&counters))), vec![int(10)]);
    let root = plan.first(scan, int(2));
    let statement = plan.build(root);

    let rows = run(&fx, &statement);
    assert_eq!(values(&rows), vec![10, 20]);
    assert_eq!(counters.unwound.load(Ordering::SeqCst), 1);
}

#[test]
fn test_procedure_explain() {
    let counters = Arc::new(Counters::default());
    let statement = procedure_statement(gen_procedure(generator(&counters)), vec![int(3)]);
    let text = statement.explain().to_string();
    assert!(text.contains("-> Procedure Scan"));
    assert!(text.contains("procedure: GEN_ROWS"));
    assert!(text.contains("inputs: 3"));
}
