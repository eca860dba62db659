//! Streaming execution for aerodb
//!
//! A compiled statement is a tree of record streams pulled one row at a
//! time (open / get_record / close).
//!
//! # Operators
//!
//! - Index range scan over one or more disjoint key ranges
//! - Full table scan in storage order
//! - FIRST and SKIP limits
//! - Single-shot conditional branch
//! - Selectable procedure scan
//!
//! # Invariants
//!
//! - Statements are immutable and shared; all mutable state is per request
//! - An index scan returns each record at most once per open, in index
//!   order, across concurrent page splits
//! - Every latch and GC pin taken is released on every exit path
//! - Any error closes the whole tree before it reaches the caller

mod branch;
mod errors;
mod explain;
mod index_scan;
mod limit;
mod procedure;
mod request;
mod statement;
mod stream;
mod table_scan;

pub use branch::ConditionalStream;
pub use errors::{ExecError, ExecErrorCode, ExecResult, Severity};
pub use explain::{ExplainPlan, PlanNode};
pub use index_scan::IndexTableScan;
pub use limit::{FirstRows, SkipRows};
pub use procedure::{
    Message, Procedure, ProcedureScan, ProcedureStatement, SubRequest, SubRequestContext,
};
pub use request::{CancellationToken, ExecEnv, Request};
pub use statement::{PlanBuilder, Statement, StatementCursor};
pub use stream::{RecordStream, StateSlot, StreamId, StreamOperator};
pub use table_scan::FullTableScan;
