//! Compiled expressions
//!
//! The compiler hands the executor value and boolean expressions. They are
//! immutable, shared by every request running the statement, and evaluated
//! against one request: its parameters and the current records of its
//! streams.
//!
//! NULL is `None`. A comparison involving NULL is false. Comparing values
//! of different types is an evaluation error, not a coercion.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use crate::executor::{ExecError, ExecResult, Request, StreamId};
use crate::storage::Value;

/// Scalar expression
pub trait ValueExpr: Send + Sync {
    /// Evaluates against `request`; `None` is NULL
    fn evaluate(&self, request: &Request) -> ExecResult<Option<Value>>;

    /// Adds the streams this expression reads
    fn collect_streams(&self, _streams: &mut BTreeSet<StreamId>) {}

    /// Plan description
    fn describe(&self) -> String;
}

/// Boolean expression
pub trait BoolExpr: Send + Sync {
    /// Evaluates against `request`; unknown is false
    fn evaluate(&self, request: &Request) -> ExecResult<bool>;

    /// Adds the streams this expression reads
    fn collect_streams(&self, _streams: &mut BTreeSet<StreamId>) {}

    /// Plan description
    fn describe(&self) -> String;
}

/// Constant value
#[derive(Debug, Clone)]
pub struct Literal(pub Option<Value>);

impl Literal {
    pub fn int(v: i64) -> Self {
        Literal(Some(Value::Int(v)))
    }

    pub fn text(v: impl Into<String>) -> Self {
        Literal(Some(Value::Text(v.into())))
    }

    pub fn null() -> Self {
        Literal(None)
    }
}

impl ValueExpr for Literal {
    fn evaluate(&self, _request: &Request) -> ExecResult<Option<Value>> {
        Ok(self.0.clone())
    }

    fn describe(&self) -> String {
        match &self.0 {
            Some(value) => value.to_string(),
            None => "NULL".to_string(),
        }
    }
}

/// Positional statement parameter
#[derive(Debug, Clone, Copy)]
pub struct Parameter(pub usize);

impl ValueExpr for Parameter {
    fn evaluate(&self, request: &Request) -> ExecResult<Option<Value>> {
        request
            .param(self.0)
            .cloned()
            .ok_or_else(|| ExecError::evaluation_failed(format!("Parameter {} is not bound", self.0)))
    }

    fn describe(&self) -> String {
        format!("?{}", self.0)
    }
}

/// Field of the current record of a stream
#[derive(Debug, Clone, Copy)]
pub struct FieldRef {
    pub stream: StreamId,
    pub field: usize,
}

impl FieldRef {
    pub fn new(stream: StreamId, field: usize) -> Self {
        Self { stream, field }
    }
}

impl ValueExpr for FieldRef {
    fn evaluate(&self, request: &Request) -> ExecResult<Option<Value>> {
        let row = request.record(self.stream)?.row().ok_or_else(|| {
            ExecError::evaluation_failed(format!("Stream {} has no current record", self.stream))
        })?;
        Ok(row.field(self.field).cloned())
    }

    fn collect_streams(&self, streams: &mut BTreeSet<StreamId>) {
        streams.insert(self.stream);
    }

    fn describe(&self) -> String {
        format!("{}.{}", self.stream, self.field)
    }
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl CompareOp {
    /// Operator symbol
    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
        }
    }

    fn holds(&self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Lte => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Gte => ordering != Ordering::Less,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// Binary comparison of two scalar expressions
pub struct Comparison {
    pub op: CompareOp,
    pub left: Box<dyn ValueExpr>,
    pub right: Box<dyn ValueExpr>,
}

impl Comparison {
    pub fn new(op: CompareOp, left: impl ValueExpr + 'static, right: impl ValueExpr + 'static) -> Self {
        Self {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }
}

fn compare_values(left: &Value, right: &Value) -> ExecResult<Ordering> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
        (Value::Text(a), Value::Text(b)) => Ok(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Ok(a.cmp(b)),
        _ => Err(ExecError::evaluation_failed(format!(
            "Cannot compare {} with {}",
            left.type_name(),
            right.type_name()
        ))),
    }
}

impl BoolExpr for Comparison {
    fn evaluate(&self, request: &Request) -> ExecResult<bool> {
        let left = self.left.evaluate(request)?;
        let right = self.right.evaluate(request)?;
        match (left, right) {
            (Some(left), Some(right)) => Ok(self.op.holds(compare_values(&left, &right)?)),
            _ => Ok(false),
        }
    }

    fn collect_streams(&self, streams: &mut BTreeSet<StreamId>) {
        self.left.collect_streams(streams);
        self.right.collect_streams(streams);
    }

    fn describe(&self) -> String {
        format!("{} {} {}", self.left.describe(), self.op, self.right.describe())
    }
}

/// Constant truth value
#[derive(Debug, Clone, Copy)]
pub struct Constant(pub bool);

impl BoolExpr for Constant {
    fn evaluate(&self, _request: &Request) -> ExecResult<bool> {
        Ok(self.0)
    }

    fn describe(&self) -> String {
        if self.0 { "TRUE" } else { "FALSE" }.to_string()
    }
}
