//! Rows and record buffers
//!
//! A [`Row`] is what storage hands out. A [`Record`] is the per-stream
//! buffer in the request's record pool that a row is copied into on every
//! successful fetch.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Record identifier (physical row address)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Relation (table) identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationId(pub u32);

impl fmt::Display for RelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A typed field value. SQL NULL is `None` at the field level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    Text(String),
    Bool(bool),
}

impl Value {
    /// Integer content, if this is an integer
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Boolean content, if this is a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "integer",
            Value::Text(_) => "text",
            Value::Bool(_) => "boolean",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "'{}'", v),
            Value::Bool(v) => write!(f, "{}", v),
        }
    }
}

/// A stored row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    pub id: RecordId,
    pub fields: Vec<Option<Value>>,
}

impl Row {
    /// Creates a row
    pub fn new(id: RecordId, fields: Vec<Option<Value>>) -> Self {
        Self { id, fields }
    }

    /// Field at `position`; `None` for NULL or a position past the end
    pub fn field(&self, position: usize) -> Option<&Value> {
        self.fields.get(position).and_then(|f| f.as_ref())
    }
}

/// Reusable row buffer owned by one stream within one request
#[derive(Debug, Clone, Default)]
pub struct Record {
    row: Option<Row>,
}

impl Record {
    /// Empty, invalid buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites the buffer with a freshly fetched row
    pub fn set(&mut self, row: Row) {
        self.row = Some(row);
    }

    /// Marks the buffer invalid
    pub fn invalidate(&mut self) {
        self.row = None;
    }

    /// Returns the current row, if valid
    pub fn row(&self) -> Option<&Row> {
        self.row.as_ref()
    }

    /// Returns true when the buffer holds a row
    pub fn is_valid(&self) -> bool {
        self.row.is_some()
    }
}
