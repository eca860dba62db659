//! Shared fixtures for integration tests
//!
//! One in-memory environment per test: page cache (also the GC registry),
//! row store and catalog.

#![allow(dead_code)]

use std::sync::Arc;

use aerostream::config::ExecConfig;
use aerostream::executor::{ExecEnv, ExecResult, Request, Statement, StatementCursor};
use aerostream::expr::{Literal, ValueExpr};
use aerostream::index::{compare_entries, IndexDescriptor, IndexId, MemoryCatalog};
use aerostream::page::{MemoryPageCache, PageId};
use aerostream::storage::{MemoryRowStore, RecordId, RelationId, Row, RowStorage, Value};

pub const ORDERS: RelationId = RelationId(1);
pub const CUSTOMERS: RelationId = RelationId(2);

pub struct Fixture {
    pub cache: Arc<MemoryPageCache>,
    pub rows: Arc<MemoryRowStore>,
    pub catalog: Arc<MemoryCatalog>,
    pub env: Arc<ExecEnv>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(ExecConfig::default())
    }

    pub fn with_config(config: ExecConfig) -> Self {
        let cache = Arc::new(MemoryPageCache::for_config(&config));
        let rows = Arc::new(MemoryRowStore::new());
        let catalog = Arc::new(MemoryCatalog::new());
        rows.create_relation(ORDERS);
        rows.create_relation(CUSTOMERS);
        let env = Arc::new(ExecEnv::new(
            cache.clone(),
            cache.clone(),
            rows.clone(),
            catalog.clone(),
            config,
        ));
        Self {
            cache,
            rows,
            catalog,
            env,
        }
    }

    pub fn request(&self, statement: &Statement) -> Request {
        Request::new(Arc::clone(&self.env), statement)
    }

    /// One ORDERS row per amount: `[amount, "order-<n>"]`
    pub fn insert_amounts(&self, amounts: &[Option<i64>]) -> Vec<RecordId> {
        amounts
            .iter()
            .enumerate()
            .map(|(i, amount)| {
                self.rows.insert(
                    ORDERS,
                    vec![amount.map(Value::Int), Some(Value::Text(format!("order-{}", i)))],
                )
            })
            .collect()
    }

    /// Builds an index over the current rows of its relation and registers it
    pub fn build_index(&self, index: &IndexDescriptor, capacity: usize) -> PageId {
        let mut entries = Vec::new();
        let mut after = None;
        while let Some(row) = self.rows.next_row(index.relation, after).unwrap() {
            entries.push((index.derive_key(&row), row.id));
            after = Some(row.id);
        }
        entries.sort_by(|a, b| compare_entries(&a.0, a.1, &b.0, b.1, index.descending));

        let root = self.cache.build_tree(&entries, capacity).unwrap();
        self.catalog.register(index.id, root);
        root
    }
}

/// Ascending index over ORDERS.amount
pub fn amount_index() -> IndexDescriptor {
    IndexDescriptor::new(IndexId(10), "IDX_ORDERS_AMOUNT", ORDERS, vec![0])
}

/// Ascending index over ORDERS.label
pub fn label_index() -> IndexDescriptor {
    IndexDescriptor::new(IndexId(11), "IDX_ORDERS_LABEL", ORDERS, vec![1])
}

pub fn int(v: i64) -> Arc<dyn ValueExpr> {
    Arc::new(Literal::int(v))
}

pub fn null() -> Arc<dyn ValueExpr> {
    Arc::new(Literal::null())
}

pub fn drain(cursor: &mut StatementCursor<'_>) -> ExecResult<Vec<Row>> {
    let mut rows = Vec::new();
    while let Some(row) = cursor.fetch()? {
        rows.push(row);
    }
    Ok(rows)
}

/// Opens the statement in a fresh request and returns every row
pub fn run(fixture: &Fixture, statement: &Statement) -> Vec<Row> {
    let mut cursor = StatementCursor::open(statement, fixture.request(statement)).unwrap();
    drain(&mut cursor).unwrap()
}

/// Field 0 of every row as an integer
pub fn amounts(rows: &[Row]) -> Vec<Option<i64>> {
    rows.iter()
        .map(|row| row.field(0).and_then(|v| v.as_int()))
        .collect()
}

pub fn ids(rows: &[Row]) -> Vec<RecordId> {
    rows.iter().map(|row| row.id).collect()
}
