//! FIRST / SKIP and Conditional Branch Tests
//!
//! - Count evaluation: NULL, negative, parameters
//! - FIRST and SKIP composed in both orders
//! - The branch condition is evaluated once per open

mod common;

use std::sync::Arc;

use aerostream::executor::{ExecErrorCode, PlanBuilder, Statement, StatementCursor, StreamOperator};
use aerostream::expr::{CompareOp, Comparison, Literal, Parameter, ValueExpr};
use aerostream::storage::Value;
use common::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// =============================================================================
// Helper Functions
// =============================================================================

fn sequential(count: i64) -> Vec<Option<i64>> {
    (1..=count).map(Some).collect()
}

fn range(from: i64, to: i64) -> Vec<Option<i64>> {
    (from..=to).map(Some).collect()
}

fn orders_scan(plan: &mut PlanBuilder) -> StreamOperator {
    let stream = plan.stream();
    plan.full_scan(stream, ORDERS, "ORDERS")
}

fn first_of_orders(count: Arc<dyn ValueExpr>) -> Statement {
    let mut plan = PlanBuilder::new();
    let scan = orders_scan(&mut plan);
    let root = plan.first(scan, count);
    plan.build(root)
}

fn skip_of_orders(count: Arc<dyn ValueExpr>) -> Statement {
    let mut plan = PlanBuilder::new();
    let scan = orders_scan(&mut plan);
    let root = plan.skip(scan, count);
    plan.build(root)
}

// =============================================================================
// FIRST
// =============================================================================

#[test]
fn test_first_limits_rows() {
    let fx = Fixture::new();
    fx.insert_amounts(&sequential(10));

    let rows = run(&fx, &first_of_orders(int(4)));
    assert_eq!(amounts(&rows), sequential(4));

    let rows = run(&fx, &first_of_orders(int(25)));
    assert_eq!(amounts(&rows), sequential(10));
}

#[test]
fn test_first_zero_and_null_produce_nothing() {
    let fx = Fixture::new();
    fx.insert_amounts(&sequential(5));

    assert!(run(&fx, &first_of_orders(int(0))).is_empty());
    assert!(run(&fx, &first_of_orders(null())).is_empty());
}

#[test]
fn test_negative_first_rejected() {
    let fx = Fixture::new();
    fx.insert_amounts(&sequential(5));

    let statement = first_of_orders(int(-1));
    let err = StatementCursor::open(&statement, fx.request(&statement))
        .err()
        .unwrap();
    assert_eq!(err.code(), ExecErrorCode::AeroBadFirst);
}

#[test]
fn test_non_integer_count_rejected() {
    let fx = Fixture::new();
    let statement = first_of_orders(Arc::new(Literal::text("three")));
    let err = StatementCursor::open(&statement, fx.request(&statement))
        .err()
        .unwrap();
    assert_eq!(err.code(), ExecErrorCode::AeroEvaluationFailed);
}

// =============================================================================
// SKIP
// =============================================================================

#[test]
fn test_skip_discards_leading_rows() {
    let fx = Fixture::new();
    fx.insert_amounts(&sequential(10));

    let rows = run(&fx, &skip_of_orders(int(3)));
    assert_eq!(amounts(&rows), range(4, 10));

    let rows = run(&fx, &skip_of_orders(int(0)));
    assert_eq!(amounts(&rows), sequential(10));

    let rows = run(&fx, &skip_of_orders(null()));
    assert_eq!(amounts(&rows), sequential(10));
}

#[test]
fn test_skip_past_end_produces_nothing() {
    let fx = Fixture::new();
    fx.insert_amounts(&sequential(4));

    assert!(run(&fx, &skip_of_orders(int(4))).is_empty());
    assert!(run(&fx, &skip_of_orders(int(40))).is_empty());
}

#[test]
fn test_negative_skip_rejected() {
    let fx = Fixture::new();
    fx.insert_amounts(&sequential(5));

    let statement = skip_of_orders(int(-2));
    let err = StatementCursor::open(&statement, fx.request(&statement))
        .err()
        .unwrap();
    assert_eq!(err.code(), ExecErrorCode::AeroBadSkip);
}

/// Counts come from parameters, evaluated per request.
#[test]
fn test_counts_from_parameters() {
    let fx = Fixture::new();
    fx.insert_amounts(&sequential(10));

    let mut plan = PlanBuilder::new();
    let scan = orders_scan(&mut plan);
    let skipped = plan.skip(scan, Arc::new(Parameter(1)));
    let root = plan.first(skipped, Arc::new(Parameter(0)));
    let statement = plan.build(root);

    for (first, skip) in [(2, 0), (3, 5), (0, 1)] {
        let request = fx
            .request(&statement)
            .with_params(vec![Some(Value::Int(first)), Some(Value::Int(skip))]);
        let mut cursor = StatementCursor::open(&statement, request).unwrap();
        let rows = drain(&mut cursor).unwrap();
        assert_eq!(amounts(&rows), range(skip + 1, skip + first));
    }
}

// =============================================================================
// Composition
// =============================================================================

/// FIRST over SKIP and SKIP over FIRST for random counts.
#[test]
fn test_first_and_skip_compose() {
    let total = 30;
    let fx = Fixture::new();
    fx.insert_amounts(&sequential(total));

    let mut rng = StdRng::seed_from_u64(2024);
    for _ in 0..20 {
        let first = rng.gen_range(0..=total + 5);
        let skip = rng.gen_range(0..=total + 5);

        // first(skip(scan)): rows skip+1 ..= skip+first, clamped to the table
        let mut plan = PlanBuilder::new();
        let scan = orders_scan(&mut plan);
        let skipped = plan.skip(scan, int(skip));
        let root = plan.first(skipped, int(first));
        let rows = run(&fx, &plan.build(root));
        assert_eq!(amounts(&rows), range(skip + 1, (skip + first).min(total)));

        // skip(first(scan)): rows skip+1 ..= first, clamped to the table
        let mut plan = PlanBuilder::new();
        let scan = orders_scan(&mut plan);
        let limited = plan.first(scan, int(first));
        let root = plan.skip(limited, int(skip));
        let rows = run(&fx, &plan.build(root));
        assert_eq!(amounts(&rows), range(skip + 1, first.min(total)));
    }
}

/// Re-opening a statement restarts the count.
#[test]
fn test_reopen_restarts_count() {
    let fx = Fixture::new();
    fx.insert_amounts(&sequential(6));

    let statement = first_of_orders(int(2));
    for _ in 0..3 {
        assert_eq!(amounts(&run(&fx, &statement)), sequential(2));
    }
}

#[test]
fn test_limit_explain() {
    let statement = first_of_orders(int(5));
    let text = statement.explain().to_string();
    assert!(text.contains("-> First N Records"));
    assert!(text.contains("count: 5"));
    assert!(text.contains("-> Table Full Scan"));
    assert!(text.contains("table: ORDERS"));
}

// =============================================================================
// Conditional branch
// =============================================================================

fn branch_statement() -> Statement {
    let mut plan = PlanBuilder::new();
    let orders = orders_scan(&mut plan);
    let customers_stream = plan.stream();
    let customers = plan.full_scan(customers_stream, CUSTOMERS, "CUSTOMERS");
    let condition = Comparison::new(CompareOp::Eq, Parameter(0), Literal::int(1));
    let root = plan.branch(Arc::new(condition), orders, customers);
    plan.build(root)
}

fn run_with_param(fx: &Fixture, statement: &Statement, param: Option<Value>) -> Vec<i64> {
    let request = fx.request(statement).with_params(vec![param]);
    let mut cursor = StatementCursor::open(statement, request).unwrap();
    drain(&mut cursor)
        .unwrap()
        .iter()
        .filter_map(|row| row.field(0).and_then(|v| v.as_int()))
        .collect()
}

/// The condition picks one child per open; a NULL comparison is false.
#[test]
fn test_branch_selects_one_child() {
    let fx = Fixture::new();
    fx.insert_amounts(&sequential(3));
    for id in [100, 200] {
        fx.rows.insert(CUSTOMERS, vec![Some(Value::Int(id))]);
    }

    let statement = branch_statement();
    assert_eq!(run_with_param(&fx, &statement, Some(Value::Int(1))), vec![1, 2, 3]);
    assert_eq!(run_with_param(&fx, &statement, Some(Value::Int(0))), vec![100, 200]);
    assert_eq!(run_with_param(&fx, &statement, None), vec![100, 200]);
}

/// Same parameters always give the same branch, even across interleaved
/// requests on one statement.
#[test]
fn test_branch_is_deterministic() {
    let fx = Fixture::new();
    fx.insert_amounts(&sequential(4));
    fx.rows.insert(CUSTOMERS, vec![Some(Value::Int(7))]);

    let statement = branch_statement();
    let mut orders = StatementCursor::open(
        &statement,
        fx.request(&statement).with_params(vec![Some(Value::Int(1))]),
    )
    .unwrap();
    let mut customers = StatementCursor::open(
        &statement,
        fx.request(&statement).with_params(vec![Some(Value::Int(2))]),
    )
    .unwrap();

    let first_order = orders.fetch().unwrap().unwrap();
    let only_customer = customers.fetch().unwrap().unwrap();
    assert_eq!(first_order.field(0), Some(&Value::Int(1)));
    assert_eq!(only_customer.field(0), Some(&Value::Int(7)));
    assert!(customers.fetch().unwrap().is_none());
    assert_eq!(amounts(&drain(&mut orders).unwrap()), range(2, 4));

    assert_eq!(statement.used_streams().len(), 2);
}

/// A condition that cannot be evaluated fails the open.
#[test]
fn test_branch_condition_error() {
    let fx = Fixture::new();
    let statement = branch_statement();
    let request = fx
        .request(&statement)
        .with_params(vec![Some(Value::Text("one".to_string()))]);
    let err = StatementCursor::open(&statement, request).err().unwrap();
    assert_eq!(err.code(), ExecErrorCode::AeroEvaluationFailed);
}
