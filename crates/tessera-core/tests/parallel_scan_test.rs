//! Scan pipelines fanned out over the executor thread pool

mod common;

use common::{PEOPLE, TestDb, people, seq_scan, sorted};
use serial_test::serial;
use std::sync::atomic::Ordering;
use tessera_core::planner::{AggregateTerm, SortSpec};
use tessera_core::runtime::{AggregateKind, ExecutorThreadPool};
use tessera_core::types::CompareOp;
use tessera_core::{EngineConfig, Error, Expr, PlanNode, Value};

fn parallel_config() -> EngineConfig {
    EngineConfig::default()
        .with_parallel_scan(true)
        .with_tuples_per_tile_group(4)
        .with_vector_size(2)
}

fn parallel_db(rows: i32, workers: usize) -> Result<(TestDb, u32), Error> {
    let db = TestDb::new(parallel_config()).with_pool(ExecutorThreadPool::start(workers)?);
    let oid = db.create_table("people", PEOPLE)?;
    db.insert(oid, people(rows))?;
    Ok((db, oid))
}

#[test]
#[serial]
fn test_parallel_scan_sees_every_tile_group() -> Result<(), Error> {
    let (db, oid) = parallel_db(37, 3)?;
    assert_eq!(db.storage.table(oid)?.tile_group_count(), 10);

    let (processed, rows) = db.run(&seq_scan(oid, vec![0, 1, 2], None))?;
    assert_eq!(processed, 37);
    assert_eq!(sorted(rows), people(37));

    let pool = db.pool.as_ref().ok_or_else(|| Error::internal("no pool"))?;
    assert!(pool.stats().tasks_submitted.load(Ordering::Relaxed) >= 3);
    assert_eq!(pool.stats().tasks_failed.load(Ordering::Relaxed), 0);
    pool.shutdown();
    Ok(())
}

#[test]
#[serial]
fn test_parallel_filter_and_aggregate() -> Result<(), Error> {
    let (db, oid) = parallel_db(20, 4)?;
    let plan = PlanNode::Aggregate {
        child: Box::new(seq_scan(
            oid,
            vec![0, 2],
            Some(Expr::compare(CompareOp::GreaterThan, Expr::col(0), Expr::lit(Value::integer(5)))),
        )),
        group_by: Vec::new(),
        aggregates: vec![
            AggregateTerm::count_star(),
            AggregateTerm::of(AggregateKind::Sum, Expr::col(1)),
            AggregateTerm::of(AggregateKind::Min, Expr::col(0)),
        ],
    };
    let (_, rows) = db.run(&plan)?;
    // ids 6..=20, scores 60..=200
    let sum: i64 = (6..=20).map(|i| i * 10).sum();
    assert_eq!(rows, vec![vec![Value::bigint(15), Value::bigint(sum), Value::integer(6)]]);
    Ok(())
}

#[test]
#[serial]
fn test_parallel_grouped_aggregate_and_sort() -> Result<(), Error> {
    let (db, oid) = parallel_db(24, 3)?;
    let grouped = PlanNode::Aggregate {
        child: Box::new(seq_scan(oid, vec![0], None)),
        group_by: vec![Expr::arith(
            tessera_core::types::ArithOp::Modulo,
            Expr::col(0),
            Expr::lit(Value::integer(3)),
        )],
        aggregates: vec![AggregateTerm::count_star()],
    };
    let plan = PlanNode::OrderBy {
        child: Box::new(grouped),
        keys: vec![SortSpec {
            column: 0,
            descending: false,
        }],
    };
    let (_, rows) = db.run(&plan)?;
    assert_eq!(
        rows,
        vec![
            vec![Value::integer(0), Value::bigint(8)],
            vec![Value::integer(1), Value::bigint(8)],
            vec![Value::integer(2), Value::bigint(8)],
        ]
    );
    Ok(())
}

#[test]
#[serial]
fn test_parallel_plan_falls_back_without_pool() -> Result<(), Error> {
    let db = TestDb::new(parallel_config());
    let oid = db.create_table("people", PEOPLE)?;
    db.insert(oid, people(9))?;
    let (processed, rows) = db.run(&seq_scan(oid, vec![0, 1, 2], None))?;
    assert_eq!(processed, 9);
    assert_eq!(sorted(rows), people(9));
    Ok(())
}

#[test]
#[serial]
fn test_shut_down_pool_runs_serially() -> Result<(), Error> {
    let (db, oid) = parallel_db(6, 2)?;
    let pool = db.pool.clone().ok_or_else(|| Error::internal("no pool"))?;
    pool.shutdown();
    assert!(pool.is_shut_down());
    let (processed, _) = db.run(&seq_scan(oid, vec![0], None))?;
    assert_eq!(processed, 6);
    Ok(())
}
