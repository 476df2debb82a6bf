//! Tuple ownership, visibility and version installation as seen through
//! compiled DML and the transaction manager directly.

mod common;

use common::{TestDb, ints, seq_scan};
use tessera_core::concurrency::{IsolationLevel, ResultType};
use tessera_core::planner::{IndexLookup, PlanNode};
use tessera_core::proxy::Tuple;
use tessera_core::runtime::BloomFilter;
use tessera_core::storage::{IndexKind, ItemPointer};
use tessera_core::types::{ArithOp, CompareOp};
use tessera_core::{Error, Expr, TypeId, Value};

const FIVE: &[(&str, TypeId)] = &[
    ("a", TypeId::Integer),
    ("b", TypeId::Integer),
    ("c", TypeId::Varchar),
    ("d", TypeId::Decimal),
    ("e", TypeId::BigInt),
];

fn five_row(a: i32) -> Vec<Value> {
    vec![
        Value::integer(a),
        Value::integer(a * 10),
        Value::varchar(format!("row{a}")),
        Value::decimal(f64::from(a) / 2.0),
        Value::bigint(i64::from(a) * 1000),
    ]
}

fn delete_where_a(oid: u32, a: i32) -> PlanNode {
    PlanNode::Delete {
        table_oid: oid,
        child: Box::new(seq_scan(
            oid,
            vec![0],
            Some(Expr::eq(Expr::col(0), Expr::lit(Value::integer(a)))),
        )),
    }
}

fn bump_b_where_a(oid: u32, a: i32) -> PlanNode {
    PlanNode::Update {
        table_oid: oid,
        child: Box::new(seq_scan(
            oid,
            vec![0, 1, 2, 3, 4],
            Some(Expr::eq(Expr::col(0), Expr::lit(Value::integer(a)))),
        )),
        targets: vec![(1, Expr::arith(ArithOp::Add, Expr::col(1), Expr::lit(Value::integer(1))))],
    }
}

#[test]
fn test_delete_own_insert_in_place() -> Result<(), Error> {
    let db = TestDb::serial();
    let oid = db.create_table("t", FIVE)?;
    let table = db.storage.table(oid)?;

    let txn = db.begin();
    let insert = PlanNode::Insert {
        table_oid: oid,
        source: tessera_core::planner::InsertSource::Values(vec![
            five_row(1).into_iter().map(Expr::lit).collect(),
        ]),
    };
    assert_eq!(db.run_in(&txn, &insert)?.0, 1);
    assert_eq!(table.slots_used(), 1);

    let (processed, _) = db.run_in(&txn, &delete_where_a(oid, 1))?;
    assert_eq!(processed, 1);
    // the sole owner and creator deletes in place: no marker version
    assert_eq!(table.slots_used(), 1);
    assert_eq!(txn.result(), ResultType::Success);
    assert_eq!(db.commit(&txn)?, ResultType::Success);

    assert!(db.scan_sorted(oid)?.is_empty());
    Ok(())
}

#[test]
fn test_delete_of_committed_row_links_marker() -> Result<(), Error> {
    let db = TestDb::serial();
    let oid = db.create_table("t", FIVE)?;
    db.insert(oid, vec![five_row(1), five_row(2)])?;
    let table = db.storage.table(oid)?;

    assert_eq!(db.run(&delete_where_a(oid, 1))?.0, 1);
    assert_eq!(table.slots_used(), 3);
    assert_eq!(db.scan_sorted(oid)?, vec![five_row(2)]);
    Ok(())
}

#[test]
fn test_delete_blocked_by_concurrent_writer() -> Result<(), Error> {
    let db = TestDb::serial();
    let oid = db.create_table("t", FIVE)?;
    db.insert(oid, vec![five_row(1)])?;

    let writer = db.begin();
    assert_eq!(db.run_in(&writer, &bump_b_where_a(oid, 1))?.0, 1);

    let deleter = db.begin_with(IsolationLevel::ReadCommitted);
    let (processed, _) = db.run_in(&deleter, &delete_where_a(oid, 1))?;
    assert_eq!(processed, 0);
    assert_eq!(deleter.result(), ResultType::Failure);
    assert_eq!(db.commit(&deleter)?, ResultType::Aborted);

    assert_eq!(db.commit(&writer)?, ResultType::Success);
    let mut expected = five_row(1);
    expected[1] = Value::integer(11);
    assert_eq!(db.scan_sorted(oid)?, vec![expected]);
    Ok(())
}

#[test]
fn test_update_two_of_five_columns_copies_the_rest() -> Result<(), Error> {
    let db = TestDb::serial();
    let oid = db.create_table("t", FIVE)?;
    db.insert(oid, vec![five_row(3)])?;
    let table = db.storage.table(oid)?;
    let before = db.begin();

    let plan = PlanNode::Update {
        table_oid: oid,
        child: Box::new(seq_scan(oid, vec![0, 1, 2, 3, 4], None)),
        targets: vec![
            (1, Expr::lit(Value::integer(99))),
            (3, Expr::arith(ArithOp::Multiply, Expr::col(3), Expr::lit(Value::decimal(4.0)))),
        ],
    };
    let updater = db.begin();
    assert_eq!(db.run_in(&updater, &plan)?.0, 1);
    assert_eq!(table.slots_used(), 2);
    assert_eq!(db.commit(&updater)?, ResultType::Success);

    let mut expected = five_row(3);
    expected[1] = Value::integer(99);
    expected[3] = Value::decimal(6.0);
    assert_eq!(db.scan_sorted(oid)?, vec![expected]);

    // a snapshot taken before the update still reads the old version
    let (_, rows) = db.run_in(&before, &seq_scan(oid, vec![0, 1, 2, 3, 4], None))?;
    assert_eq!(rows, vec![five_row(3)]);
    db.commit(&before)?;
    Ok(())
}

#[test]
fn test_update_twice_in_one_transaction_reuses_version() -> Result<(), Error> {
    let db = TestDb::serial();
    let oid = db.create_table("t", FIVE)?;
    db.insert(oid, vec![five_row(1)])?;
    let table = db.storage.table(oid)?;

    let txn = db.begin();
    assert_eq!(db.run_in(&txn, &bump_b_where_a(oid, 1))?.0, 1);
    assert_eq!(db.run_in(&txn, &bump_b_where_a(oid, 1))?.0, 1);
    // the second update rewrites the version this transaction created
    assert_eq!(table.slots_used(), 2);
    db.commit(&txn)?;

    let (_, rows) = db.run(&seq_scan(oid, vec![1], None))?;
    assert_eq!(rows, vec![ints(&[12])]);
    Ok(())
}

#[test]
fn test_abort_restores_previous_version() -> Result<(), Error> {
    let db = TestDb::serial();
    let oid = db.create_table("t", FIVE)?;
    db.insert(oid, vec![five_row(1), five_row(2)])?;

    let txn = db.begin();
    db.run_in(&txn, &bump_b_where_a(oid, 1))?;
    db.run_in(&txn, &delete_where_a(oid, 2))?;
    assert_eq!(db.txn_manager.abort_transaction(&txn)?, ResultType::Aborted);

    assert_eq!(db.scan_sorted(oid)?, vec![five_row(1), five_row(2)]);
    Ok(())
}

#[test]
fn test_uncommitted_insert_is_invisible_to_others() -> Result<(), Error> {
    let db = TestDb::serial();
    let oid = db.create_table("t", FIVE)?;
    let writer = db.begin();
    let insert = PlanNode::Insert {
        table_oid: oid,
        source: tessera_core::planner::InsertSource::Values(vec![
            five_row(7).into_iter().map(Expr::lit).collect(),
        ]),
    };
    db.run_in(&writer, &insert)?;

    let reader = db.begin();
    assert!(db.run_in(&reader, &seq_scan(oid, vec![0], None))?.1.is_empty());
    assert_eq!(db.run_in(&writer, &seq_scan(oid, vec![0], None))?.1, vec![ints(&[7])]);
    db.commit(&writer)?;
    db.commit(&reader)?;
    Ok(())
}

#[test]
fn test_later_reader_blocks_earlier_writer() -> Result<(), Error> {
    let db = TestDb::serial();
    let oid = db.create_table("t", FIVE)?;
    db.insert(oid, vec![five_row(1)])?;
    let tile_group = db
        .storage
        .table(oid)?
        .tile_group(0)
        .ok_or_else(|| Error::internal("missing tile group"))?;
    let header = tile_group.header();
    let location = ItemPointer::new(tile_group.id(), 0);

    let early = db.begin();
    let late = db.begin();
    assert!(db.txn_manager.perform_read(&late, location, false)?);
    assert!(db.txn_manager.is_ownable(&early, header, 0));
    assert!(!db.txn_manager.acquire_ownership(&early, header, 0));
    assert_eq!(early.result(), ResultType::Failure);

    assert!(db.txn_manager.acquire_ownership(&late, header, 0));
    assert!(db.txn_manager.is_owner(&late, header, 0));
    assert!(!db.txn_manager.is_written(&late, header, 0));
    db.txn_manager.yield_ownership(&late, header, 0);
    assert!(!db.txn_manager.is_owner(&late, header, 0));
    Ok(())
}

#[test]
fn test_select_for_update_takes_ownership() -> Result<(), Error> {
    let db = TestDb::serial();
    let oid = db.create_table("t", FIVE)?;
    db.insert(oid, vec![five_row(1)])?;
    let tile_group = db
        .storage
        .table(oid)?
        .tile_group(0)
        .ok_or_else(|| Error::internal("missing tile group"))?;
    let location = ItemPointer::new(tile_group.id(), 0);

    let first = db.begin();
    assert!(db.txn_manager.perform_read(&first, location, true)?);
    assert!(db.txn_manager.is_owner(&first, tile_group.header(), 0));

    let second = db.begin();
    assert!(!db.txn_manager.perform_read(&second, location, true)?);

    // commit releases the read lock
    assert_eq!(db.commit(&first)?, ResultType::Success);
    assert!(!db.txn_manager.is_owner(&first, tile_group.header(), 0));
    Ok(())
}

fn set_a_where_a(oid: u32, from: i32, to: i32) -> PlanNode {
    PlanNode::Update {
        table_oid: oid,
        child: Box::new(seq_scan(
            oid,
            vec![0, 1, 2, 3, 4],
            Some(Expr::eq(Expr::col(0), Expr::lit(Value::integer(from)))),
        )),
        targets: vec![(0, Expr::lit(Value::integer(to)))],
    }
}

fn lookup_a(oid: u32, a: i32) -> PlanNode {
    PlanNode::IndexScan {
        table_oid: oid,
        index_offset: 0,
        lookup: IndexLookup::Point(vec![Expr::lit(Value::integer(a))]),
        predicate: None,
        columns: vec![0, 1],
    }
}

fn keyed_table(db: &TestDb, rows: &[i32]) -> Result<u32, Error> {
    let oid = db.create_table("t", FIVE)?;
    db.storage.table(oid)?.add_index("t_pk", IndexKind::Primary, vec![0])?;
    db.insert(oid, rows.iter().map(|&a| five_row(a)).collect())?;
    Ok(oid)
}

#[test]
fn test_primary_key_update_moves_the_row() -> Result<(), Error> {
    let db = TestDb::serial();
    let oid = keyed_table(&db, &[1, 2, 3])?;

    let txn = db.begin();
    assert_eq!(db.run_in(&txn, &set_a_where_a(oid, 2, 20))?.0, 1);
    assert_eq!(db.commit(&txn)?, ResultType::Success);

    let mut moved = five_row(2);
    moved[0] = Value::integer(20);
    assert_eq!(db.scan_sorted(oid)?, vec![five_row(1), five_row(3), moved]);
    assert!(db.run(&lookup_a(oid, 2))?.1.is_empty());
    assert_eq!(db.run(&lookup_a(oid, 20))?.1, vec![ints(&[20, 20])]);
    Ok(())
}

#[test]
fn test_primary_key_update_onto_existing_key_aborts() -> Result<(), Error> {
    let db = TestDb::serial();
    let oid = keyed_table(&db, &[1, 2, 3])?;

    let txn = db.begin();
    assert_eq!(db.run_in(&txn, &set_a_where_a(oid, 2, 3))?.0, 0);
    assert_eq!(txn.result(), ResultType::Failure);
    assert_eq!(db.commit(&txn)?, ResultType::Aborted);

    assert_eq!(db.scan_sorted(oid)?, vec![five_row(1), five_row(2), five_row(3)]);
    assert_eq!(db.run(&lookup_a(oid, 2))?.1, vec![ints(&[2, 20])]);
    assert_eq!(db.run(&lookup_a(oid, 3))?.1, vec![ints(&[3, 30])]);
    Ok(())
}

/// Run `plan` with the table full; the transaction must fail and leave the
/// row free for others to own
fn assert_full_table_yields_ownership(plan: fn(u32, i32) -> PlanNode) -> Result<(), Error> {
    let db = TestDb::serial();
    let oid = db.create_table("t", FIVE)?;
    db.insert(oid, vec![five_row(1)])?;
    let table = db.storage.table(oid)?;
    table.set_slot_limit(Some(table.slots_used()));
    let plan = plan(oid, 1);

    let txn = db.begin();
    let (processed, _) = db.run_in(&txn, &plan)?;
    assert_eq!(processed, 0);
    assert_eq!(txn.result(), ResultType::Failure);

    let tile_group = table
        .tile_group(0)
        .ok_or_else(|| Error::internal("missing tile group"))?;
    let header = tile_group.header();
    assert!(!db.txn_manager.is_owner(&txn, header, 0));
    let other = db.begin();
    assert!(db.txn_manager.acquire_ownership(&other, header, 0));
    db.txn_manager.yield_ownership(&other, header, 0);
    db.txn_manager.abort_transaction(&other)?;

    assert_eq!(db.commit(&txn)?, ResultType::Aborted);
    table.set_slot_limit(None);
    assert_eq!(table.slots_used(), 1);
    assert_eq!(db.scan_sorted(oid)?, vec![five_row(1)]);
    Ok(())
}

#[test]
fn test_delete_without_marker_slot_yields_ownership() -> Result<(), Error> {
    assert_full_table_yields_ownership(delete_where_a)
}

#[test]
fn test_update_without_version_slot_yields_ownership() -> Result<(), Error> {
    assert_full_table_yields_ownership(bump_b_where_a)
}

#[test]
fn test_bloom_filter_false_positive_is_expected() {
    let mut filter = BloomFilter::default();
    filter.init(8);
    let key = |i: i32| Tuple::new(vec![Value::integer(i)]);
    filter.add_key(key(1));
    assert!(filter.contains_key(key(1)));

    // with 8 bits some unrelated key lands on both set bits
    let colliding = (2..10_000).find(|&i| filter.contains_key(key(i)));
    assert!(colliding.is_some());
}

#[test]
fn test_compare_of_null_key_never_matches() -> Result<(), Error> {
    let db = TestDb::serial();
    let oid = db.create_table("t", &[("k", TypeId::Integer)])?;
    db.insert(oid, vec![vec![Value::null(TypeId::Integer)], vec![Value::integer(1)]])?;
    let plan = seq_scan(
        oid,
        vec![0],
        Some(Expr::compare(CompareOp::Equal, Expr::col(0), Expr::col(0))),
    );
    assert_eq!(db.run(&plan)?.1, vec![ints(&[1])]);
    Ok(())
}
