//! Runtime support objects exercised with randomized input

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tessera_core::proxy::Tuple;
use tessera_core::runtime::hash::hash_key;
use tessera_core::runtime::{CCHashTable, CountDown, Sorter};
use tessera_core::{Error, TypeId, Value};

#[test]
fn test_hash_table_probe_returns_every_duplicate() -> Result<(), Error> {
    let mut rng = StdRng::seed_from_u64(7);
    let mut table = CCHashTable::default();
    // few buckets so unrelated keys share chains
    table.init(4);

    let mut expected: HashMap<i32, usize> = HashMap::new();
    for _ in 0..500 {
        let key = rng.gen_range(0..40);
        let hash = hash_key(&[Value::integer(key)]);
        table.insert(hash, Tuple::new(vec![Value::integer(key), Value::varchar("payload")]))?;
        *expected.entry(key).or_default() += 1;
    }
    assert_eq!(table.num_elements(), 500);

    for (key, count) in expected {
        let matches = table.probe(hash_key(&[Value::integer(key)]))?;
        assert_eq!(matches.len(), count, "key {key}");
        assert!(matches.iter().all(|t| t.values()[0] == Value::integer(key)));
    }
    Ok(())
}

#[test]
fn test_sorter_matches_reference_order() -> Result<(), Error> {
    let mut rng = StdRng::seed_from_u64(11);
    let mut rows = Vec::new();
    for i in 0..300 {
        let group = if rng.gen_bool(0.1) {
            Value::null(TypeId::Integer)
        } else {
            Value::integer(rng.gen_range(0..10))
        };
        rows.push(vec![group, Value::bigint(rng.gen_range(-50..50)), Value::integer(i)]);
    }

    let mut sorter = Sorter::default();
    sorter.init(vec![0, 1], vec![false, true])?;
    for row in &rows {
        sorter.append(Tuple::new(row.clone()))?;
    }
    sorter.sort();

    rows.sort_by(|a, b| a[0].sort_cmp(&b[0]).then_with(|| b[1].sort_cmp(&a[1])));
    assert_eq!(sorter.num_rows(), 300);
    for (i, row) in rows.iter().enumerate() {
        let got = sorter.row(i as u32)?;
        assert_eq!(got.values()[..2], row[..2]);
    }
    // nulls first in ascending order
    assert!(sorter.row(0)?.values()[0].is_null());
    Ok(())
}

#[test]
fn test_count_down_joins_worker_threads() {
    let mut latch = CountDown::default();
    latch.init(8);
    let latch = Arc::new(latch);
    let workers: Vec<_> = (0..8)
        .map(|i| {
            let latch = latch.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(i * 2));
                latch.decrease();
            })
        })
        .collect();
    assert!(latch.wait_timeout(Duration::from_secs(10)));
    assert_eq!(latch.remaining(), 0);
    for worker in workers {
        worker.join().expect("worker panicked");
    }
}
