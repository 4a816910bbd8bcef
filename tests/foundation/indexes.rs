//! Integration tests for counted tuple memories and signature indexes

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use trellis_foundation::{ErrorKind, Timestamp, Tuple, TupleIndex, TupleMask, TupleMemory, Value};

fn pair(a: i64, b: i64) -> Tuple {
    Tuple::from(vec![Value::Int(a), Value::Int(b)])
}

#[test]
fn memory_keeps_earliest_timestamp() {
    let mut memory = TupleMemory::new();
    assert!(memory.insert(pair(1, 2), Timestamp(5)));
    assert!(!memory.insert(pair(1, 2), Timestamp(3)));
    assert_eq!(memory.get(&pair(1, 2)).map(|m| m.timestamp), Some(Timestamp(3)));
    assert_eq!(memory.count(&pair(1, 2)), 2);
}

#[test]
fn memory_revoke_of_absent_tuple_is_internal_error() {
    let mut memory = TupleMemory::new();
    let err = memory.remove(&pair(1, 1)).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::Internal(_)));
}

#[test]
fn index_groups_by_signature() {
    let mut index = TupleIndex::new(TupleMask::new(vec![0], 2));
    index.insert(pair(1, 2), Timestamp::ZERO);
    index.insert(pair(1, 3), Timestamp::ZERO);
    index.insert(pair(2, 3), Timestamp::ZERO);

    let one = Tuple::from(vec![Value::Int(1)]);
    assert_eq!(index.count_signature(&one), 2);
    assert_eq!(index.signatures().count(), 2);
    assert_eq!(index.len(), 3);

    let change = index.remove(&pair(1, 2)).unwrap();
    assert!(change.present_changed);
    assert!(!change.signature_changed);
    let change = index.remove(&pair(1, 3)).unwrap();
    assert!(change.signature_changed);
    assert!(index.get(&one).is_none());
}

#[test]
fn random_workload_matches_a_plain_multiset() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let mut index = TupleIndex::new(TupleMask::new(vec![1], 2));
    let mut live: Vec<Tuple> = Vec::new();

    for step in 0..500u64 {
        if live.is_empty() || rng.gen_bool(0.6) {
            let t = pair(rng.gen_range(0..5), rng.gen_range(0..5));
            index.insert(t.clone(), Timestamp(step));
            live.push(t);
        } else {
            let t = live.swap_remove(rng.gen_range(0..live.len()));
            index.remove(&t).unwrap();
        }
    }

    let mut distinct = live.clone();
    distinct.sort_by(|a, b| a.to_string().cmp(&b.to_string()));
    distinct.dedup();
    assert_eq!(index.len(), distinct.len());
    for t in &distinct {
        let expected = live.iter().filter(|x| *x == t).count();
        let signature = index.mask().transform(t);
        assert_eq!(index.get(&signature).map_or(0, |g| g.count(t)), expected);
    }
}
