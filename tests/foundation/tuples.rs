//! Integration tests for tuples, masks and seeds

use proptest::prelude::*;
use trellis_foundation::{Seed, Tuple, TupleMask, Value};

fn ints(values: &[i64]) -> Tuple {
    values.iter().copied().map(Value::Int).collect()
}

// =============================================================================
// Masks
// =============================================================================

#[test]
fn mask_reorders_columns() {
    let mask = TupleMask::new(vec![2, 0], 3);
    assert_eq!(mask.transform(&ints(&[1, 2, 3])), ints(&[3, 1]));
    assert_eq!(mask.source_arity(), 3);
}

#[test]
fn complementer_keeps_the_rest_in_order() {
    let mask = TupleMask::new(vec![1], 4);
    assert_eq!(mask.complementer().indices(), &[0, 2, 3]);
}

#[test]
fn empty_mask_yields_unit() {
    let mask = TupleMask::empty(3);
    assert_eq!(mask.transform(&ints(&[1, 2, 3])), Tuple::unit());
    assert!(mask.is_empty());
}

#[test]
fn join_row_shape() {
    // Secondary (b, c) joined on b: primary row followed by c.
    let secondary_key = TupleMask::new(vec![0], 2);
    let row = ints(&[1, 2]).unify(&ints(&[2, 3]), &secondary_key.complementer());
    assert_eq!(row, ints(&[1, 2, 3]));
}

// =============================================================================
// Seeds
// =============================================================================

#[test]
fn partially_bound_seed() {
    let seed = Seed::new(vec![Some(Value::Int(1)), None]);
    assert_eq!(seed.unbound_count(), 1);
    assert!(!seed.is_fully_bound());
    assert!(seed.matches(&ints(&[1, 9])));
    assert!(!seed.matches(&ints(&[2, 9])));
    assert!(!seed.matches(&ints(&[1])));
    assert_eq!(seed.bound_values(), ints(&[1]));
    assert_eq!(seed.bound_mask().indices(), &[0]);
}

#[test]
fn unbound_seed_matches_everything_of_its_arity() {
    let seed = Seed::unbound(2);
    assert!(seed.matches(&ints(&[5, 6])));
    assert!(!seed.matches(&ints(&[5, 6, 7])));
}

// =============================================================================
// Laws
// =============================================================================

fn row() -> impl Strategy<Value = Tuple> {
    prop::collection::vec(-5i64..5, 0..6).prop_map(|v| ints(&v))
}

proptest! {
    #[test]
    fn mask_then_complement_rebuilds_the_row(row in row(), bits in prop::collection::vec(any::<bool>(), 6)) {
        let mask = TupleMask::from_flags(&bits[..row.len()]);
        let rebuilt = mask.transform(&row).concat(&mask.complementer().transform(&row));
        let mut expected: Vec<Value> = mask.indices().iter().map(|&i| row.values()[i].clone()).collect();
        expected.extend(mask.complementer().indices().iter().map(|&i| row.values()[i].clone()));
        prop_assert_eq!(rebuilt, Tuple::from(expected));
    }

    #[test]
    fn concat_lengths_add(a in row(), b in row()) {
        prop_assert_eq!(a.concat(&b).len(), a.len() + b.len());
    }
}
