//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random test data
//! that maintains required invariants.

use crate::fixtures::{customer_record, order_line_record, order_record};
use entcache_core::{EntityState, MergeStrategy, RawEntity};
use proptest::prelude::*;

/// Strategy for generating merge strategies that never error on collision.
pub fn merging_strategy() -> impl Strategy<Value = MergeStrategy> {
    prop_oneof![
        Just(MergeStrategy::OverwriteChanges),
        Just(MergeStrategy::PreserveChanges),
        Just(MergeStrategy::SkipMerge),
    ]
}

/// Strategy for generating any merge strategy.
pub fn merge_strategy() -> impl Strategy<Value = MergeStrategy> {
    prop_oneof![Just(MergeStrategy::Disallowed), merging_strategy()]
}

/// Strategy for generating states an entity can be attached in.
pub fn attached_state() -> impl Strategy<Value = EntityState> {
    prop_oneof![
        Just(EntityState::Added),
        Just(EntityState::Unchanged),
        Just(EntityState::Modified),
        Just(EntityState::Deleted),
    ]
}

/// Strategy for generating customer names.
pub fn customer_name() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-z]{1,11}").expect("Invalid regex")
}

/// Strategy for generating a small related graph of records: customers,
/// their orders and the orders' lines, in some arrival order.
///
/// Keys are unique within the graph and every foreign key refers to a
/// record in it.
pub fn related_records() -> impl Strategy<Value = Vec<RawEntity>> {
    (1..4usize, 0..4usize, 0..3usize)
        .prop_flat_map(|(customers, orders_per_customer, lines_per_order)| {
            let mut records = Vec::new();
            let mut order_id = 100;
            for c in 1..=customers as i32 {
                records.push(customer_record(c, &format!("Customer {c}")));
                for _ in 0..orders_per_customer {
                    order_id += 1;
                    records.push(order_record(order_id, c, 1));
                    for line in 1..=lines_per_order as i32 {
                        records.push(order_line_record(order_id, line, 1, line));
                    }
                }
            }
            Just(records).prop_shuffle()
        })
}

/// Strategy for generating a permutation of `0..len`.
pub fn permutation(len: usize) -> impl Strategy<Value = Vec<usize>> {
    Just((0..len).collect::<Vec<_>>()).prop_shuffle()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    proptest! {
        #[test]
        fn related_records_have_unique_keys(records in related_records()) {
            let keys: HashSet<String> = records
                .iter()
                .map(|r| {
                    let key = ["id", "orderId", "lineNo"].map(|k| r.values.get(k).cloned());
                    match r.entity_type_name.as_str() {
                        "OrderLine" => format!("OrderLine:{:?}:{:?}", key[1], key[2]),
                        other => format!("{other}:{:?}", key[0]),
                    }
                })
                .collect();
            prop_assert_eq!(keys.len(), records.len());
        }

        #[test]
        fn permutation_is_complete(mut p in permutation(6)) {
            p.sort_unstable();
            prop_assert_eq!(p, (0..6).collect::<Vec<_>>());
        }
    }
}
