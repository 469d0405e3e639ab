//! Property tests over random operation sequences.

use entcache_core::{Entity, EntityManager, EntityState, Value};
use entcache_testkit::prelude::*;
use proptest::prelude::*;
use std::collections::HashSet;

#[derive(Debug, Clone)]
enum Op {
    Edit(usize, String),
    Add(String),
    Delete(usize),
    Accept(usize),
    Reject(usize),
    Detach(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (any::<usize>(), customer_name()).prop_map(|(i, n)| Op::Edit(i, n)),
        2 => customer_name().prop_map(Op::Add),
        1 => any::<usize>().prop_map(Op::Delete),
        1 => any::<usize>().prop_map(Op::Accept),
        1 => any::<usize>().prop_map(Op::Reject),
        1 => any::<usize>().prop_map(Op::Detach),
    ]
}

fn pick(manager: &EntityManager, i: usize) -> Option<Entity> {
    let entities = manager.get_entities(None, None).ok()?;
    if entities.is_empty() {
        None
    } else {
        Some(entities[i % entities.len()].clone())
    }
}

fn apply(manager: &EntityManager, op: &Op) {
    match op {
        Op::Add(name) => {
            new_customer(manager, name);
        }
        Op::Edit(i, name) => {
            if let Some(e) = pick(manager, *i).filter(|e| e.get_value("name").is_some()) {
                e.set_value("name", name.as_str()).unwrap();
            }
        }
        Op::Delete(i) => {
            if let Some(e) = pick(manager, *i) {
                manager.set_deleted(&e).unwrap();
            }
        }
        Op::Accept(i) => {
            if let Some(e) = pick(manager, *i) {
                manager.accept_changes(&e).unwrap();
            }
        }
        Op::Reject(i) => {
            if let Some(e) = pick(manager, *i) {
                manager.reject_changes(&e).unwrap();
            }
        }
        Op::Detach(i) => {
            if let Some(e) = pick(manager, *i) {
                manager.detach_entity(&e).unwrap();
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn has_changes_matches_entity_states(ops in prop::collection::vec(op(), 1..40)) {
        let manager = sales_manager();
        for id in 1..=3 {
            attach_unchanged(&manager, "Customer", &[("id", id.into()), ("name", "Seed".into())]);
        }
        for op in &ops {
            apply(&manager, op);
            let changed = manager
                .get_entities(None, None)
                .unwrap()
                .iter()
                .any(|e| matches!(
                    e.entity_state(),
                    EntityState::Added | EntityState::Modified | EntityState::Deleted
                ));
            prop_assert_eq!(manager.has_changes(), changed, "after {:?}", op);
        }
    }

    #[test]
    fn temp_keys_are_distinct_and_gone_after_save(
        orders_per_customer in prop::collection::vec(0usize..4, 1..12),
    ) {
        let manager = sales_manager();
        let mut customers = Vec::new();
        let mut orders = Vec::new();
        for (i, count) in orders_per_customer.iter().enumerate() {
            let customer = new_customer(&manager, &format!("C{i}"));
            for _ in 0..*count {
                orders.push(new_order(&manager, &customer));
            }
            customers.push(customer);
        }

        let temp_ids: HashSet<Value> = customers.iter().filter_map(|c| c.get_value("id")).collect();
        prop_assert_eq!(temp_ids.len(), customers.len());
        prop_assert!(customers.iter().all(Entity::has_temp_key));

        let server = InMemorySaveServer::new(sales_metadata()).with_next_id("Customer", 1000);
        manager.save_changes(None, None, &server).unwrap();

        prop_assert!(!manager.has_changes());
        for order in &orders {
            prop_assert!(!order.has_temp_key());
            let customer_id = order.get_value("customerId").unwrap();
            prop_assert!(!temp_ids.contains(&customer_id));
            let customer = order.navigation("customer").unwrap();
            prop_assert_eq!(customer.get_value("id"), Some(customer_id));
        }
        for customer in &customers {
            prop_assert!(!customer.has_temp_key());
            prop_assert!(customer.get_value("id").and_then(|v| v.as_integer()).unwrap() >= 1000);
        }
    }
}
