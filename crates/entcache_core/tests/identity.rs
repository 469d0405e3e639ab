//! Integration tests for identity mapping, change tracking and notifications.

use entcache_core::{
    CacheError, EntityAction, EntityKey, EntityManager, EntityState, ErrorKind, MergeStrategy,
    Value,
};
use entcache_testkit::prelude::*;

fn drain(events: &std::sync::mpsc::Receiver<entcache_core::EntityChanged>) -> Vec<EntityAction> {
    events.try_iter().map(|e| e.action).collect()
}

#[test]
fn one_instance_per_key() {
    init_tracing();
    let manager = sales_manager();
    let first = attach_unchanged(
        &manager,
        "Customer",
        &[("id", 1.into()), ("name", "Alfreds".into())],
    );

    let duplicate = manager
        .create_entity("Customer", [("id", Value::from(1)), ("name", Value::from("Other"))])
        .unwrap();
    let cached = manager
        .attach_entity(&duplicate, EntityState::Unchanged, MergeStrategy::SkipMerge)
        .unwrap();

    assert_eq!(cached, first);
    assert_ne!(cached, duplicate);
    assert!(!duplicate.is_attached());
    assert_eq!(first.get_value("name"), Some(Value::from("Alfreds")));
    assert_eq!(manager.entity_count(), 1);
}

#[test]
fn attach_is_idempotent() {
    let manager = sales_manager();
    let events = manager.subscribe();
    let customer = new_customer(&manager, "Alfreds");
    assert_eq!(drain(&events), vec![EntityAction::Attach, EntityAction::EntityStateChange]);

    let again = manager
        .attach_entity(&customer, EntityState::Unchanged, MergeStrategy::Disallowed)
        .unwrap();
    assert_eq!(again, customer);
    assert_eq!(customer.entity_state(), EntityState::Added);
    assert!(drain(&events).is_empty());
    assert_eq!(manager.entity_count(), 1);
}

#[test]
fn subtype_found_through_base_type_key() {
    let manager = sales_manager();
    let preferred = attach_unchanged(
        &manager,
        "PreferredCustomer",
        &[("id", 3.into()), ("name", "Chop-suey".into()), ("discount", 10.into())],
    );
    let found = manager.get_entity_by_key("Customer", vec![Value::from(3)]).unwrap();
    assert_eq!(found, Some(preferred.clone()));

    assert!(manager
        .find_entity_by_key(&EntityKey::new("Customer", vec![Value::from(3)]))
        .is_some());
    assert_eq!(preferred.key().key_string(), "PreferredCustomer:::3");
}

#[test]
fn entity_of_another_manager_is_refused() {
    let a = sales_manager();
    let b = EntityManager::new(a.metadata().clone());
    let customer = new_customer(&a, "Alfreds");

    let err = b
        .attach_entity(&customer, EntityState::Unchanged, MergeStrategy::OverwriteChanges)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Attach);
    assert!(b.set_deleted(&customer).is_err());
    assert_eq!(b.entity_count(), 0);
}

#[test]
fn has_changes_follows_every_transition() {
    let manager = sales_manager();
    assert!(!manager.has_changes());

    let customer = attach_unchanged(
        &manager,
        "Customer",
        &[("id", 1.into()), ("name", "Alfreds".into())],
    );
    assert!(!manager.has_changes());

    customer.set_value("name", "Alfreds Futterkiste").unwrap();
    assert_eq!(customer.entity_state(), EntityState::Modified);
    assert!(manager.has_changes());

    manager.reject_changes(&customer).unwrap();
    assert_eq!(customer.get_value("name"), Some(Value::from("Alfreds")));
    assert!(!manager.has_changes());

    let added = new_customer(&manager, "Berglunds");
    assert!(manager.has_changes());
    manager.detach_entity(&added).unwrap();
    assert!(!manager.has_changes());

    manager.set_deleted(&customer).unwrap();
    assert!(manager.has_changes());
    manager.accept_changes(&customer).unwrap();
    assert!(!customer.is_attached());
    assert!(!manager.has_changes());
}

#[test]
fn modified_back_to_original_stays_modified() {
    let manager = sales_manager();
    let customer = attach_unchanged(
        &manager,
        "Customer",
        &[("id", 1.into()), ("name", "Alfreds".into())],
    );
    customer.set_value("name", "x").unwrap();
    customer.set_value("name", "Alfreds").unwrap();
    assert_eq!(customer.entity_state(), EntityState::Modified);
    assert_eq!(
        customer.original_values().get("name"),
        Some(&Value::from("Alfreds"))
    );
}

#[test]
fn key_of_attached_entity_is_immutable() {
    let manager = sales_manager();
    let customer = attach_unchanged(&manager, "Customer", &[("id", 1.into())]);
    let err = customer.set_value("id", 2).unwrap_err();
    assert!(matches!(err, CacheError::InvalidOperation { .. }));
    assert_eq!(customer.get_value("id"), Some(Value::from(1)));
}

#[test]
fn property_change_notifications() {
    let manager = sales_manager();
    let customer = attach_unchanged(
        &manager,
        "Customer",
        &[("id", 1.into()), ("name", "A".into())],
    );
    let events = manager.subscribe();

    customer.set_value("name", "B").unwrap();
    let received: Vec<_> = events.try_iter().collect();
    assert_eq!(received.len(), 2);
    assert_eq!(received[0].action, EntityAction::PropertyChange);
    assert_eq!(received[0].property_name.as_deref(), Some("name"));
    assert_eq!(received[0].old_value, Some(Value::from("A")));
    assert_eq!(received[0].new_value, Some(Value::from("B")));
    assert_eq!(received[1].action, EntityAction::EntityStateChange);
    assert!(received[0].sequence < received[1].sequence);
}

#[test]
fn clear_detaches_everything() {
    let manager = sales_manager();
    let customer = new_customer(&manager, "Alfreds");
    let order = new_order(&manager, &customer);
    let events = manager.subscribe();

    manager.clear();
    assert_eq!(manager.entity_count(), 0);
    assert!(!manager.has_changes());
    assert!(!customer.is_attached());
    assert!(!order.is_attached());
    assert!(order.navigation("customer").is_none());
    assert_eq!(drain(&events), vec![EntityAction::Clear]);

    // The generator is still usable after its keys were forgotten.
    let next = new_customer(&manager, "Berglunds");
    assert!(next.has_temp_key());
}

#[test]
fn get_entities_filters_types_and_states() {
    let manager = sales_manager();
    attach_unchanged(&manager, "Customer", &[("id", 1.into())]);
    attach_unchanged(&manager, "PreferredCustomer", &[("id", 2.into())]);
    let added = new_customer(&manager, "New");
    attach_unchanged(&manager, "Product", &[("id", 5.into())]);

    assert_eq!(manager.get_entities(Some(&["Customer"]), None).unwrap().len(), 3);
    assert_eq!(manager.get_entities(Some(&["PreferredCustomer"]), None).unwrap().len(), 1);
    assert_eq!(manager.get_entities(None, None).unwrap().len(), 4);
    assert_eq!(manager.get_changes(None).unwrap(), vec![added]);
    assert!(matches!(
        manager.get_entities(Some(&["Nope"]), None),
        Err(CacheError::UnknownEntityType { .. })
    ));
}
