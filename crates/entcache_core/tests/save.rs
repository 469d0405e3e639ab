//! Integration tests for the save pipeline.

use entcache_core::{
    CacheError, EntityAction, EntityState, ErrorKind, FnValidator, KeyMapping, ManagerConfig,
    MockSaveTransport, SaveFailure, SaveOptions, SaveResponse, SaveTransport, ServerEntityError,
    ValidationError, ValidationOptions, Value,
};
use entcache_core::{Entity, EntityKey, EntityManager};
use entcache_testkit::prelude::*;
use std::sync::Arc;

#[test]
fn temp_keys_are_replaced_by_server_keys() {
    init_tracing();
    let manager = sales_manager();
    let customer = new_customer(&manager, "Alfreds");
    let order = new_order(&manager, &customer);
    let temp = customer.get_value("id").unwrap();
    assert!(customer.has_temp_key());
    assert_eq!(order.get_value("customerId"), Some(temp.clone()));

    let server = InMemorySaveServer::new(sales_metadata()).with_next_id("Customer", 7);
    let result = manager.save_changes(None, None, &server).unwrap();

    assert_eq!(result.key_mappings.len(), 2);
    assert_eq!(customer.get_value("id"), Some(Value::from(7)));
    assert!(!customer.has_temp_key());
    assert_eq!(customer.entity_state(), EntityState::Unchanged);
    assert_eq!(order.get_value("customerId"), Some(Value::from(7)));
    assert_eq!(order.navigation("customer"), Some(customer.clone()));
    assert_eq!(customer.collection("orders"), vec![order.clone()]);

    assert_eq!(
        manager.get_entity_by_key("Customer", vec![Value::from(7)]).unwrap(),
        Some(customer)
    );
    assert_eq!(manager.get_entity_by_key("Customer", vec![temp]).unwrap(), None);
    assert!(!manager.has_changes());
    assert_eq!(server.call_count(), 1);
}

#[test]
fn dependent_keys_follow_the_remap() {
    let manager = sales_manager();
    let order = new_order(&manager, &new_customer(&manager, "Alfreds"));
    let order_temp = order.get_value("id").unwrap();

    // An unchanged line whose composite key contains the order's temporary key.
    let line = attach_unchanged(
        &manager,
        "OrderLine",
        &[("orderId", order_temp.clone()), ("lineNo", 1.into()), ("quantity", 2.into())],
    );
    assert_eq!(line.navigation("order"), Some(order.clone()));

    let server = InMemorySaveServer::new(sales_metadata()).with_next_id("Order", 40);
    manager.save_changes(None, None, &server).unwrap();

    assert_eq!(order.get_value("id"), Some(Value::from(40)));
    assert_eq!(line.get_value("orderId"), Some(Value::from(40)));
    assert_eq!(line.entity_state(), EntityState::Unchanged);
    assert_eq!(
        manager
            .get_entity_by_key("OrderLine", vec![Value::from(40), Value::from(1)])
            .unwrap(),
        Some(line.clone())
    );
    assert_eq!(
        manager.get_entity_by_key("OrderLine", vec![order_temp, Value::from(1)]).unwrap(),
        None
    );
    assert_eq!(order.collection("lines"), vec![line]);
}

#[test]
fn saved_modification_accepts_and_bumps_concurrency() {
    let manager = sales_manager();
    let order = attach_unchanged(
        &manager,
        "Order",
        &[("id", 10.into()), ("customerId", 1.into()), ("rowVersion", 4.into())],
    );
    order.set_value("shipCity", "Berlin").unwrap();

    let pending = manager.begin_save(None, None).unwrap();
    let snapshot = &pending.request().entities[0];
    assert_eq!(snapshot.values.get("rowVersion"), Some(&Value::from(5)));
    assert_eq!(order.get_value("rowVersion"), Some(Value::from(4)));
    assert!(order.is_being_saved());

    // The server answers without echoing the entity.
    let result = manager.complete_save(pending, Ok(SaveResponse::default())).unwrap();
    assert_eq!(result.entities, vec![order.clone()]);
    assert_eq!(order.entity_state(), EntityState::Unchanged);
    assert_eq!(order.get_value("rowVersion"), Some(Value::from(5)));
    assert!(!order.is_being_saved());
    assert!(order.original_values().is_empty());
}

#[test]
fn saved_delete_detaches() {
    let manager = sales_manager();
    let product = attach_unchanged(&manager, "Product", &[("id", 5.into())]);
    manager.set_deleted(&product).unwrap();
    let events = manager.subscribe();

    let server = InMemorySaveServer::new(sales_metadata());
    let result = manager.save_changes(None, None, &server).unwrap();
    assert_eq!(result.entities, vec![product.clone()]);
    assert!(!product.is_attached());
    assert_eq!(manager.entity_count(), 0);
    assert!(events.try_iter().any(|e| e.action == EntityAction::Detach));
}

#[test]
fn overlapping_save_is_rejected_before_the_network() {
    let manager = sales_manager();
    let customer = new_customer(&manager, "Alfreds");
    let server = InMemorySaveServer::new(sales_metadata());

    let pending = manager.begin_save(None, None).unwrap();
    let err = manager.save_changes(Some(&[customer.clone()]), None, &server).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Concurrency);
    assert!(matches!(&err, CacheError::ConcurrentSave { keys } if keys.len() == 1));
    assert_eq!(server.call_count(), 0);

    let allowed = SaveOptions::default().allow_concurrent_saves(true);
    let second = manager.begin_save(Some(&[customer.clone()]), Some(allowed)).unwrap();
    assert_eq!(second.entities(), &[customer.clone()]);

    let response = server.save_changes(pending.request());
    manager.complete_save(pending, response).unwrap();
    assert!(!customer.has_temp_key());
}

#[test]
fn failed_save_leaves_cache_untouched() {
    let manager = sales_manager();
    let customer = new_customer(&manager, "Alfreds");
    let order = new_order(&manager, &customer);
    let temp = customer.get_value("id").unwrap();

    let server = InMemorySaveServer::new(sales_metadata());
    server.fail_next(SaveFailure::new("deadlock").with_entity_error(ServerEntityError {
        entity_type_name: "Customer".into(),
        key_values: vec![temp.clone()],
        error_name: "Unique".into(),
        error_message: "name already taken".into(),
        property_name: Some("name".into()),
    }));

    let err = manager.save_changes(None, None, &server).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ServerSave);
    assert_eq!(customer.get_value("id"), Some(temp.clone()));
    assert!(customer.has_temp_key());
    assert_eq!(customer.entity_state(), EntityState::Added);
    assert_eq!(order.get_value("customerId"), Some(temp));
    assert!(!customer.is_being_saved());
    assert!(manager.has_changes());

    let errors = customer.validation_errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].property_name.as_deref(), Some("name"));

    // Retrying succeeds and clears the server errors.
    manager.save_changes(None, None, &server).unwrap();
    assert!(customer.validation_errors().is_empty());
    assert!(!manager.has_changes());
}

#[test]
fn client_validation_blocks_the_save() {
    let metadata = sales_metadata();
    let manager = EntityManager::builder(metadata.clone())
        .config(
            ManagerConfig::new()
                .validation_options(ValidationOptions::default().validate_on_save(true)),
        )
        .validator(Arc::new(FnValidator(|entity: &Entity| {
            match entity.get_value("name") {
                Some(Value::Null) => vec![
                    ValidationError::client("required", "name is required").with_property("name"),
                ],
                _ => Vec::new(),
            }
        })))
        .build();
    let customer = manager
        .create_attached_entity("Customer", Vec::<(&str, Value)>::new(), EntityState::Added)
        .unwrap();

    let transport = MockSaveTransport::new();
    let err = manager.save_changes(None, None, &transport).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ClientValidation);
    assert_eq!(transport.call_count(), 0);
    assert!(!customer.is_being_saved());
    assert_eq!(customer.validation_errors().len(), 1);
}

#[test]
fn empty_save_makes_no_call() {
    let manager = sales_manager();
    attach_unchanged(&manager, "Product", &[("id", 5.into())]);
    let transport = MockSaveTransport::new();
    let result = manager.save_changes(None, None, &transport).unwrap();
    assert!(result.entities.is_empty());
    assert_eq!(transport.call_count(), 0);
}

#[test]
fn scripted_response_with_mapping_and_echo() {
    let manager = sales_manager();
    let customer = new_customer(&manager, "Alfreds");
    let temp = customer.get_value("id").unwrap();

    let transport = MockSaveTransport::new();
    transport.push_response(SaveResponse {
        entities: vec![customer_record(21, "Alfreds Futterkiste")],
        key_mappings: vec![KeyMapping {
            entity_type_name: "Customer".into(),
            temp_value: temp,
            real_value: Value::from(21),
        }],
    });
    let events = manager.subscribe();
    manager.save_changes(None, None, &transport).unwrap();

    assert_eq!(customer.get_value("id"), Some(Value::from(21)));
    assert_eq!(customer.get_value("name"), Some(Value::from("Alfreds Futterkiste")));
    assert_eq!(customer.entity_state(), EntityState::Unchanged);
    let actions: Vec<_> = events.try_iter().map(|e| e.action).collect();
    assert_eq!(actions, vec![EntityAction::MergeOnSave]);
    assert_eq!(transport.requests()[0].entities[0].entity_state, EntityState::Added);
}

#[test]
fn pending_save_of_another_manager_is_refused() {
    let a = sales_manager();
    let b = sales_manager();
    new_customer(&a, "Alfreds");
    let pending = a.begin_save(None, None).unwrap();
    assert!(matches!(
        b.complete_save(pending, Ok(SaveResponse::default())),
        Err(CacheError::InvalidOperation { .. })
    ));
}

#[test]
fn server_key_colliding_with_a_cached_entity_is_refused() {
    let manager = sales_manager();
    let existing = attach_unchanged(
        &manager,
        "Customer",
        &[("id", 21.into()), ("name", "Bólido".into())],
    );
    let customer = new_customer(&manager, "Alfreds");
    let temp = customer.get_value("id").unwrap();

    let transport = MockSaveTransport::new();
    transport.push_response(SaveResponse {
        entities: Vec::new(),
        key_mappings: vec![KeyMapping {
            entity_type_name: "Customer".into(),
            temp_value: temp.clone(),
            real_value: Value::from(21),
        }],
    });
    let err = manager.save_changes(None, None, &transport).unwrap_err();
    assert!(matches!(err, CacheError::InvalidOperation { .. }));

    assert_eq!(customer.get_value("id"), Some(temp.clone()));
    assert!(customer.has_temp_key());
    assert_eq!(customer.entity_state(), EntityState::Added);
    assert_eq!(manager.find_entity_by_key(&EntityKey::single("Customer", 21)), Some(existing));
    assert_eq!(manager.find_entity_by_key(&EntityKey::single("Customer", temp)), Some(customer));
}
