//! Test fixtures and manager helpers.
//!
//! The sales domain covers every relationship shape the cache links:
//!
//! | Type | Key | Notes |
//! |---|---|---|
//! | `Customer` | `id` (identity) | `orders` collection, inverse of `Order.customer` |
//! | `PreferredCustomer` | inherited | subtype of `Customer` |
//! | `Order` | `id` (identity) | `customerId` FK, `rowVersion` concurrency token, `lines` |
//! | `OrderLine` | `orderId` + `lineNo` | composite key, unidirectional `product` |
//! | `Product` | `id` | client supplied key |
//! | `Region` | `id` | unidirectional `territories` via `Territory.regionId` |
//! | `Territory` | `id` | |
//! | `Person` | `id` | scalar `passport` backed by `Passport.personId` |
//! | `Passport` | `id` | |

use entcache_core::{
    AutoGeneratedKeyType, DataType, Entity, EntityManager, EntityState, EntityTypeDef,
    ManagerConfig, MergeStrategy, MetadataStore, NamingConvention, NavigationDef, RawEntity, Value,
};
use std::sync::Arc;

/// Name of the sales metadata store.
pub const SALES_STORE: &str = "Sales";

fn sales_types() -> Vec<EntityTypeDef> {
    vec![
        EntityTypeDef::new("Customer")
            .auto_generated_key(AutoGeneratedKeyType::Identity)
            .key("id", DataType::Int32)
            .property("name", DataType::String)
            .property("city", DataType::String)
            .navigation(NavigationDef::collection("orders", "Order").inverse("customer")),
        EntityTypeDef::new("PreferredCustomer")
            .base_type("Customer")
            .property("discount", DataType::Int32),
        EntityTypeDef::new("Order")
            .auto_generated_key(AutoGeneratedKeyType::Identity)
            .key("id", DataType::Int32)
            .property("customerId", DataType::Int32)
            .property("shipCity", DataType::String)
            .concurrency_property("rowVersion", DataType::Int32)
            .navigation(
                NavigationDef::scalar("customer", "Customer")
                    .foreign_keys(["customerId"])
                    .inverse("orders"),
            )
            .navigation(NavigationDef::collection("lines", "OrderLine").inverse("order")),
        EntityTypeDef::new("OrderLine")
            .key("orderId", DataType::Int32)
            .key("lineNo", DataType::Int32)
            .property("productId", DataType::Int32)
            .property("quantity", DataType::Int32)
            .navigation(
                NavigationDef::scalar("order", "Order")
                    .foreign_keys(["orderId"])
                    .inverse("lines"),
            )
            .navigation(NavigationDef::scalar("product", "Product").foreign_keys(["productId"])),
        EntityTypeDef::new("Product")
            .key("id", DataType::Int32)
            .property("name", DataType::String),
        EntityTypeDef::new("Region")
            .key("id", DataType::Int32)
            .property("name", DataType::String)
            .navigation(
                NavigationDef::collection("territories", "Territory")
                    .inverse_foreign_keys(["regionId"]),
            ),
        EntityTypeDef::new("Territory")
            .key("id", DataType::Int32)
            .property("regionId", DataType::Int32)
            .property("name", DataType::String),
        EntityTypeDef::new("Person")
            .key("id", DataType::Int32)
            .property("name", DataType::String)
            .navigation(
                NavigationDef::scalar("passport", "Passport").inverse_foreign_keys(["personId"]),
            ),
        EntityTypeDef::new("Passport")
            .key("id", DataType::Int32)
            .property("personId", DataType::Int32)
            .property("number", DataType::String),
    ]
}

fn build_store(naming: NamingConvention) -> Arc<MetadataStore> {
    let store = MetadataStore::builder(SALES_STORE).naming_convention(naming);
    let builder = sales_types().into_iter().fold(store, |b, t| b.entity_type(t));
    Arc::new(builder.build().expect("sales metadata is valid"))
}

/// The sales metadata with identical client and server property names.
pub fn sales_metadata() -> Arc<MetadataStore> {
    build_store(NamingConvention::None)
}

/// The sales metadata with `PascalCase` server property names.
pub fn camel_case_sales_metadata() -> Arc<MetadataStore> {
    build_store(NamingConvention::CamelCase)
}

/// A manager over fresh sales metadata.
pub fn sales_manager() -> EntityManager {
    EntityManager::new(sales_metadata())
}

/// A manager over `metadata` with `config`.
pub fn sales_manager_with(metadata: Arc<MetadataStore>, config: ManagerConfig) -> EntityManager {
    EntityManager::with_config(metadata, config)
}

/// Creates and attaches a new customer; it receives a temporary key.
pub fn new_customer(manager: &EntityManager, name: &str) -> Entity {
    manager
        .create_attached_entity("Customer", [("name", name)], EntityState::Added)
        .expect("customer attaches")
}

/// Creates and attaches a new order for `customer`.
pub fn new_order(manager: &EntityManager, customer: &Entity) -> Entity {
    let order = manager
        .create_attached_entity("Order", Vec::<(&str, Value)>::new(), EntityState::Added)
        .expect("order attaches");
    order
        .set_navigation("customer", Some(customer))
        .expect("customer navigation is settable");
    order
}

/// Attaches an unchanged entity as if it had been queried.
pub fn attach_unchanged(
    manager: &EntityManager,
    type_name: &str,
    values: &[(&str, Value)],
) -> Entity {
    let entity = manager
        .create_entity(type_name, values.iter().cloned())
        .expect("entity is creatable");
    manager
        .attach_entity(&entity, EntityState::Unchanged, MergeStrategy::Disallowed)
        .expect("entity attaches")
}

/// A server record for a customer.
pub fn customer_record(id: i32, name: &str) -> RawEntity {
    RawEntity::new("Customer").with("id", id).with("name", name)
}

/// A server record for an order.
pub fn order_record(id: i32, customer_id: i32, row_version: i32) -> RawEntity {
    RawEntity::new("Order")
        .with("id", id)
        .with("customerId", customer_id)
        .with("rowVersion", row_version)
}

/// A server record for an order line.
pub fn order_line_record(order_id: i32, line_no: i32, product_id: i32, quantity: i32) -> RawEntity {
    RawEntity::new("OrderLine")
        .with("orderId", order_id)
        .with("lineNo", line_no)
        .with("productId", product_id)
        .with("quantity", quantity)
}
