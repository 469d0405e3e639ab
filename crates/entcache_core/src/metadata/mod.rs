//! Entity type metadata.
//!
//! A [`MetadataStore`] is built once from [`EntityTypeDef`]s. Building
//! validates the definitions, flattens inheritance and resolves the
//! [`NavigationKind`] of every navigation property so that relationship
//! linking never has to inspect navigation shapes again.

mod naming;
mod store;
mod types;

pub use naming::NamingConvention;
pub use store::{
    EntityType, ForeignKeyReference, InverseForeignKey, MetadataStore, MetadataStoreBuilder,
    NavigationKind, NavigationProperty, StoreDefinition, METADATA_VERSION,
};
pub use types::{AutoGeneratedKeyType, DataPropertyDef, DataType, EntityTypeDef, NavigationDef};
