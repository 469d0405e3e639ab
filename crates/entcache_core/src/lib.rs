//! # entcache
//!
//! Client-side, identity-mapped entity cache.
//!
//! This crate provides:
//! - Metadata describing entity types, keys, inheritance and relationships
//! - An [`EntityManager`] that keeps exactly one instance per entity key
//! - Change tracking with original values, accept and reject
//! - Relationship fixup in whatever order related entities arrive
//! - Temporary keys for new entities, remapped when the server assigns real ones
//! - Query result merging under configurable [`MergeStrategy`] rules
//! - A two-phase save pipeline over a pluggable [`SaveTransport`]
//! - Export and import of cache contents as JSON or CBOR bundles
//!
//! ## Design Principles
//!
//! - Entities are shared handles; equality is identity
//! - Bulk operations defer notifications until the cache is consistent
//! - No network code: queries and saves go through caller supplied transports
//!
//! ## Example
//!
//! ```rust
//! use entcache_core::{
//!     DataType, EntityManager, EntityState, EntityTypeDef, MergeStrategy, MetadataStore,
//!     AutoGeneratedKeyType,
//! };
//! use std::sync::Arc;
//!
//! let metadata = MetadataStore::builder("Sales")
//!     .entity_type(
//!         EntityTypeDef::new("Customer")
//!             .key("id", DataType::Int32)
//!             .property("name", DataType::String)
//!             .auto_generated_key(AutoGeneratedKeyType::Identity),
//!     )
//!     .build()
//!     .unwrap();
//! let manager = EntityManager::new(Arc::new(metadata));
//!
//! let customer = manager.create_entity("Customer", [("name", "Alfreds")]).unwrap();
//! manager
//!     .attach_entity(&customer, EntityState::Added, MergeStrategy::Disallowed)
//!     .unwrap();
//! assert!(customer.has_temp_key());
//! assert!(manager.has_changes());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bundle;
mod cache;
mod config;
mod context;
mod entity;
mod error;
mod events;
mod keygen;
mod loading;
mod manager;
mod metadata;
mod query;
mod save;
mod validation;
mod value;

pub use bundle::{
    EntityGroupExport, ExportBundle, ExportOptions, ExportedAspect, ImportOptions, ImportResult,
    RawEntityExport, SerializedKey,
};
pub use cache::{AttachOutcome, EntityGroup, UnattachedChildrenMap, UnattachedTuple};
pub use config::{
    DataService, FetchStrategy, ManagerConfig, QueryOptions, SaveOptions, ValidationOptions,
};
pub use entity::{
    values_string, Entity, EntityKey, EntityState, KeyFill, MergeStrategy, KEY_DELIMITER,
};
pub use error::{CacheError, CacheResult, ErrorKind};
pub use events::{DeferGuard, EntityAction, EntityChanged, EntityChangedFeed};
pub use keygen::{DefaultKeyGenerator, KeyGenerator};
pub use loading::{LoadingGuard, LoadingScope};
pub use manager::{EntityManager, EntityManagerBuilder};
pub use metadata::{
    AutoGeneratedKeyType, DataPropertyDef, DataType, EntityType, EntityTypeDef, ForeignKeyReference,
    InverseForeignKey, MetadataStore, MetadataStoreBuilder, NamingConvention, NavigationDef,
    NavigationKind, NavigationProperty, StoreDefinition, METADATA_VERSION,
};
pub use query::{
    EntityComparator, EntityPredicate, EntityProjection, EntityQuery, QueryFailure, QueryResponse,
    QueryResult, QueryTransport,
};
pub use save::{
    EntitySnapshot, KeyMapping, MockSaveTransport, PendingSave, RawEntity, SaveFailure, SaveRequest,
    SaveResponse, SaveResult, SaveTransport, ServerEntityError,
};
pub use validation::{
    EntityValidationFailure, FnValidator, ValidationError, ValidationOrigin, Validator,
};
pub use value::Value;
