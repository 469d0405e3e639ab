//! Resolved metadata store.

use super::naming::NamingConvention;
use super::types::{AutoGeneratedKeyType, DataPropertyDef, EntityTypeDef, NavigationDef};
use crate::error::{CacheError, CacheResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Version of the metadata format embedded in export bundles.
pub const METADATA_VERSION: &str = "1.0.5";

/// Shape of a navigation property, resolved once when the store is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationKind {
    /// Scalar reference with an inverse navigation on the target.
    ScalarBidirectional {
        /// Inverse navigation property on the target type.
        inverse: String,
    },
    /// Collection with a scalar inverse on the target.
    CollectionBidirectional {
        /// Inverse navigation property on the target type.
        inverse: String,
    },
    /// Scalar reference to a parent, no inverse; the foreign key lives here.
    ScalarUnidirectionalChildToParent,
    /// Collection of children, no inverse; the foreign keys live on the children.
    CollectionUnidirectionalParentToChild,
    /// Scalar reference without inverse whose foreign key lives on the target.
    ForeignKeyOnlyUnidirectional,
}

/// A resolved navigation property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationProperty {
    /// Property name.
    pub name: String,
    /// Type that declares the property (subtypes inherit it).
    pub declaring_type: String,
    /// Related entity type.
    pub target: String,
    /// Scalar (reference) or collection.
    pub is_scalar: bool,
    /// Foreign keys on the declaring type.
    pub foreign_keys: Vec<String>,
    /// Foreign keys on the target type.
    pub inverse_foreign_keys: Vec<String>,
    /// Resolved shape.
    pub kind: NavigationKind,
}

impl NavigationProperty {
    /// Name of the inverse navigation property, if the relationship is bidirectional.
    pub fn inverse(&self) -> Option<&str> {
        match &self.kind {
            NavigationKind::ScalarBidirectional { inverse }
            | NavigationKind::CollectionBidirectional { inverse } => Some(inverse),
            _ => None,
        }
    }

    /// Returns true if both refer to the same declared property.
    pub fn is_same(&self, other: &NavigationProperty) -> bool {
        self.name == other.name && self.declaring_type == other.declaring_type
    }
}

/// Foreign key on a child type that is only navigable from the parent side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InverseForeignKey {
    /// Foreign key properties on the child.
    pub foreign_keys: Vec<String>,
    /// Type declaring the parent side navigation.
    pub parent_type: String,
    /// Navigation property on the parent.
    pub navigation: String,
}

/// A single-part foreign key somewhere in the model that refers to a type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ForeignKeyReference {
    /// Type holding the foreign key (its subtypes hold it too).
    pub dependent_type: String,
    /// Foreign key property name.
    pub property: String,
}

/// A resolved entity type with inheritance flattened.
#[derive(Debug)]
pub struct EntityType {
    name: String,
    base_type: Option<String>,
    ancestors: Vec<String>,
    subtypes: Vec<String>,
    auto_generated_key: AutoGeneratedKeyType,
    data_properties: Vec<DataPropertyDef>,
    navigation_properties: Vec<Arc<NavigationProperty>>,
    key_properties: Vec<String>,
    concurrency_properties: Vec<String>,
    inverse_foreign_keys: Vec<InverseForeignKey>,
    foreign_key_references: Vec<ForeignKeyReference>,
    default_resource_name: String,
}

impl EntityType {
    /// Type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Direct base type.
    pub fn base_type(&self) -> Option<&str> {
        self.base_type.as_deref()
    }

    /// Base types, nearest first.
    pub fn ancestors(&self) -> &[String] {
        &self.ancestors
    }

    /// All descendant types.
    pub fn subtypes(&self) -> &[String] {
        &self.subtypes
    }

    /// This type followed by all its descendants.
    pub fn self_and_subtypes(&self) -> Vec<String> {
        std::iter::once(self.name.clone())
            .chain(self.subtypes.iter().cloned())
            .collect()
    }

    /// Name of the root of this type's hierarchy.
    pub fn root_type_name(&self) -> &str {
        self.ancestors.last().unwrap_or(&self.name)
    }

    /// Returns true if this type is `other` or derives from it.
    pub fn is_self_or_subtype_of(&self, other: &str) -> bool {
        self.name == other || self.ancestors.iter().any(|a| a == other)
    }

    /// Key generation mode.
    pub fn auto_generated_key(&self) -> AutoGeneratedKeyType {
        self.auto_generated_key
    }

    /// All data properties, inherited ones first.
    pub fn data_properties(&self) -> &[DataPropertyDef] {
        &self.data_properties
    }

    /// Looks up a data property.
    pub fn data_property(&self, name: &str) -> Option<&DataPropertyDef> {
        self.data_properties.iter().find(|p| p.name == name)
    }

    /// All navigation properties, inherited ones first.
    pub fn navigation_properties(&self) -> &[Arc<NavigationProperty>] {
        &self.navigation_properties
    }

    /// Looks up a navigation property.
    pub fn navigation_property(&self, name: &str) -> Option<&Arc<NavigationProperty>> {
        self.navigation_properties.iter().find(|p| p.name == name)
    }

    /// Key property names in key order.
    pub fn key_properties(&self) -> &[String] {
        &self.key_properties
    }

    /// Concurrency property names.
    pub fn concurrency_properties(&self) -> &[String] {
        &self.concurrency_properties
    }

    /// Foreign keys on this type navigable only from the parent side.
    pub fn inverse_foreign_keys(&self) -> &[InverseForeignKey] {
        &self.inverse_foreign_keys
    }

    /// Foreign keys elsewhere in the model that hold this type's key.
    pub fn foreign_key_references(&self) -> &[ForeignKeyReference] {
        &self.foreign_key_references
    }

    /// Resource used to query this type remotely.
    pub fn default_resource_name(&self) -> &str {
        &self.default_resource_name
    }
}

/// Serialized form of a metadata store (definitions only).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreDefinition {
    /// Store name.
    pub name: String,
    /// Naming convention.
    #[serde(default)]
    pub naming_convention: NamingConvention,
    /// Metadata format version.
    pub metadata_version: String,
    /// Entity type definitions.
    pub entity_types: Vec<EntityTypeDef>,
}

/// The resolved type system used by an entity manager.
#[derive(Debug)]
pub struct MetadataStore {
    name: String,
    naming_convention: NamingConvention,
    definitions: Vec<EntityTypeDef>,
    types: Vec<Arc<EntityType>>,
    by_name: HashMap<String, usize>,
}

impl MetadataStore {
    /// Starts building a store.
    pub fn builder(name: impl Into<String>) -> MetadataStoreBuilder {
        MetadataStoreBuilder {
            name: name.into(),
            naming_convention: NamingConvention::None,
            definitions: Vec::new(),
        }
    }

    /// Rebuilds a store from its serialized definition.
    pub fn from_definition(definition: StoreDefinition) -> CacheResult<Self> {
        if definition.metadata_version != METADATA_VERSION {
            return Err(CacheError::metadata(format!(
                "unsupported metadata version {}",
                definition.metadata_version
            )));
        }
        let mut builder =
            Self::builder(definition.name).naming_convention(definition.naming_convention);
        builder.definitions = definition.entity_types;
        builder.build()
    }

    /// Returns the serializable definition of this store.
    pub fn definition(&self) -> StoreDefinition {
        StoreDefinition {
            name: self.name.clone(),
            naming_convention: self.naming_convention,
            metadata_version: METADATA_VERSION.to_string(),
            entity_types: self.definitions.clone(),
        }
    }

    /// Serializes the definition to JSON.
    pub fn to_json(&self) -> CacheResult<String> {
        Ok(serde_json::to_string(&self.definition())?)
    }

    /// Builds a store from JSON produced by [`MetadataStore::to_json`].
    pub fn from_json(json: &str) -> CacheResult<Self> {
        Self::from_definition(serde_json::from_str(json)?)
    }

    /// Store name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Naming convention.
    pub fn naming_convention(&self) -> NamingConvention {
        self.naming_convention
    }

    /// Looks up an entity type.
    pub fn entity_type(&self, name: &str) -> CacheResult<Arc<EntityType>> {
        self.find_entity_type(name)
            .cloned()
            .ok_or_else(|| CacheError::unknown_type(name))
    }

    /// Looks up an entity type without failing.
    pub fn find_entity_type(&self, name: &str) -> Option<&Arc<EntityType>> {
        self.by_name.get(name).map(|&i| &self.types[i])
    }

    /// Iterates over all types in definition order.
    pub fn entity_types(&self) -> impl Iterator<Item = &Arc<EntityType>> {
        self.types.iter()
    }

    /// Returns true if `entity_type` is one of this store's types (same instance).
    pub fn owns(&self, entity_type: &Arc<EntityType>) -> bool {
        self.find_entity_type(entity_type.name())
            .is_some_and(|t| Arc::ptr_eq(t, entity_type))
    }

    /// Looks up a navigation property of a type.
    pub fn navigation(&self, type_name: &str, nav: &str) -> Option<Arc<NavigationProperty>> {
        self.find_entity_type(type_name)?
            .navigation_property(nav)
            .cloned()
    }
}

/// Builder for [`MetadataStore`].
#[derive(Debug)]
pub struct MetadataStoreBuilder {
    name: String,
    naming_convention: NamingConvention,
    definitions: Vec<EntityTypeDef>,
}

impl MetadataStoreBuilder {
    /// Sets the naming convention.
    #[must_use]
    pub fn naming_convention(mut self, naming_convention: NamingConvention) -> Self {
        self.naming_convention = naming_convention;
        self
    }

    /// Adds an entity type definition.
    #[must_use]
    pub fn entity_type(mut self, definition: EntityTypeDef) -> Self {
        self.definitions.push(definition);
        self
    }

    /// Validates the definitions and resolves the store.
    pub fn build(self) -> CacheResult<MetadataStore> {
        let defs = &self.definitions;
        let mut index: HashMap<&str, usize> = HashMap::new();
        for (i, def) in defs.iter().enumerate() {
            if index.insert(def.name.as_str(), i).is_some() {
                return Err(CacheError::metadata(format!(
                    "duplicate entity type {}",
                    def.name
                )));
            }
        }

        let ancestors: Vec<Vec<String>> = defs
            .iter()
            .map(|def| ancestor_chain(def, defs, &index))
            .collect::<CacheResult<_>>()?;

        // Root first, so inherited members come before declared ones.
        let lineage = |i: usize| -> Vec<usize> {
            let mut chain: Vec<usize> = ancestors[i]
                .iter()
                .rev()
                .map(|a| index[a.as_str()])
                .collect();
            chain.push(i);
            chain
        };

        let mut data_properties: Vec<Vec<DataPropertyDef>> = Vec::with_capacity(defs.len());
        for (i, def) in defs.iter().enumerate() {
            let mut props: Vec<DataPropertyDef> = Vec::new();
            for j in lineage(i) {
                for p in &defs[j].data_properties {
                    if props.iter().any(|q| q.name == p.name) {
                        return Err(CacheError::metadata(format!(
                            "duplicate property {}.{}",
                            def.name, p.name
                        )));
                    }
                    props.push(p.clone());
                }
            }
            let keys = props.iter().filter(|p| p.is_part_of_key).count();
            if keys == 0 {
                return Err(CacheError::metadata(format!(
                    "entity type {} has no key properties",
                    def.name
                )));
            }
            let auto_key = defs[lineage(i)[0]].auto_generated_key;
            if auto_key != AutoGeneratedKeyType::None && keys != 1 {
                return Err(CacheError::metadata(format!(
                    "entity type {} has an auto-generated composite key",
                    def.name
                )));
            }
            data_properties.push(props);
        }

        let has_prop =
            |type_idx: usize, name: &str| data_properties[type_idx].iter().any(|p| p.name == name);

        let mut declared: HashMap<(String, String), Arc<NavigationProperty>> = HashMap::new();
        for (i, def) in defs.iter().enumerate() {
            for nav in &def.navigation_properties {
                let resolved = resolve_navigation(def, nav, defs, &index, &has_prop, i)?;
                declared.insert((def.name.clone(), nav.name.clone()), Arc::new(resolved));
            }
        }

        let related = |a: usize, b: &str| -> bool {
            defs[a].name == b
                || ancestors[a].iter().any(|x| x == b)
                || index
                    .get(b)
                    .is_some_and(|&bi| ancestors[bi].iter().any(|x| *x == defs[a].name))
        };

        let mut types = Vec::with_capacity(defs.len());
        for (i, def) in defs.iter().enumerate() {
            let chain = lineage(i);
            let mut navigation_properties = Vec::new();
            for &j in &chain {
                for nav in &defs[j].navigation_properties {
                    let declaring = (defs[j].name.clone(), nav.name.clone());
                    if let Some(resolved) = declared.get(&declaring) {
                        navigation_properties.push(Arc::clone(resolved));
                    }
                }
            }

            let subtypes: Vec<String> = defs
                .iter()
                .enumerate()
                .filter(|(k, _)| ancestors[*k].iter().any(|a| *a == def.name))
                .map(|(_, d)| d.name.clone())
                .collect();

            let mut inverse_foreign_keys = Vec::new();
            let mut references: Vec<ForeignKeyReference> = Vec::new();
            let mut seen: HashSet<ForeignKeyReference> = HashSet::new();
            let mut push_ref = |r: ForeignKeyReference| {
                if seen.insert(r.clone()) {
                    references.push(r);
                }
            };
            for nav in declared.values() {
                let unidirectional_parent = matches!(
                    nav.kind,
                    NavigationKind::CollectionUnidirectionalParentToChild
                        | NavigationKind::ForeignKeyOnlyUnidirectional
                );
                if unidirectional_parent
                    && (nav.target == def.name || ancestors[i].iter().any(|a| *a == nav.target))
                {
                    inverse_foreign_keys.push(InverseForeignKey {
                        foreign_keys: nav.inverse_foreign_keys.clone(),
                        parent_type: nav.declaring_type.clone(),
                        navigation: nav.name.clone(),
                    });
                }
                if nav.foreign_keys.len() == 1 && related(i, &nav.target) {
                    push_ref(ForeignKeyReference {
                        dependent_type: nav.declaring_type.clone(),
                        property: nav.foreign_keys[0].clone(),
                    });
                }
                if nav.inverse_foreign_keys.len() == 1 && related(i, &nav.declaring_type) {
                    push_ref(ForeignKeyReference {
                        dependent_type: nav.target.clone(),
                        property: nav.inverse_foreign_keys[0].clone(),
                    });
                }
            }
            // HashMap iteration order is arbitrary.
            inverse_foreign_keys.sort_by(|a, b| {
                (&a.parent_type, &a.navigation).cmp(&(&b.parent_type, &b.navigation))
            });
            references.sort_by(|a, b| {
                (&a.dependent_type, &a.property).cmp(&(&b.dependent_type, &b.property))
            });

            let props = &data_properties[i];
            let root = &defs[chain[0]];
            types.push(Arc::new(EntityType {
                name: def.name.clone(),
                base_type: def.base_type.clone(),
                ancestors: ancestors[i].clone(),
                subtypes,
                auto_generated_key: root.auto_generated_key,
                key_properties: props
                    .iter()
                    .filter(|p| p.is_part_of_key)
                    .map(|p| p.name.clone())
                    .collect(),
                concurrency_properties: props
                    .iter()
                    .filter(|p| p.concurrency)
                    .map(|p| p.name.clone())
                    .collect(),
                data_properties: props.clone(),
                navigation_properties,
                inverse_foreign_keys,
                foreign_key_references: references,
                default_resource_name: chain
                    .iter()
                    .rev()
                    .find_map(|&j| defs[j].default_resource_name.clone())
                    .unwrap_or_else(|| format!("{}s", def.name)),
            }));
        }

        let by_name = defs
            .iter()
            .enumerate()
            .map(|(i, d)| (d.name.clone(), i))
            .collect();

        tracing::debug!(store = %self.name, types = types.len(), "metadata store built");

        Ok(MetadataStore {
            name: self.name,
            naming_convention: self.naming_convention,
            definitions: self.definitions,
            types,
            by_name,
        })
    }
}

fn ancestor_chain(
    def: &EntityTypeDef,
    defs: &[EntityTypeDef],
    index: &HashMap<&str, usize>,
) -> CacheResult<Vec<String>> {
    let mut chain = Vec::new();
    let mut current = def.base_type.as_deref();
    while let Some(base) = current {
        let &i = index.get(base).ok_or_else(|| {
            CacheError::metadata(format!("{} derives from unknown type {base}", def.name))
        })?;
        if base == def.name || chain.len() > defs.len() {
            return Err(CacheError::metadata(format!(
                "inheritance cycle through {}",
                def.name
            )));
        }
        chain.push(base.to_string());
        current = defs[i].base_type.as_deref();
    }
    Ok(chain)
}

fn resolve_navigation(
    def: &EntityTypeDef,
    nav: &NavigationDef,
    defs: &[EntityTypeDef],
    index: &HashMap<&str, usize>,
    has_prop: &dyn Fn(usize, &str) -> bool,
    declaring: usize,
) -> CacheResult<NavigationProperty> {
    let qualified = format!("{}.{}", def.name, nav.name);
    let &target = index.get(nav.target.as_str()).ok_or_else(|| {
        CacheError::metadata(format!("{qualified} targets unknown type {}", nav.target))
    })?;
    for fk in &nav.foreign_keys {
        if !has_prop(declaring, fk) {
            return Err(CacheError::metadata(format!(
                "{qualified} names unknown foreign key {fk}"
            )));
        }
    }
    for fk in &nav.inverse_foreign_keys {
        if !has_prop(target, fk) {
            return Err(CacheError::metadata(format!(
                "{qualified} names unknown inverse foreign key {}.{fk}",
                nav.target
            )));
        }
    }

    let kind = match (&nav.inverse, nav.is_scalar) {
        (Some(inverse), is_scalar) => {
            let inverse_def = find_navigation_def(&nav.target, inverse, defs, index).ok_or_else(|| {
                CacheError::metadata(format!(
                    "{qualified} names unknown inverse {}.{inverse}",
                    nav.target
                ))
            })?;
            if is_scalar {
                NavigationKind::ScalarBidirectional {
                    inverse: inverse.clone(),
                }
            } else if inverse_def.is_scalar {
                NavigationKind::CollectionBidirectional {
                    inverse: inverse.clone(),
                }
            } else {
                return Err(CacheError::metadata(format!(
                    "{qualified}: many-to-many navigations are not supported"
                )));
            }
        }
        (None, true) if !nav.foreign_keys.is_empty() => {
            NavigationKind::ScalarUnidirectionalChildToParent
        }
        (None, true) if !nav.inverse_foreign_keys.is_empty() => {
            NavigationKind::ForeignKeyOnlyUnidirectional
        }
        (None, false) if !nav.inverse_foreign_keys.is_empty() => {
            NavigationKind::CollectionUnidirectionalParentToChild
        }
        (None, _) => {
            return Err(CacheError::metadata(format!(
                "{qualified} has neither an inverse nor foreign keys"
            )))
        }
    };

    Ok(NavigationProperty {
        name: nav.name.clone(),
        declaring_type: def.name.clone(),
        target: nav.target.clone(),
        is_scalar: nav.is_scalar,
        foreign_keys: nav.foreign_keys.clone(),
        inverse_foreign_keys: nav.inverse_foreign_keys.clone(),
        kind,
    })
}

/// Finds a navigation declared on `type_name` or one of its base types.
fn find_navigation_def<'a>(
    type_name: &str,
    nav: &str,
    defs: &'a [EntityTypeDef],
    index: &HashMap<&str, usize>,
) -> Option<&'a NavigationDef> {
    let mut current = Some(type_name);
    let mut hops = 0;
    while let Some(name) = current {
        let def = &defs[*index.get(name)?];
        if let Some(found) = def.navigation_properties.iter().find(|n| n.name == nav) {
            return Some(found);
        }
        hops += 1;
        if hops > defs.len() {
            return None;
        }
        current = def.base_type.as_deref();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::types::DataType;

    fn store() -> MetadataStore {
        MetadataStore::builder("Sales")
            .entity_type(
                EntityTypeDef::new("Customer")
                    .auto_generated_key(AutoGeneratedKeyType::Identity)
                    .key("id", DataType::Int32)
                    .property("name", DataType::String)
                    .navigation(NavigationDef::collection("orders", "Order").inverse("customer")),
            )
            .entity_type(
                EntityTypeDef::new("PreferredCustomer")
                    .base_type("Customer")
                    .property("discount", DataType::Int32),
            )
            .entity_type(
                EntityTypeDef::new("Order")
                    .auto_generated_key(AutoGeneratedKeyType::Identity)
                    .key("id", DataType::Int32)
                    .property("customerId", DataType::Int32)
                    .property("regionId", DataType::Int32)
                    .concurrency_property("rowVersion", DataType::Int32)
                    .navigation(
                        NavigationDef::scalar("customer", "Customer")
                            .foreign_keys(["customerId"])
                            .inverse("orders"),
                    )
                    .navigation(
                        NavigationDef::scalar("region", "Region").foreign_keys(["regionId"]),
                    ),
            )
            .entity_type(
                EntityTypeDef::new("Region")
                    .key("id", DataType::Int32)
                    .navigation(
                        NavigationDef::collection("territories", "Territory")
                            .inverse_foreign_keys(["regionId"]),
                    ),
            )
            .entity_type(
                EntityTypeDef::new("Territory")
                    .key("id", DataType::Int32)
                    .property("regionId", DataType::Int32),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn resolves_navigation_kinds() {
        let store = store();
        let kind = |t: &str, n: &str| store.navigation(t, n).unwrap().kind.clone();

        assert_eq!(
            kind("Order", "customer"),
            NavigationKind::ScalarBidirectional {
                inverse: "orders".into()
            }
        );
        assert_eq!(
            kind("Customer", "orders"),
            NavigationKind::CollectionBidirectional {
                inverse: "customer".into()
            }
        );
        assert_eq!(
            kind("Order", "region"),
            NavigationKind::ScalarUnidirectionalChildToParent
        );
        assert_eq!(
            kind("Region", "territories"),
            NavigationKind::CollectionUnidirectionalParentToChild
        );
    }

    #[test]
    fn subtypes_inherit_members() {
        let store = store();
        let preferred = store.entity_type("PreferredCustomer").unwrap();
        assert_eq!(preferred.key_properties(), &["id".to_string()]);
        assert!(preferred.data_property("discount").is_some());
        assert!(preferred.navigation_property("orders").is_some());
        assert_eq!(preferred.root_type_name(), "Customer");
        assert_eq!(preferred.auto_generated_key(), AutoGeneratedKeyType::Identity);

        let customer = store.entity_type("Customer").unwrap();
        assert_eq!(customer.subtypes(), &["PreferredCustomer".to_string()]);
        assert!(preferred.is_self_or_subtype_of("Customer"));
        assert!(!customer.is_self_or_subtype_of("PreferredCustomer"));
    }

    #[test]
    fn inverse_foreign_keys_and_references() {
        let store = store();
        let territory = store.entity_type("Territory").unwrap();
        assert_eq!(
            territory.inverse_foreign_keys(),
            &[InverseForeignKey {
                foreign_keys: vec!["regionId".into()],
                parent_type: "Region".into(),
                navigation: "territories".into(),
            }]
        );

        let region = store.entity_type("Region").unwrap();
        let refs = region.foreign_key_references();
        assert!(refs.contains(&ForeignKeyReference {
            dependent_type: "Order".into(),
            property: "regionId".into()
        }));
        assert!(refs.contains(&ForeignKeyReference {
            dependent_type: "Territory".into(),
            property: "regionId".into()
        }));

        let preferred = store.entity_type("PreferredCustomer").unwrap();
        assert_eq!(
            preferred.foreign_key_references(),
            &[ForeignKeyReference {
                dependent_type: "Order".into(),
                property: "customerId".into()
            }]
        );

        let order = store.entity_type("Order").unwrap();
        assert_eq!(order.concurrency_properties(), &["rowVersion".to_string()]);
    }

    #[test]
    fn rejects_bad_definitions() {
        let missing_key = MetadataStore::builder("x")
            .entity_type(EntityTypeDef::new("A").property("name", DataType::String))
            .build();
        assert!(missing_key.is_err());

        let unknown_target = MetadataStore::builder("x")
            .entity_type(
                EntityTypeDef::new("A")
                    .key("id", DataType::Int32)
                    .navigation(NavigationDef::scalar("b", "B").foreign_keys(["id"])),
            )
            .build();
        assert!(unknown_target.is_err());

        let unknown_fk = MetadataStore::builder("x")
            .entity_type(
                EntityTypeDef::new("A")
                    .key("id", DataType::Int32)
                    .navigation(NavigationDef::scalar("a", "A").foreign_keys(["parentId"])),
            )
            .build();
        assert!(unknown_fk.is_err());

        let cycle = MetadataStore::builder("x")
            .entity_type(EntityTypeDef::new("A").base_type("B").key("id", DataType::Int32))
            .entity_type(EntityTypeDef::new("B").base_type("A"))
            .build();
        assert!(cycle.is_err());
    }

    #[test]
    fn definition_round_trips_through_json() {
        let store = store();
        let json = store.to_json().unwrap();
        let rebuilt = MetadataStore::from_json(&json).unwrap();
        assert_eq!(rebuilt.name(), "Sales");
        assert_eq!(rebuilt.definition(), store.definition());
        assert!(!store.owns(&rebuilt.entity_type("Order").unwrap()));
        assert!(store.owns(&store.entity_type("Order").unwrap()));
    }
}
