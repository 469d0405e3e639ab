//! Entity keys.

use crate::metadata::EntityType;
use crate::value::Value;
use std::fmt;

/// Separator between the parts of a key string.
pub const KEY_DELIMITER: &str = ":::";

/// Identity of an entity within its type hierarchy.
///
/// Two keys are equal when both the type name and the ordered key values
/// are equal. Lookups through a manager additionally consider subtypes, so a
/// `Customer` key finds a cached `PreferredCustomer` with the same values.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityKey {
    entity_type: String,
    values: Vec<Value>,
}

/// How much of a key has been filled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFill {
    /// Every key value is set.
    Full,
    /// Some key values are null or default.
    Partial,
    /// Every key value is null or default.
    Empty,
}

impl EntityKey {
    /// Creates a key.
    pub fn new(entity_type: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            entity_type: entity_type.into(),
            values,
        }
    }

    /// Creates a single-valued key.
    pub fn single(entity_type: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(entity_type, vec![value.into()])
    }

    /// Type name this key was created for.
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Ordered key values.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Canonical string of the values alone, used as the group index key.
    pub fn values_string(&self) -> String {
        values_string(&self.values)
    }

    /// Canonical string form: `Type:::v1:::v2`.
    pub fn key_string(&self) -> String {
        let mut s = self.entity_type.clone();
        for v in &self.values {
            s.push_str(KEY_DELIMITER);
            s.push_str(&v.to_string());
        }
        s
    }

    /// Same values under another type name.
    pub fn with_type(&self, entity_type: &str) -> Self {
        Self::new(entity_type, self.values.clone())
    }

    /// Classifies the key values against the key property types of `entity_type`.
    pub fn fill(&self, entity_type: &EntityType) -> KeyFill {
        let unset = entity_type
            .key_properties()
            .iter()
            .zip(self.values.iter())
            .filter(|(name, value)| {
                entity_type
                    .data_property(name)
                    .map_or(value.is_null(), |p| p.data_type.is_default(value))
            })
            .count();
        if unset == 0 {
            KeyFill::Full
        } else if unset >= self.values.len() {
            KeyFill::Empty
        } else {
            KeyFill::Partial
        }
    }

    /// Returns true if a foreign key built from these values points nowhere.
    ///
    /// A reference is considered empty if any part is null, or if every
    /// part holds its type's default value.
    pub fn is_empty_reference(&self, entity_type: &EntityType) -> bool {
        self.values.iter().any(Value::is_null) || self.fill(entity_type) == KeyFill::Empty
    }
}

/// Joins key values the same way [`EntityKey::values_string`] does.
pub fn values_string(values: &[Value]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(KEY_DELIMITER)
}

impl fmt::Debug for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityKey({})", self.key_string())
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key_string())
    }
}
