//! Entity type definitions.

use crate::value::Value;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Data type of a data property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// `true` / `false`.
    Boolean,
    /// 32 bit signed integer.
    Int32,
    /// 64 bit signed integer.
    Int64,
    /// UTF-8 text.
    String,
    /// Globally unique identifier.
    Guid,
    /// Instant in UTC.
    DateTime,
    /// Opaque bytes, e.g. a server computed row version.
    Binary,
}

impl DataType {
    /// Returns the value a freshly created entity holds for a non-nullable property.
    pub fn default_value(&self) -> Value {
        match self {
            DataType::Boolean => Value::Bool(false),
            DataType::Int32 | DataType::Int64 => Value::Integer(0),
            DataType::String => Value::Text(String::new()),
            DataType::Guid => Value::Guid(Uuid::nil()),
            DataType::DateTime => Value::DateTime(DateTime::<Utc>::UNIX_EPOCH),
            DataType::Binary => Value::Bytes(Vec::new()),
        }
    }

    /// Returns true if `value` is null or this type's default value.
    pub fn is_default(&self, value: &Value) -> bool {
        value.is_null() || *value == self.default_value()
    }

    /// Returns true if the type is numeric.
    pub fn is_integer(&self) -> bool {
        matches!(self, DataType::Int32 | DataType::Int64)
    }

    /// Checks that a non-null value fits this type.
    pub fn check(&self, value: &Value) -> Result<(), String> {
        let ok = match (self, value) {
            (_, Value::Null) => true,
            (DataType::Boolean, Value::Bool(_)) => true,
            (DataType::Int32, Value::Integer(n)) => i32::try_from(*n).is_ok(),
            (DataType::Int64, Value::Integer(_)) => true,
            (DataType::String, Value::Text(_)) => true,
            (DataType::Guid, Value::Guid(_)) => true,
            (DataType::DateTime, Value::DateTime(_)) => true,
            (DataType::Binary, Value::Bytes(_)) => true,
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(format!("expected {self}, got {} {value}", value.type_name()))
        }
    }

    /// Converts a value into its JSON wire form.
    pub fn to_json(&self, value: &Value) -> serde_json::Value {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Integer(n) => serde_json::Value::from(*n),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Guid(g) => serde_json::Value::String(g.hyphenated().to_string()),
            Value::DateTime(dt) => serde_json::Value::String(dt.to_rfc3339()),
            Value::Bytes(b) => serde_json::Value::String(BASE64.encode(b)),
        }
    }

    /// Parses the JSON wire form of a value of this type.
    pub fn from_json(&self, json: &serde_json::Value) -> Result<Value, String> {
        if json.is_null() {
            return Ok(Value::Null);
        }
        let parsed = match self {
            DataType::Boolean => json.as_bool().map(Value::Bool),
            DataType::Int32 | DataType::Int64 => json.as_i64().map(Value::Integer),
            DataType::String => json.as_str().map(Value::from),
            DataType::Guid => json
                .as_str()
                .and_then(|s| Uuid::parse_str(s).ok())
                .map(Value::Guid),
            DataType::DateTime => json
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| Value::DateTime(dt.with_timezone(&Utc))),
            DataType::Binary => json
                .as_str()
                .and_then(|s| BASE64.decode(s).ok())
                .map(Value::Bytes),
        };
        parsed.ok_or_else(|| format!("cannot read {json} as {self}"))
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Boolean => "Boolean",
            DataType::Int32 => "Int32",
            DataType::Int64 => "Int64",
            DataType::String => "String",
            DataType::Guid => "Guid",
            DataType::DateTime => "DateTime",
            DataType::Binary => "Binary",
        };
        f.write_str(name)
    }
}

/// How the key of a new entity gets its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AutoGeneratedKeyType {
    /// The client must supply the key.
    #[default]
    None,
    /// The server assigns the key on insert.
    Identity,
    /// A server side key generator assigns the key on save.
    KeyGenerator,
}

/// Definition of a data property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPropertyDef {
    /// Client side property name.
    pub name: String,
    /// Declared data type.
    pub data_type: DataType,
    /// Whether the property is part of the entity key.
    #[serde(default)]
    pub is_part_of_key: bool,
    /// Whether null is an acceptable value.
    #[serde(default = "default_true")]
    pub is_nullable: bool,
    /// Whether the property is an optimistic concurrency token.
    #[serde(default)]
    pub concurrency: bool,
    /// Explicit default for new entities; falls back to null or the type default.
    /// Not carried in serialized metadata.
    #[serde(skip)]
    pub default_value: Option<Value>,
}

fn default_true() -> bool {
    true
}

impl DataPropertyDef {
    /// Creates a nullable, non-key property.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            is_part_of_key: false,
            is_nullable: true,
            concurrency: false,
            default_value: None,
        }
    }

    /// Marks the property as part of the key (which also makes it non-nullable).
    #[must_use]
    pub fn key(mut self) -> Self {
        self.is_part_of_key = true;
        self.is_nullable = false;
        self
    }

    /// Sets nullability.
    #[must_use]
    pub fn nullable(mut self, value: bool) -> Self {
        self.is_nullable = value;
        self
    }

    /// Marks the property as a concurrency token.
    #[must_use]
    pub fn concurrency(mut self) -> Self {
        self.concurrency = true;
        self
    }

    /// Sets an explicit default value.
    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Value a newly created entity starts with.
    pub fn initial_value(&self) -> Value {
        match &self.default_value {
            Some(v) => v.clone(),
            None if self.is_nullable && !self.is_part_of_key => Value::Null,
            None => self.data_type.default_value(),
        }
    }
}

/// Definition of a navigation property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationDef {
    /// Property name.
    pub name: String,
    /// Name of the related entity type.
    pub target: String,
    /// Scalar (reference) or collection.
    pub is_scalar: bool,
    /// Foreign key properties on the declaring type that point at `target`.
    #[serde(default)]
    pub foreign_keys: Vec<String>,
    /// Name of the navigation property on `target` pointing back, if any.
    #[serde(default)]
    pub inverse: Option<String>,
    /// Foreign key properties on `target` pointing back at the declaring type.
    /// Only used when there is no inverse navigation.
    #[serde(default)]
    pub inverse_foreign_keys: Vec<String>,
}

impl NavigationDef {
    /// Creates a scalar navigation property.
    pub fn scalar(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, target, true)
    }

    /// Creates a collection navigation property.
    pub fn collection(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, target, false)
    }

    fn new(name: impl Into<String>, target: impl Into<String>, is_scalar: bool) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            is_scalar,
            foreign_keys: Vec::new(),
            inverse: None,
            inverse_foreign_keys: Vec::new(),
        }
    }

    /// Sets the foreign keys on the declaring type.
    #[must_use]
    pub fn foreign_keys<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.foreign_keys = names.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the inverse navigation property.
    #[must_use]
    pub fn inverse(mut self, name: impl Into<String>) -> Self {
        self.inverse = Some(name.into());
        self
    }

    /// Sets the foreign keys on the target type (unidirectional parent side).
    #[must_use]
    pub fn inverse_foreign_keys<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inverse_foreign_keys = names.into_iter().map(Into::into).collect();
        self
    }
}

/// Definition of an entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityTypeDef {
    /// Type name.
    pub name: String,
    /// Base type, if this type derives from another.
    #[serde(default)]
    pub base_type: Option<String>,
    /// Key generation mode.
    #[serde(default)]
    pub auto_generated_key: AutoGeneratedKeyType,
    /// Data properties declared on this type (not inherited ones).
    #[serde(default)]
    pub data_properties: Vec<DataPropertyDef>,
    /// Navigation properties declared on this type (not inherited ones).
    #[serde(default)]
    pub navigation_properties: Vec<NavigationDef>,
    /// Resource used to query this type remotely.
    #[serde(default)]
    pub default_resource_name: Option<String>,
}

impl EntityTypeDef {
    /// Creates an empty type definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_type: None,
            auto_generated_key: AutoGeneratedKeyType::None,
            data_properties: Vec::new(),
            navigation_properties: Vec::new(),
            default_resource_name: None,
        }
    }

    /// Sets the base type.
    #[must_use]
    pub fn base_type(mut self, name: impl Into<String>) -> Self {
        self.base_type = Some(name.into());
        self
    }

    /// Sets the key generation mode.
    #[must_use]
    pub fn auto_generated_key(mut self, kind: AutoGeneratedKeyType) -> Self {
        self.auto_generated_key = kind;
        self
    }

    /// Adds a key property.
    #[must_use]
    pub fn key(self, name: impl Into<String>, data_type: DataType) -> Self {
        self.data_property(DataPropertyDef::new(name, data_type).key())
    }

    /// Adds a nullable data property.
    #[must_use]
    pub fn property(self, name: impl Into<String>, data_type: DataType) -> Self {
        self.data_property(DataPropertyDef::new(name, data_type))
    }

    /// Adds a non-nullable concurrency property.
    #[must_use]
    pub fn concurrency_property(self, name: impl Into<String>, data_type: DataType) -> Self {
        self.data_property(
            DataPropertyDef::new(name, data_type)
                .nullable(false)
                .concurrency(),
        )
    }

    /// Adds a fully specified data property.
    #[must_use]
    pub fn data_property(mut self, property: DataPropertyDef) -> Self {
        self.data_properties.push(property);
        self
    }

    /// Adds a navigation property.
    #[must_use]
    pub fn navigation(mut self, navigation: NavigationDef) -> Self {
        self.navigation_properties.push(navigation);
        self
    }

    /// Sets the default resource name.
    #[must_use]
    pub fn resource_name(mut self, name: impl Into<String>) -> Self {
        self.default_resource_name = Some(name.into());
        self
    }
}
