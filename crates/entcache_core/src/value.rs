//! Dynamic property value type.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use std::fmt;
use uuid::Uuid;

/// A dynamic property value.
///
/// Every data property of a cached entity holds one of these. Values are
/// totally ordered (variant first, then content) so that local queries can
/// sort on them without a type-specific comparator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Value {
    /// Null / unset value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer (covers both 32 and 64 bit properties).
    Integer(i64),
    /// Text string (UTF-8).
    Text(String),
    /// Globally unique identifier.
    Guid(Uuid),
    /// Instant in UTC.
    DateTime(DateTime<Utc>),
    /// Opaque binary value.
    Bytes(Vec<u8>),
}

impl Value {
    /// Returns true for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The flag held by a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        if let Value::Bool(flag) = self {
            Some(*flag)
        } else {
            None
        }
    }

    /// The number held by an `Integer`.
    pub fn as_integer(&self) -> Option<i64> {
        if let Value::Integer(n) = self {
            Some(*n)
        } else {
            None
        }
    }

    /// The string held by a `Text`.
    pub fn as_text(&self) -> Option<&str> {
        if let Value::Text(text) = self {
            Some(text.as_str())
        } else {
            None
        }
    }

    /// The identifier held by a `Guid`.
    pub fn as_guid(&self) -> Option<Uuid> {
        if let Value::Guid(guid) = self {
            Some(*guid)
        } else {
            None
        }
    }

    /// The instant held by a `DateTime`.
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        if let Value::DateTime(instant) = self {
            Some(*instant)
        } else {
            None
        }
    }

    /// The payload held by `Bytes`.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        if let Value::Bytes(payload) = self {
            Some(payload.as_slice())
        } else {
            None
        }
    }

    /// Short name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Text(_) => "text",
            Value::Guid(_) => "guid",
            Value::DateTime(_) => "datetime",
            Value::Bytes(_) => "bytes",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Text(s) => f.write_str(s),
            Value::Guid(g) => write!(f, "{}", g.hyphenated()),
            Value::DateTime(dt) => f.write_str(&dt.to_rfc3339()),
            Value::Bytes(b) => f.write_str(&BASE64.encode(b)),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<Uuid> for Value {
    fn from(g: Uuid) -> Self {
        Value::Guid(g)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Self {
        Value::DateTime(dt)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Value::Null
    }
}
