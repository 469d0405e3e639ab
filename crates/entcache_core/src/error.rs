//! Error types for the entity cache.

use crate::save::{SaveResponse, ServerEntityError};
use crate::validation::EntityValidationFailure;
use std::io;
use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Coarse classification of a [`CacheError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// An entity could not be attached.
    Attach,
    /// A save overlapped with another outstanding save.
    Concurrency,
    /// Client-side validation rejected a save before any network call.
    ClientValidation,
    /// The server rejected a save.
    ServerSave,
    /// An import bundle was malformed or incompatible.
    ImportFormat,
    /// A query failed.
    Query,
    /// Metadata or property level misuse.
    Metadata,
    /// Anything else.
    Other,
}

/// Errors that can occur in entity cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// An entity could not be attached to the manager.
    #[error("attach failed: {message}")]
    AttachFailed {
        /// Why the attach was refused.
        message: String,
    },

    /// A save was rejected because some of its entities are already being saved.
    #[error("concurrent save rejected: {} entities are already being saved", keys.len())]
    ConcurrentSave {
        /// Key strings of the entities that are already being saved.
        keys: Vec<String>,
    },

    /// Client validation failed; nothing was sent to the server.
    #[error("client validation failed for {} entities", failures.len())]
    ClientValidation {
        /// Per-entity validation failures.
        failures: Vec<EntityValidationFailure>,
    },

    /// The server rejected a save.
    #[error("server save failed: {message}")]
    ServerSave {
        /// Server supplied message.
        message: String,
        /// Per-entity errors reported by the server.
        entity_errors: Vec<ServerEntityError>,
        /// Partial result reported by a non-transactional backend. Never applied.
        partial: Option<Box<SaveResponse>>,
    },

    /// An import bundle could not be imported.
    #[error("import format error: {message}")]
    ImportFormat {
        /// Description of the format issue.
        message: String,
    },

    /// An incoming entity collided with a cached one under `MergeStrategy::Disallowed`.
    #[error("merge disallowed: an entity with key {key} is already cached")]
    MergeDisallowed {
        /// Key string of the colliding entity.
        key: String,
    },

    /// A concurrency property has a data type that cannot be stamped.
    #[error("concurrency property {type_name}.{property} has unsupported data type {data_type}")]
    ConcurrencyProperty {
        /// Entity type name.
        type_name: String,
        /// Property name.
        property: String,
        /// Name of the offending data type.
        data_type: String,
    },

    /// Metadata definitions are invalid.
    #[error("metadata error: {message}")]
    Metadata {
        /// Description of the problem.
        message: String,
    },

    /// The entity type is not part of the metadata store.
    #[error("unknown entity type: {name}")]
    UnknownEntityType {
        /// The requested type name.
        name: String,
    },

    /// The property does not exist on the entity type.
    #[error("unknown property {property} on entity type {type_name}")]
    UnknownProperty {
        /// Entity type name.
        type_name: String,
        /// Property name.
        property: String,
    },

    /// A value does not fit the declared data type of a property.
    #[error("invalid value for {type_name}.{property}: {message}")]
    InvalidValue {
        /// Entity type name.
        type_name: String,
        /// Property name.
        property: String,
        /// Description of the mismatch.
        message: String,
    },

    /// The key generator could not produce a temporary key.
    #[error("cannot generate temporary key for {type_name}: {message}")]
    KeyGeneration {
        /// Entity type name.
        type_name: String,
        /// Description of the failure.
        message: String,
    },

    /// A query failed.
    #[error("query {query} failed on manager {manager_id}: {message}")]
    QueryFailed {
        /// Description of the query.
        query: String,
        /// The manager the query ran against.
        manager_id: String,
        /// Failure message.
        message: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// JSON encoding or decoding error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// CBOR encoding or decoding error.
    #[error("cbor error: {message}")]
    Cbor {
        /// Description of the failure.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CacheError {
    /// Creates an attach failed error.
    pub fn attach_failed(message: impl Into<String>) -> Self {
        Self::AttachFailed {
            message: message.into(),
        }
    }

    /// Creates an import format error.
    pub fn import_format(message: impl Into<String>) -> Self {
        Self::ImportFormat {
            message: message.into(),
        }
    }

    /// Creates a metadata error.
    pub fn metadata(message: impl Into<String>) -> Self {
        Self::Metadata {
            message: message.into(),
        }
    }

    /// Creates an unknown entity type error.
    pub fn unknown_type(name: impl Into<String>) -> Self {
        Self::UnknownEntityType { name: name.into() }
    }

    /// Creates an unknown property error.
    pub fn unknown_property(type_name: impl Into<String>, property: impl Into<String>) -> Self {
        Self::UnknownProperty {
            type_name: type_name.into(),
            property: property.into(),
        }
    }

    /// Creates an invalid value error.
    pub fn invalid_value(
        type_name: impl Into<String>,
        property: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            type_name: type_name.into(),
            property: property.into(),
            message: message.into(),
        }
    }

    /// Creates a key generation error.
    pub fn key_generation(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::KeyGeneration {
            type_name: type_name.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a CBOR error.
    pub fn cbor(message: impl Into<String>) -> Self {
        Self::Cbor {
            message: message.into(),
        }
    }

    /// Returns the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CacheError::AttachFailed { .. } | CacheError::MergeDisallowed { .. } => {
                ErrorKind::Attach
            }
            CacheError::ConcurrentSave { .. } => ErrorKind::Concurrency,
            CacheError::ClientValidation { .. } => ErrorKind::ClientValidation,
            CacheError::ServerSave { .. } => ErrorKind::ServerSave,
            CacheError::ImportFormat { .. } => ErrorKind::ImportFormat,
            CacheError::QueryFailed { .. } => ErrorKind::Query,
            CacheError::ConcurrencyProperty { .. }
            | CacheError::Metadata { .. }
            | CacheError::UnknownEntityType { .. }
            | CacheError::UnknownProperty { .. }
            | CacheError::InvalidValue { .. } => ErrorKind::Metadata,
            _ => ErrorKind::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds() {
        assert_eq!(CacheError::attach_failed("x").kind(), ErrorKind::Attach);
        assert_eq!(
            CacheError::ConcurrentSave { keys: vec![] }.kind(),
            ErrorKind::Concurrency
        );
        assert_eq!(CacheError::import_format("x").kind(), ErrorKind::ImportFormat);
        assert_eq!(
            CacheError::unknown_property("Customer", "nope").kind(),
            ErrorKind::Metadata
        );
        assert_eq!(CacheError::invalid_operation("x").kind(), ErrorKind::Other);
    }

    #[test]
    fn error_display() {
        let err = CacheError::ConcurrentSave {
            keys: vec!["Customer:::1".into(), "Customer:::2".into()],
        };
        assert!(err.to_string().contains('2'));

        let err = CacheError::MergeDisallowed {
            key: "Order:::7".into(),
        };
        assert!(err.to_string().contains("Order:::7"));
    }
}
