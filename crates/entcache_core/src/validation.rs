//! Validation contract.
//!
//! Rule evaluation is delegated to a [`Validator`]; the cache only cares
//! whether an entity passes and which errors to attach to it.

use crate::entity::{Entity, EntityKey};
use std::fmt;

/// Where a validation error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationOrigin {
    /// Produced by a client side validator.
    Client,
    /// Reported by the server for a failed save.
    Server,
}

/// A validation error attached to an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Rule or error name.
    pub key: String,
    /// Human readable message.
    pub message: String,
    /// Offending property, if the error is property scoped.
    pub property_name: Option<String>,
    /// Origin of the error.
    pub origin: ValidationOrigin,
}

impl ValidationError {
    /// Creates a client side error.
    pub fn client(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            message: message.into(),
            property_name: None,
            origin: ValidationOrigin::Client,
        }
    }

    /// Creates a server side error.
    pub fn server(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            origin: ValidationOrigin::Server,
            ..Self::client(key, message)
        }
    }

    /// Scopes the error to a property.
    #[must_use]
    pub fn with_property(mut self, property: impl Into<String>) -> Self {
        self.property_name = Some(property.into());
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.property_name {
            Some(p) => write!(f, "{p}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// All validation errors of one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityValidationFailure {
    /// Key of the failing entity.
    pub key: EntityKey,
    /// Errors found.
    pub errors: Vec<ValidationError>,
}

/// Evaluates validation rules for an entity.
pub trait Validator: Send + Sync {
    /// Returns every rule violation; empty means valid.
    fn validate_entity(&self, entity: &Entity) -> Vec<ValidationError>;
}

/// Adapts a closure into a [`Validator`].
pub struct FnValidator<F>(pub F);

impl<F> Validator for FnValidator<F>
where
    F: Fn(&Entity) -> Vec<ValidationError> + Send + Sync,
{
    fn validate_entity(&self, entity: &Entity) -> Vec<ValidationError> {
        (self.0)(entity)
    }
}

impl<F> fmt::Debug for FnValidator<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnValidator")
    }
}

/// Runs `validator` against `entity`, replacing its client side errors.
///
/// Returns the new client errors.
pub(crate) fn validate_into_aspect(
    validator: &dyn Validator,
    entity: &Entity,
) -> Vec<ValidationError> {
    let errors = validator.validate_entity(entity);
    entity.replace_validation_errors(ValidationOrigin::Client, errors.clone());
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_builders() {
        let e = ValidationError::client("required", "name is required").with_property("name");
        assert_eq!(e.origin, ValidationOrigin::Client);
        assert_eq!(e.to_string(), "name: name is required");

        let s = ValidationError::server("conflict", "row changed");
        assert_eq!(s.origin, ValidationOrigin::Server);
        assert_eq!(s.to_string(), "row changed");
    }
}
