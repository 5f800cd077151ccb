// crates/integration-schema/src/lib.rs
// ============================================================================
// Module: integration-schema
// Description: The pluggable schema-validation hook a step may declare
//              for its entities/relationships, validated against a JSON
//              Schema document before the result reaches the graph
//              object store.
// Dependencies: integration-core, jsonschema, serde_json, thiserror
// ============================================================================
//! ## Overview
//!
//! A step may optionally declare a JSON Schema for one of its entity
//! types. [`SchemaValidator`] compiles that schema once and validates
//! every entity's property bag against it, surfacing failures as
//! [`ErrorKind::IntegrationValidation`](integration_core::errors::ErrorKind::IntegrationValidation)
//! errors the scheduler can fold into a step's failure outcome.

#![forbid(unsafe_code)]

use integration_core::errors::{ErrorKind, FrameworkError};
use integration_core::model::Entity;
use jsonschema::Validator;
use thiserror::Error;

/// Failures raised while compiling or evaluating a JSON Schema document.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The schema document itself was not a valid JSON Schema.
    #[error("invalid schema document: {0}")]
    InvalidSchema(String),
    /// An entity's properties did not satisfy the compiled schema.
    #[error("entity \"{entity_key}\" failed schema validation: {violations:?}")]
    ValidationFailed {
        /// Key of the entity that failed validation.
        entity_key: String,
        /// Human-readable validation error messages.
        violations: Vec<String>,
    },
}

impl From<SchemaError> for FrameworkError {
    fn from(value: SchemaError) -> Self {
        let kind = match value {
            SchemaError::InvalidSchema(_) => ErrorKind::ConfigValidation,
            SchemaError::ValidationFailed { .. } => ErrorKind::IntegrationValidation,
        };
        FrameworkError::new(kind, value.to_string())
    }
}

/// A compiled JSON Schema validator bound to one entity type.
pub struct SchemaValidator {
    /// The entity type this validator applies to.
    entity_type: String,
    /// The compiled JSON Schema document.
    validator: Validator,
}

impl SchemaValidator {
    /// Compiles `schema` for validating entities of `entity_type`.
    ///
    /// # Errors
    /// Returns [`SchemaError::InvalidSchema`] if `schema` is not a valid
    /// JSON Schema document.
    pub fn compile(entity_type: impl Into<String>, schema: &serde_json::Value) -> Result<Self, SchemaError> {
        let validator =
            jsonschema::validator_for(schema).map_err(|err| SchemaError::InvalidSchema(err.to_string()))?;
        Ok(Self {
            entity_type: entity_type.into(),
            validator,
        })
    }

    /// The entity type this validator applies to.
    #[must_use]
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Validates `entity`'s property bag against the compiled schema.
    ///
    /// # Errors
    /// Returns [`SchemaError::ValidationFailed`] listing every
    /// violation when the entity does not conform.
    pub fn validate(&self, entity: &Entity) -> Result<(), SchemaError> {
        let instance = serde_json::to_value(&entity.properties)
            .unwrap_or(serde_json::Value::Null);
        let violations: Vec<String> = self
            .validator
            .iter_errors(&instance)
            .map(|err| err.to_string())
            .collect();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(SchemaError::ValidationFailed {
                entity_key: entity.key.clone(),
                violations,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test assertions use expect/unwrap for clarity."
    )]
    use super::*;
    use integration_core::model::{PropertyBag, PropertyValue};

    fn entity_with(name: &str, value: PropertyValue) -> Entity {
        let mut properties = PropertyBag::new();
        properties.insert(name.to_string(), value);
        Entity {
            key: "host:1".to_string(),
            entity_type: "test_host".to_string(),
            class: "Host".to_string(),
            properties,
            raw_data: Vec::new(),
        }
    }

    fn schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "hostname": { "type": "string" }
            },
            "required": ["hostname"]
        })
    }

    #[test]
    fn accepts_conforming_entities() {
        let validator = SchemaValidator::compile("test_host", &schema()).expect("valid schema");
        let entity = entity_with("hostname", PropertyValue::String("example".to_string()));
        assert!(validator.validate(&entity).is_ok());
    }

    #[test]
    fn rejects_non_conforming_entities() {
        let validator = SchemaValidator::compile("test_host", &schema()).expect("valid schema");
        let entity = entity_with("other", PropertyValue::Bool(true));
        let err = validator.validate(&entity).unwrap_err();
        assert!(matches!(err, SchemaError::ValidationFailed { .. }));
    }

    #[test]
    fn rejects_invalid_schema_documents() {
        let bogus = serde_json::json!({ "type": 123 });
        let result = SchemaValidator::compile("test_host", &bogus);
        assert!(result.is_err());
    }
}
