// crates/integration-config/src/lib.rs
// ============================================================================
// Module: integration-config
// Description: Validates instanceConfigFields against declared field
//              definitions, validates StepStartState coverage against a
//              declared step graph, and provides an ambient convenience
//              for loading instance configuration from a TOML file with
//              an environment-variable overlay.
// Dependencies: integration-core, serde, serde_json, thiserror, toml
// ============================================================================
//! ## Overview
//!
//! `instanceConfigFields` declares, per field, its expected type and
//! whether it is required and/or should be masked in debug output. This
//! crate turns that declaration plus a raw value map into either a
//! validated [`serde_json::Map`] or a
//! [`ConfigError`]/[`ErrorKind::ConfigValidation`] describing exactly
//! which field failed and why.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::env;
use std::path::Path;

use integration_core::errors::{ErrorKind, FrameworkError};
use integration_core::model::{Step, StepStartState};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// The declared type of an instance configuration field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// A UTF-8 string value.
    String,
    /// A boolean value.
    Boolean,
    /// A numeric value.
    Number,
}

/// One declared entry of `instanceConfigFields`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDeclaration {
    /// The field's expected type.
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Whether the field must be present and non-null.
    #[serde(default)]
    pub required: bool,
    /// Whether the field's value should be redacted in debug output.
    #[serde(default)]
    pub mask: bool,
}

/// Failures raised while validating instance configuration or step
/// start state.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required field was missing or null.
    #[error("missing required config field \"{field}\"")]
    MissingField {
        /// Name of the missing field.
        field: String,
    },
    /// A field's value did not match its declared type.
    #[error("config field \"{field}\" expected type {expected:?}, got a different type")]
    TypeMismatch {
        /// Name of the mismatched field.
        field: String,
        /// The declared expected type.
        expected: FieldType,
    },
    /// One or more declared steps had no corresponding start-state entry.
    #[error("start state is missing entries for declared steps: {missing:?}")]
    UnaccountedStepStartStates {
        /// Declared steps with no start-state entry.
        missing: Vec<String>,
    },
    /// A start-state entry named a step id outside the declared graph.
    #[error("start state names undeclared step ids: {extra:?}")]
    StepStartStateInvalidStepId {
        /// Start-state entries naming an undeclared step.
        extra: Vec<String>,
    },
    /// Reading or parsing a configuration file on disk failed.
    #[error("failed to load config file {path}: {source}")]
    LoadFile {
        /// Path that could not be loaded.
        path: String,
        /// Underlying error (I/O or TOML parse failure).
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl From<ConfigError> for FrameworkError {
    fn from(value: ConfigError) -> Self {
        FrameworkError::new(ErrorKind::ConfigValidation, value.to_string())
    }
}

/// Validates `raw` against `declared`, returning a field-by-field
/// validated map on success.
///
/// # Errors
/// Returns [`ConfigError::MissingField`] if a required field is absent
/// or null, and [`ConfigError::TypeMismatch`] if a present field's JSON
/// type does not match its declaration.
pub fn validate_instance_config(
    declared: &BTreeMap<String, FieldDeclaration>,
    raw: &serde_json::Map<String, Value>,
) -> Result<serde_json::Map<String, Value>, ConfigError> {
    let mut validated = serde_json::Map::new();
    for (name, declaration) in declared {
        let value = raw.get(name).cloned().unwrap_or(Value::Null);
        if value.is_null() {
            if declaration.required {
                return Err(ConfigError::MissingField { field: name.clone() });
            }
            continue;
        }
        let matches = match declaration.field_type {
            FieldType::String => value.is_string(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Number => value.is_number(),
        };
        if !matches {
            return Err(ConfigError::TypeMismatch {
                field: name.clone(),
                expected: declaration.field_type,
            });
        }
        validated.insert(name.clone(), value);
    }
    Ok(validated)
}

/// Renders `config` for debug/log output, replacing every field marked
/// `mask: true` with a fixed placeholder.
#[must_use]
pub fn mask_for_logging(
    declared: &BTreeMap<String, FieldDeclaration>,
    config: &serde_json::Map<String, Value>,
) -> serde_json::Map<String, Value> {
    config
        .iter()
        .map(|(name, value)| {
            let masked = declared.get(name).is_some_and(|d| d.mask);
            if masked {
                (name.clone(), Value::String("***".to_string()))
            } else {
                (name.clone(), value.clone())
            }
        })
        .collect()
}

/// Validates that `start_state` has exactly one entry per step declared
/// in `steps`, with no extraneous entries.
///
/// # Errors
/// Returns [`ConfigError::UnaccountedStepStartStates`] if any declared
/// step has no start-state entry, checked before
/// [`ConfigError::StepStartStateInvalidStepId`], which is returned if
/// `start_state` names a step id outside the declared graph.
pub fn validate_start_state(
    steps: &[Step],
    start_state: &BTreeMap<String, StepStartState>,
) -> Result<(), ConfigError> {
    let declared: std::collections::BTreeSet<&str> =
        steps.iter().map(|s| s.id.as_str()).collect();
    let provided: std::collections::BTreeSet<&str> =
        start_state.keys().map(String::as_str).collect();

    let missing: Vec<String> = declared
        .difference(&provided)
        .map(|s| (*s).to_string())
        .collect();
    if !missing.is_empty() {
        return Err(ConfigError::UnaccountedStepStartStates { missing });
    }

    let extra: Vec<String> = provided
        .difference(&declared)
        .map(|s| (*s).to_string())
        .collect();
    if !extra.is_empty() {
        return Err(ConfigError::StepStartStateInvalidStepId { extra });
    }

    Ok(())
}

/// Loads instance configuration from a TOML file at `path`, then
/// overlays environment variables named `JUPITERONE_<FIELD_NAME>`
/// (uppercased, non-alphanumeric replaced with `_`) on top of the file's
/// values, and finally validates the merged result against `declared`.
///
/// # Errors
/// Returns [`ConfigError::LoadFile`] if the file cannot be read or
/// parsed, or any validation error from
/// [`validate_instance_config`].
pub fn load_instance_config(
    path: &Path,
    declared: &BTreeMap<String, FieldDeclaration>,
) -> Result<serde_json::Map<String, Value>, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::LoadFile {
        path: path.display().to_string(),
        source: Box::new(source),
    })?;
    let parsed: toml::Value = toml::from_str(&contents).map_err(|source| ConfigError::LoadFile {
        path: path.display().to_string(),
        source: Box::new(source),
    })?;
    let mut raw = toml_to_json_object(parsed);

    for name in declared.keys() {
        let env_name = format!(
            "JUPITERONE_{}",
            name.to_uppercase().replace(|c: char| !c.is_alphanumeric(), "_")
        );
        if let Ok(value) = env::var(&env_name) {
            raw.insert(name.clone(), Value::String(value));
        }
    }

    validate_instance_config(declared, &raw)
}

/// Converts a parsed TOML document's top-level table into a JSON
/// object map. Any non-table root value yields an empty map.
fn toml_to_json_object(value: toml::Value) -> serde_json::Map<String, Value> {
    match value {
        toml::Value::Table(table) => table
            .into_iter()
            .map(|(k, v)| (k, toml_to_json_value(v)))
            .collect(),
        _ => serde_json::Map::new(),
    }
}

/// Recursively converts one TOML value into its JSON equivalent.
/// Datetimes are rendered as their RFC 3339 string form, since JSON has
/// no native datetime type.
fn toml_to_json_value(value: toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::Number(i.into()),
        toml::Value::Float(f) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Array(items) => Value::Array(items.into_iter().map(toml_to_json_value).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json_value(v)))
                .collect(),
        ),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
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

    fn declared_fields() -> BTreeMap<String, FieldDeclaration> {
        let mut declared = BTreeMap::new();
        declared.insert(
            "apiKey".to_string(),
            FieldDeclaration {
                field_type: FieldType::String,
                required: true,
                mask: true,
            },
        );
        declared.insert(
            "pollIntervalSeconds".to_string(),
            FieldDeclaration {
                field_type: FieldType::Number,
                required: false,
                mask: false,
            },
        );
        declared
    }

    #[test]
    fn rejects_missing_required_field() {
        let declared = declared_fields();
        let raw = serde_json::Map::new();
        let err = validate_instance_config(&declared, &raw).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { field } if field == "apiKey"));
    }

    #[test]
    fn rejects_type_mismatch() {
        let declared = declared_fields();
        let mut raw = serde_json::Map::new();
        raw.insert("apiKey".to_string(), Value::Bool(true));
        let err = validate_instance_config(&declared, &raw).unwrap_err();
        assert!(matches!(err, ConfigError::TypeMismatch { field, .. } if field == "apiKey"));
    }

    #[test]
    fn accepts_valid_config() {
        let declared = declared_fields();
        let mut raw = serde_json::Map::new();
        raw.insert("apiKey".to_string(), Value::String("secret".to_string()));
        let validated = validate_instance_config(&declared, &raw).expect("valid config");
        assert_eq!(validated.get("apiKey"), Some(&Value::String("secret".to_string())));
    }

    #[test]
    fn masks_sensitive_fields_for_logging() {
        let declared = declared_fields();
        let mut config = serde_json::Map::new();
        config.insert("apiKey".to_string(), Value::String("secret".to_string()));
        let masked = mask_for_logging(&declared, &config);
        assert_eq!(masked.get("apiKey"), Some(&Value::String("***".to_string())));
    }

    fn step(id: &str) -> Step {
        Step {
            id: id.to_string(),
            name: id.to_string(),
            entities: Vec::new(),
            relationships: Vec::new(),
            dependency_step_ids: Vec::new(),
        }
    }

    #[test]
    fn missing_step_entries_are_reported() {
        let steps = vec![step("a"), step("b")];
        let mut start_state = BTreeMap::new();
        start_state.insert("a".to_string(), StepStartState { disabled: false });
        let err = validate_start_state(&steps, &start_state).unwrap_err();
        assert!(matches!(err, ConfigError::UnaccountedStepStartStates { missing } if missing == vec!["b".to_string()]));
    }

    #[test]
    fn extraneous_step_entries_are_reported() {
        let steps = vec![step("a")];
        let mut start_state = BTreeMap::new();
        start_state.insert("a".to_string(), StepStartState { disabled: false });
        start_state.insert("c".to_string(), StepStartState { disabled: false });
        let err = validate_start_state(&steps, &start_state).unwrap_err();
        assert!(matches!(err, ConfigError::StepStartStateInvalidStepId { extra } if extra == vec!["c".to_string()]));
    }
}
