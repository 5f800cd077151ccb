// crates/integration-core/src/canonicalize.rs
// ============================================================================
// Module: canonicalize
// Description: Implements createIntegrationEntity (§4.2): the rule that
//              turns a step handler's assigned fields and a raw provider
//              payload into a canonical Entity ready for the graph store.
// Dependencies: serde_json, time
// ============================================================================

use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::errors::{ErrorKind, FrameworkError};
use crate::model::{Entity, PropertyBag, PropertyValue, RawDataEntry};

/// Property names copied from `source` into every entity regardless of
/// its declared type, per the whitelist-fold rule (step 2).
const COMMON_WHITELIST: &[&str] = &["id", "name", "displayName", "environment", "createdOn", "active"];

/// Tag keys promoted to a top-level property in addition to their
/// `tag.<Key>` form, regardless of the caller's `tagProperties` list.
const COMMON_TAG_PROMOTION: &[&str] = &["classification", "name"];

/// The `_class` value a step handler assigns: either a single class or a
/// list of classes. Normalized to a non-empty list during
/// canonicalization.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityClass {
    /// A single class tag, e.g. `"Host"`.
    Single(String),
    /// Multiple class tags, e.g. `["Host", "Device"]`.
    Many(Vec<String>),
}

impl EntityClass {
    /// Normalizes this assignment into a flat list of class tags.
    fn into_list(self) -> Vec<String> {
        match self {
            Self::Single(class) => vec![class],
            Self::Many(classes) => classes,
        }
    }
}

/// The caller-forced fields a step handler assigns directly, as opposed
/// to fields folded in from `source`.
///
/// # Invariants
/// - `whitelist` names fields specific to `entity_type`; the common
///   whitelist (`id`, `name`, `displayName`, `environment`, `createdOn`,
///   `active`) is always folded regardless of this list's contents.
#[derive(Debug, Clone)]
pub struct EntityAssignment {
    /// The entity type label, e.g. `"aws_s3_bucket"`.
    pub entity_type: String,
    /// Required class assignment, normalized to a list during
    /// canonicalization.
    pub class: EntityClass,
    /// Explicit identity key. Falls back to `source.id` when absent.
    pub key: Option<String>,
    /// Extra property names to fold in from `source` beyond the common
    /// whitelist, specific to this entity's type.
    pub whitelist: Vec<String>,
    /// Raw data snapshots appended after the default `source` snapshot.
    pub raw_data: Vec<RawDataEntry>,
    /// Any other caller-forced properties, merged on top of the
    /// accumulated record and overriding matching keys.
    pub properties: PropertyBag,
}

/// Whether a raw JSON value is "structurally empty": `null`, an empty
/// object, or an empty array. Matches the original system's emptiness
/// check used to decide whether a raw data entry is worth keeping.
#[must_use]
pub fn is_structurally_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Converts a JSON scalar or homogeneous string array into a
/// [`PropertyValue`]. Objects, and arrays containing anything other than
/// strings, have no property bag representation and are skipped.
fn json_to_property_value(value: &Value) -> Option<PropertyValue> {
    match value {
        Value::Null => Some(PropertyValue::Null),
        Value::Bool(b) => Some(PropertyValue::Bool(*b)),
        Value::Number(n) => n.as_i64().map_or_else(|| n.as_f64().map(PropertyValue::Float), |i| Some(PropertyValue::Int(i))),
        Value::String(s) => Some(PropertyValue::String(s.clone())),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(item.as_str()?.to_string());
            }
            Some(PropertyValue::StringArray(out))
        }
        Value::Object(_) => None,
    }
}

/// Copies every whitelisted field present on `source` into `properties`
/// (step 2): the common whitelist plus `extra_whitelist`.
fn whitelist_fold(properties: &mut PropertyBag, source: &Value, extra_whitelist: &[String]) {
    let Some(object) = source.as_object() else {
        return;
    };
    let names = COMMON_WHITELIST.iter().copied().chain(extra_whitelist.iter().map(String::as_str));
    for name in names {
        if let Some(converted) = object.get(name).and_then(json_to_property_value) {
            properties.insert(name.to_string(), converted);
        }
    }
}

/// Applies the status rule (step 3): `active` is set true when
/// `source.status == "Active"`, and otherwise cleared so a stale
/// whitelisted value doesn't linger unless `assign` restores it later.
fn apply_status(properties: &mut PropertyBag, source: &Value) {
    let is_active = source
        .as_object()
        .and_then(|object| object.get("status"))
        .and_then(Value::as_str)
        .is_some_and(|status| status == "Active");
    if is_active {
        properties.insert("active".to_string(), PropertyValue::Bool(true));
    } else {
        properties.remove("active");
    }
}

/// Converts `source.creationDate` into an epoch-millisecond `createdOn`
/// property (step 4), accepting either an RFC 3339 string or a numeric
/// epoch value already in milliseconds.
fn apply_created_on(properties: &mut PropertyBag, source: &Value) {
    let Some(creation_date) = source.as_object().and_then(|object| object.get("creationDate")) else {
        return;
    };
    let created_on = match creation_date {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => OffsetDateTime::parse(s, &Rfc3339)
            .ok()
            .map(|dt| dt.unix_timestamp() * 1000 + i64::from(dt.millisecond())),
        _ => None,
    };
    if let Some(created_on) = created_on {
        properties.insert("createdOn".to_string(), PropertyValue::Int(created_on));
    }
}

/// Applies the tag-expansion/promotion rule (step 5): every entry of
/// `source.tags` (an array of `{Key, Value}` objects) is written as
/// `tag.<Key>`, and additionally promoted to a bare `<Key>` property when
/// `Key` is in the common promotion set or in `tag_properties`.
fn apply_tags(properties: &mut PropertyBag, source: &Value, tag_properties: &[String]) {
    let Some(tags) = source.as_object().and_then(|object| object.get("tags")).and_then(Value::as_array) else {
        return;
    };
    for tag in tags {
        let Some(tag_object) = tag.as_object() else {
            continue;
        };
        let (Some(key), Some(raw_value)) = (tag_object.get("Key").and_then(Value::as_str), tag_object.get("Value")) else {
            continue;
        };
        let Some(converted) = json_to_property_value(raw_value) else {
            continue;
        };
        properties.insert(format!("tag.{key}"), converted.clone());
        if COMMON_TAG_PROMOTION.contains(&key) || tag_properties.iter().any(|promoted| promoted == key) {
            properties.insert(key.to_string(), converted);
        }
    }
}

/// Resolves `displayName` per the step 6 precedence rule: an explicit
/// `assign.displayName` wins, then a `Key: "name"` tag, then
/// `source.name`.
///
/// # Errors
/// Returns a [`FrameworkError`] of kind [`ErrorKind::Canonicalization`]
/// if none of the three sources supply a name.
fn resolve_display_name(assign_properties: &PropertyBag, folded_properties: &PropertyBag, source: &Value) -> Result<String, FrameworkError> {
    let assign_display_name = assign_properties.get("displayName").and_then(property_value_as_str);
    let tag_name = folded_properties.get("tag.name").and_then(property_value_as_str);
    let source_name = source.as_object().and_then(|object| object.get("name")).and_then(Value::as_str);

    assign_display_name
        .or(tag_name)
        .or(source_name)
        .map(str::to_string)
        .ok_or_else(|| FrameworkError::new(ErrorKind::Canonicalization, "entity display name is required"))
}

/// Extracts a string out of a [`PropertyValue::String`], or `None` for
/// any other variant.
fn property_value_as_str(value: &PropertyValue) -> Option<&str> {
    match value {
        PropertyValue::String(s) => Some(s.as_str()),
        _ => None,
    }
}

/// Resolves the entity's identity key (step 10): an explicit
/// `assign.key` wins, falling back to `source.id` rendered as a string.
///
/// # Errors
/// Returns a [`FrameworkError`] of kind [`ErrorKind::Canonicalization`]
/// if neither source supplies a key.
fn resolve_key(assign_key: Option<String>, source: &Value) -> Result<String, FrameworkError> {
    assign_key
        .or_else(|| {
            source.as_object().and_then(|object| object.get("id")).and_then(|id| match id {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
        })
        .ok_or_else(|| FrameworkError::new(ErrorKind::Canonicalization, "entity key is required"))
}

/// Builds a canonical [`Entity`] from `assign` and a raw provider
/// `source` payload, applying the full canonicalization transform:
///
/// 1. Start from an empty property bag.
/// 2. Fold in whitelisted `source` fields (common plus `assign.whitelist`).
/// 3. Derive `active` from `source.status`.
/// 4. Derive `createdOn` from `source.creationDate`.
/// 5. Expand and selectively promote `source.tags`.
/// 6. Resolve `displayName` (`assign` > tag `name` > `source.name`).
/// 7. Merge `assign.properties` on top, overriding matching keys.
/// 8. Prepend the default `source` raw data snapshot (unless
///    structurally empty) and append `assign.raw_data`, rejecting
///    duplicate names.
/// 9. Normalize `assign.class` into a non-empty list.
/// 10. Resolve the identity key (`assign.key` > `source.id`).
///
/// `_key`/`_type`/`_class` are finally mirrored into the property bag so
/// any consumer that only looks at flat properties still sees them.
///
/// # Errors
/// Returns a [`FrameworkError`] of kind [`ErrorKind::Canonicalization`]
/// when no display name or key can be resolved, the class list is
/// empty, or raw data entry names collide.
pub fn create_integration_entity(
    assign: EntityAssignment,
    source: Value,
    tag_properties: Option<&[String]>,
) -> Result<Entity, FrameworkError> {
    let tag_properties = tag_properties.unwrap_or(&[]);

    let mut properties = PropertyBag::new();
    whitelist_fold(&mut properties, &source, &assign.whitelist);
    apply_status(&mut properties, &source);
    apply_created_on(&mut properties, &source);
    apply_tags(&mut properties, &source, tag_properties);

    let mut assign_properties = assign.properties;
    let display_name = resolve_display_name(&assign_properties, &properties, &source)?;
    properties.insert("displayName".to_string(), PropertyValue::String(display_name));

    properties.append(&mut assign_properties);

    let mut raw_data = Vec::with_capacity(assign.raw_data.len() + 1);
    if !is_structurally_empty(&source) {
        raw_data.push(RawDataEntry {
            name: "default".to_string(),
            raw_data: source.clone(),
        });
    }
    raw_data.extend(assign.raw_data);

    let mut seen_names = std::collections::BTreeSet::new();
    let mut deduped_raw_data = Vec::with_capacity(raw_data.len());
    for entry in raw_data {
        if is_structurally_empty(&entry.raw_data) {
            continue;
        }
        if !seen_names.insert(entry.name.clone()) {
            return Err(FrameworkError::new(
                ErrorKind::Canonicalization,
                format!("duplicate raw data name \"{}\"", entry.name),
            ));
        }
        deduped_raw_data.push(entry);
    }

    let class = assign.class.into_list();
    if class.is_empty() {
        return Err(FrameworkError::new(ErrorKind::Canonicalization, "entity class must not be empty"));
    }

    let key = resolve_key(assign.key, &source)?;

    properties.insert("_key".to_string(), PropertyValue::String(key.clone()));
    properties.insert("_type".to_string(), PropertyValue::String(assign.entity_type.clone()));
    properties.insert("_class".to_string(), PropertyValue::StringArray(class.clone()));

    Ok(Entity {
        key,
        entity_type: assign.entity_type,
        class,
        properties,
        raw_data: deduped_raw_data,
    })
}

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test assertions use expect/unwrap for clarity."
    )]
    use super::*;

    fn assign() -> EntityAssignment {
        EntityAssignment {
            entity_type: "test_host".to_string(),
            class: EntityClass::Single("Host".to_string()),
            key: None,
            whitelist: Vec::new(),
            raw_data: Vec::new(),
            properties: PropertyBag::new(),
        }
    }

    #[test]
    fn rejects_empty_class_list() {
        let mut a = assign();
        a.class = EntityClass::Many(Vec::new());
        let source = serde_json::json!({"id": "host-1", "name": "n"});
        let err = create_integration_entity(a, source, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Canonicalization);
    }

    #[test]
    fn rejects_missing_key() {
        let source = serde_json::json!({"name": "n"});
        let err = create_integration_entity(assign(), source, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Canonicalization);
    }

    #[test]
    fn rejects_missing_display_name() {
        let source = serde_json::json!({"id": "host-1"});
        let err = create_integration_entity(assign(), source, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Canonicalization);
    }

    #[test]
    fn mirrors_identity_fields_into_properties() {
        let source = serde_json::json!({"id": "host-1", "name": "my-host"});
        let entity = create_integration_entity(assign(), source, None).expect("valid input");
        assert_eq!(entity.key, "host-1");
        assert_eq!(entity.class, vec!["Host".to_string()]);
        assert_eq!(
            entity.properties.get("_key"),
            Some(&PropertyValue::String("host-1".to_string()))
        );
        assert_eq!(
            entity.properties.get("_class"),
            Some(&PropertyValue::StringArray(vec!["Host".to_string()]))
        );
    }

    #[test]
    fn tags_are_expanded_and_common_keys_promoted() {
        let source = serde_json::json!({
            "id": "x",
            "name": "N",
            "tags": [{"Key": "classification", "Value": "critical"}],
        });
        let entity = create_integration_entity(assign(), source.clone(), None).expect("valid input");
        assert_eq!(
            entity.properties.get("tag.classification"),
            Some(&PropertyValue::String("critical".to_string()))
        );
        assert_eq!(
            entity.properties.get("classification"),
            Some(&PropertyValue::String("critical".to_string()))
        );
        assert_eq!(
            entity.properties.get("displayName"),
            Some(&PropertyValue::String("N".to_string()))
        );
        assert_eq!(entity.raw_data.len(), 1);
        assert_eq!(entity.raw_data[0].name, "default");
        assert_eq!(entity.raw_data[0].raw_data, source);
    }

    #[test]
    fn display_name_precedence_prefers_assign_then_tag_then_source() {
        let mut a = assign();
        a.properties.insert("displayName".to_string(), PropertyValue::String("forced".to_string()));
        let source = serde_json::json!({
            "id": "x",
            "name": "source-name",
            "tags": [{"Key": "name", "Value": "tag-name"}],
        });
        let entity = create_integration_entity(a, source, None).expect("valid input");
        assert_eq!(
            entity.properties.get("displayName"),
            Some(&PropertyValue::String("forced".to_string()))
        );
    }

    #[test]
    fn assign_raw_data_duplicating_default_name_is_rejected() {
        let mut a = assign();
        a.raw_data.push(RawDataEntry {
            name: "default".to_string(),
            raw_data: serde_json::json!({"extra": true}),
        });
        let source = serde_json::json!({"id": "x", "name": "n"});
        let err = create_integration_entity(a, source, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Canonicalization);
    }

    #[test]
    fn created_on_parses_rfc3339_creation_date() {
        let source = serde_json::json!({
            "id": "x",
            "name": "n",
            "creationDate": "2024-01-01T00:00:00Z",
        });
        let entity = create_integration_entity(assign(), source, None).expect("valid input");
        assert_eq!(entity.properties.get("createdOn"), Some(&PropertyValue::Int(1_704_067_200_000)));
    }

    #[test]
    fn active_is_derived_from_status() {
        let source = serde_json::json!({"id": "x", "name": "n", "status": "Active"});
        let entity = create_integration_entity(assign(), source, None).expect("valid input");
        assert_eq!(entity.properties.get("active"), Some(&PropertyValue::Bool(true)));
    }

    #[test]
    fn creation_is_idempotent() {
        let a = assign();
        let source = serde_json::json!({"id": "x", "name": "n"});
        let first = create_integration_entity(a.clone(), source.clone(), None).expect("valid input");
        let second = create_integration_entity(a, source, None).expect("valid input");
        assert_eq!(first, second);
    }
}
