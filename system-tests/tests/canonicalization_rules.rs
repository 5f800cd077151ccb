//! Scenario: canonicalization mirrors identity fields into the property
//! bag, expands and promotes tags, resolves display name precedence, and
//! rejects duplicate raw data names.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Integration test assertions use expect/unwrap for clarity."
)]

use integration_core::canonicalize::{create_integration_entity, EntityAssignment, EntityClass};
use integration_core::errors::ErrorKind;
use integration_core::model::{PropertyBag, PropertyValue, RawDataEntry};

fn assign() -> EntityAssignment {
    EntityAssignment {
        entity_type: "aws_s3_bucket".to_string(),
        class: EntityClass::Single("DataStore".to_string()),
        key: None,
        whitelist: Vec::new(),
        raw_data: Vec::new(),
        properties: PropertyBag::new(),
    }
}

#[test]
fn identity_fields_are_mirrored_into_properties() {
    let source = serde_json::json!({"id": "my-bucket", "name": "my-bucket"});
    let entity = create_integration_entity(assign(), source, None).expect("valid input");
    assert_eq!(
        entity.properties.get("_key"),
        Some(&PropertyValue::String("my-bucket".to_string()))
    );
    assert_eq!(
        entity.properties.get("_class"),
        Some(&PropertyValue::StringArray(vec!["DataStore".to_string()]))
    );
    assert_eq!(entity.class, vec!["DataStore".to_string()]);
}

#[test]
fn structurally_empty_default_raw_data_is_dropped_but_extra_entries_survive() {
    let mut a = assign();
    a.raw_data.push(RawDataEntry {
        name: "tags".to_string(),
        raw_data: serde_json::json!({"env": "prod"}),
    });
    let entity = create_integration_entity(a, serde_json::json!({}), None).expect("valid input");
    assert_eq!(entity.raw_data.len(), 1);
    assert_eq!(entity.raw_data[0].name, "tags");
}

#[test]
fn tags_are_expanded_and_caller_supplied_tag_properties_are_promoted() {
    let source = serde_json::json!({
        "id": "my-bucket",
        "name": "my-bucket",
        "tags": [
            {"Key": "classification", "Value": "confidential"},
            {"Key": "owner", "Value": "platform-team"},
        ],
    });
    let tag_properties = vec!["owner".to_string()];
    let entity = create_integration_entity(assign(), source, Some(&tag_properties)).expect("valid input");
    assert_eq!(
        entity.properties.get("tag.classification"),
        Some(&PropertyValue::String("confidential".to_string()))
    );
    assert_eq!(
        entity.properties.get("classification"),
        Some(&PropertyValue::String("confidential".to_string()))
    );
    assert_eq!(
        entity.properties.get("tag.owner"),
        Some(&PropertyValue::String("platform-team".to_string()))
    );
    assert_eq!(
        entity.properties.get("owner"),
        Some(&PropertyValue::String("platform-team".to_string()))
    );
}

#[test]
fn duplicate_raw_data_names_fail_canonicalization() {
    let mut a = assign();
    a.raw_data.push(RawDataEntry {
        name: "default".to_string(),
        raw_data: serde_json::json!({"b": 2}),
    });
    let source = serde_json::json!({"id": "my-bucket", "name": "my-bucket", "a": 1});
    let err = create_integration_entity(a, source, None).expect_err("duplicate names must be rejected");
    assert_eq!(err.kind(), ErrorKind::Canonicalization);
}

#[test]
fn multi_class_assignment_is_preserved_in_order() {
    let mut a = assign();
    a.class = EntityClass::Many(vec!["DataStore".to_string(), "Resource".to_string()]);
    let source = serde_json::json!({"id": "my-bucket", "name": "my-bucket"});
    let entity = create_integration_entity(a, source, None).expect("valid input");
    assert_eq!(entity.class, vec!["DataStore".to_string(), "Resource".to_string()]);
}
