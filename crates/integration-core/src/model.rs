// crates/integration-core/src/model.rs
// ============================================================================
// Module: model
// Description: Core data model — steps, entities, relationships, the
//              bucket map that batches them for flush, and the raw-data
//              envelope attached to every entity/relationship.
// Dependencies: serde, serde_json
// ============================================================================
//! ## Overview
//!
//! Types here mirror §3 of the integration execution framework's data
//! model: a declared [`Step`] graph, the [`StepStartState`] map that gates
//! which steps actually run, and the [`Entity`]/[`Relationship`] shapes
//! that flow from step handlers into the graph object store.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single property value in an entity or relationship's property bag.
///
/// # Invariants
/// - Arrays are homogeneous: every element of a `StringArray` is a string.
///   Heterogeneous arrays are not representable and must be rejected by
///   canonicalization before they reach this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// UTF-8 string value.
    String(String),
    /// 64-bit signed integer value.
    Int(i64),
    /// 64-bit floating point value.
    Float(f64),
    /// Boolean value.
    Bool(bool),
    /// An array of string values.
    StringArray(Vec<String>),
    /// Explicit null, distinct from an absent key.
    Null,
}

/// An open property bag keyed by property name.
pub type PropertyBag = BTreeMap<String, PropertyValue>;

/// The raw provider payload an entity or relationship was derived from,
/// attached under the `_rawData` key per the canonicalization rules.
///
/// # Invariants
/// - `name` is unique within the list of raw data entries attached to a
///   single entity; duplicates are rejected by the canonicalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDataEntry {
    /// Logical name of this raw data snapshot, usually `"default"`.
    pub name: String,
    /// The raw payload itself, stored verbatim.
    pub raw_data: serde_json::Value,
}

/// A canonical graph entity ready for storage and synchronization.
///
/// # Invariants
/// - `key` is unique within the scope of a single integration instance.
/// - `class` is a non-empty list of class tags.
/// - `raw_data` entries have unique `name` fields (enforced by the
///   canonicalizer, not by this type directly).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Stable identity key, unique within the instance.
    #[serde(rename = "_key")]
    pub key: String,
    /// The J1-style class/type label, e.g. `"Host"`.
    #[serde(rename = "_type")]
    pub entity_type: String,
    /// Non-empty list of class tags, e.g. `["Host"]` or `["Network"]`.
    #[serde(rename = "_class")]
    pub class: Vec<String>,
    /// Canonicalized property bag, including `_key`/`_type`/`_class`
    /// mirrored in as plain properties per the canonicalization rule.
    #[serde(flatten)]
    pub properties: PropertyBag,
    /// Raw provider payload(s) this entity was derived from.
    #[serde(rename = "_rawData", skip_serializing_if = "Vec::is_empty")]
    pub raw_data: Vec<RawDataEntry>,
}

/// A canonical graph relationship connecting two entity keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// Stable identity key, unique within the instance.
    #[serde(rename = "_key")]
    pub key: String,
    /// The relationship type, e.g. `"HOSTS"`.
    #[serde(rename = "_type")]
    pub relationship_type: String,
    /// The relationship class, e.g. `"HAS"`.
    #[serde(rename = "_class")]
    pub class: String,
    /// Key of the source entity.
    #[serde(rename = "_fromEntityKey")]
    pub from_entity_key: String,
    /// Key of the target entity.
    #[serde(rename = "_toEntityKey")]
    pub to_entity_key: String,
    /// Additional relationship properties.
    #[serde(flatten)]
    pub properties: PropertyBag,
}

/// A declared unit of data collection work.
///
/// # Invariants
/// - `id` is unique within the declared step graph.
/// - `dependency_step_ids` only reference ids that are themselves
///   declared in the same step graph (no dangling dependencies).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Unique identifier of this step within the graph.
    pub id: String,
    /// Human-readable name surfaced in logs and sync progress.
    pub name: String,
    /// Entity types this step is declared to produce.
    pub entities: Vec<String>,
    /// Relationship types this step is declared to produce.
    pub relationships: Vec<String>,
    /// Ids of steps that must complete successfully before this one runs.
    #[serde(default)]
    pub dependency_step_ids: Vec<String>,
}

/// The lifecycle state of a single step's execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Declared in the start state but not yet attempted.
    Pending,
    /// Currently executing.
    InProgress,
    /// Completed without error.
    Success,
    /// Completed with an error and will not be retried this invocation.
    Failure,
    /// Never invoked because a transitive dependency ended in `Failure`,
    /// `Disabled`, or this same status; the step itself did not fail.
    PartialSuccessDueToDependencyFailure,
    /// Never invoked because the start state marked it disabled.
    Disabled,
}

/// Per-step disposition the caller supplies before execution begins.
///
/// # Invariants
/// - Every step id declared in the step graph has exactly one entry
///   (§6, §8 scenario 1) — enforced by `integration-config`, not this
///   type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepStartState {
    /// Whether the step is permitted to run at all.
    pub disabled: bool,
}

/// Generic keyed append-only buffer (§4.1): maps bucket-path strings —
/// normally a step id, or a step id joined with an entity/relationship
/// type for index buckets — to ordered lists of items, with a running
/// total the owning store uses to decide when to flush.
///
/// # Invariants
/// - `total_item_count()` always equals the sum of every bucket's
///   length; `add`/`delete` keep it in sync rather than recomputing it.
/// - Items within a bucket are kept in the order they were added.
#[derive(Debug, Clone)]
pub struct BucketMap<T> {
    /// Ordered items buffered per bucket path.
    buckets: BTreeMap<String, Vec<T>>,
    /// Running total of items across every bucket.
    total_item_count: usize,
}

/// Default flush threshold per §3: a store flushes a bucket once its
/// item count reaches this many items.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 500;

impl<T> BucketMap<T> {
    /// Creates an empty bucket map.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buckets: BTreeMap::new(),
            total_item_count: 0,
        }
    }

    /// Appends `items` to the bucket at `path`, creating it if this is
    /// the first write to that path.
    pub fn add(&mut self, path: &str, items: impl IntoIterator<Item = T>) {
        let bucket = self.buckets.entry(path.to_string()).or_default();
        let before = bucket.len();
        bucket.extend(items);
        self.total_item_count += bucket.len() - before;
    }

    /// The items currently buffered under `path`, or an empty slice if
    /// that path has never been written to.
    #[must_use]
    pub fn get(&self, path: &str) -> &[T] {
        self.buckets.get(path).map_or(&[][..], Vec::as_slice)
    }

    /// Removes and returns every item buffered under `path`.
    pub fn delete(&mut self, path: &str) -> Vec<T> {
        let removed = self.buckets.remove(path).unwrap_or_default();
        self.total_item_count -= removed.len();
        removed
    }

    /// Every bucket path currently holding at least one item.
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        self.buckets.keys().map(String::as_str).collect()
    }

    /// The running total of items across every bucket.
    #[must_use]
    pub const fn total_item_count(&self) -> usize {
        self.total_item_count
    }

    /// Whether every bucket is currently empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total_item_count == 0
    }
}

impl<T> Default for BucketMap<T> {
    fn default() -> Self {
        Self::new()
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

    fn sample_entity(key: &str) -> Entity {
        Entity {
            key: key.to_string(),
            entity_type: "test_entity".to_string(),
            class: vec!["Resource".to_string()],
            properties: PropertyBag::new(),
            raw_data: Vec::new(),
        }
    }

    #[test]
    fn add_accumulates_the_running_total() {
        let mut bucket: BucketMap<Entity> = BucketMap::new();
        assert_eq!(bucket.total_item_count(), 0);
        bucket.add("fetch-roles", [sample_entity("a")]);
        assert_eq!(bucket.total_item_count(), 1);
        bucket.add("fetch-roles", [sample_entity("b"), sample_entity("c")]);
        assert_eq!(bucket.total_item_count(), 3);
        bucket.add("fetch-buckets", [sample_entity("d")]);
        assert_eq!(bucket.total_item_count(), 4);
    }

    #[test]
    fn get_returns_items_in_insertion_order() {
        let mut bucket: BucketMap<Entity> = BucketMap::new();
        bucket.add("fetch-roles", [sample_entity("a"), sample_entity("b")]);
        let items = bucket.get("fetch-roles");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].key, "a");
        assert_eq!(items[1].key, "b");
        assert!(bucket.get("missing").is_empty());
    }

    #[test]
    fn delete_drains_a_single_path_and_updates_the_total() {
        let mut bucket: BucketMap<Entity> = BucketMap::new();
        bucket.add("fetch-roles", [sample_entity("a")]);
        bucket.add("fetch-buckets", [sample_entity("b")]);
        let drained = bucket.delete("fetch-roles");
        assert_eq!(drained.len(), 1);
        assert_eq!(bucket.total_item_count(), 1);
        assert!(bucket.get("fetch-roles").is_empty());
        assert_eq!(bucket.keys(), vec!["fetch-buckets"]);
    }

    #[test]
    fn keys_lists_only_paths_with_buffered_items() {
        let mut bucket: BucketMap<Entity> = BucketMap::new();
        assert!(bucket.keys().is_empty());
        bucket.add("fetch-roles", [sample_entity("a")]);
        assert_eq!(bucket.keys(), vec!["fetch-roles"]);
    }
}
