// crates/integration-store/src/graph_store.rs
// ============================================================================
// Module: graph_store
// Description: Disk-backed implementation of GraphSink. Buffers entities
//              and relationships in two keyed BucketMaps (one bucket per
//              step id), flushes each drained bucket to a batched JSON
//              shard under the cache directory, partitioned into a
//              type-indexed tree for both entities and relationships, and
//              supports reading the index back for synchronization.
// Dependencies: integration-core, serde_json, uuid, tracing
// ============================================================================

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use integration_core::errors::FrameworkError;
use integration_core::model::{BucketMap, Entity, Relationship, DEFAULT_FLUSH_THRESHOLD};
use integration_core::store::GraphSink;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::StoreError;

/// Batched shard payload for a flushed group of entities.
#[derive(Debug, Serialize, Deserialize)]
struct EntityShard {
    /// Entities contained in this shard, in insertion order.
    entities: Vec<Entity>,
}

/// Batched shard payload for a flushed group of relationships.
#[derive(Debug, Serialize, Deserialize)]
struct RelationshipShard {
    /// Relationships contained in this shard, in insertion order.
    relationships: Vec<Relationship>,
}

/// Disk-backed graph object store rooted at a cache directory.
///
/// # Invariants
/// - All shard writes for this store instance go through `write_lock`,
///   so two flushes never interleave writes.
/// - Every flushed item is written to exactly two places: a mirror shard
///   under `graph/<kind>/<bucket>/<uuid>.json` and a type-indexed shard
///   under `index/<kind>/<type>/<uuid>.json`, with identical contents
///   for the items of that type.
pub struct GraphObjectStore {
    /// Root directory shard files are written under.
    cache_dir: PathBuf,
    /// Per-step entity buffers, keyed by step id.
    entities: Mutex<BucketMap<Entity>>,
    /// Per-step relationship buffers, keyed by step id.
    relationships: Mutex<BucketMap<Relationship>>,
    /// Serializes shard writes so concurrent flushes never interleave.
    write_lock: Mutex<()>,
    /// Item count per bucket map at which an add implicitly triggers a
    /// flush of that map.
    flush_threshold: usize,
}

impl GraphObjectStore {
    /// Creates a store rooted at `cache_dir`, using the default flush
    /// threshold.
    #[must_use]
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            entities: Mutex::new(BucketMap::new()),
            relationships: Mutex::new(BucketMap::new()),
            write_lock: Mutex::new(()),
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
        }
    }

    /// Returns the number of entities currently buffered (not yet
    /// flushed) for `step_id`.
    #[must_use]
    pub fn buffered_entity_count(&self, step_id: &str) -> usize {
        let entities = self.entities.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        entities.get(step_id).len()
    }

    /// Drains every bucket currently held in `map` and writes each one's
    /// items as a mirror shard plus per-type index shards.
    fn flush_map<T, F>(&self, map: &Mutex<BucketMap<T>>, kind: &str, type_of: F) -> Result<(), StoreError>
    where
        T: Serialize,
        F: Fn(&T) -> &str,
    {
        let paths: Vec<String> = {
            let guard = map.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            guard.keys().into_iter().map(str::to_string).collect()
        };
        for path in paths {
            let items: Vec<T> = {
                let mut guard = map.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                guard.delete(&path)
            };
            self.write_bucket(kind, &path, items, &type_of)?;
        }
        Ok(())
    }

    /// Drains the single bucket at `path` from `map` and writes it, if
    /// non-empty.
    fn flush_bucket<T, F>(
        &self,
        map: &Mutex<BucketMap<T>>,
        kind: &str,
        path: &str,
        type_of: F,
    ) -> Result<(), StoreError>
    where
        T: Serialize,
        F: Fn(&T) -> &str,
    {
        let items: Vec<T> = {
            let mut guard = map.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            guard.delete(path)
        };
        self.write_bucket(kind, path, items, &type_of)
    }

    /// Writes a drained batch under `graph/<kind>/<path>/<uuid>.json`
    /// and, partitioned by type, under `index/<kind>/<type>/<uuid>.json`.
    /// No-ops on an empty batch.
    fn write_bucket<T, F>(&self, kind: &str, path: &str, items: Vec<T>, type_of: &F) -> Result<(), StoreError>
    where
        T: Serialize,
        F: Fn(&T) -> &str,
    {
        if items.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        let mirror_dir = self.cache_dir.join("graph").join(kind).join(path);
        ensure_dir(&mirror_dir)?;
        let mirror_refs: Vec<&T> = items.iter().collect();
        let mirror_bytes = serde_json::to_vec_pretty(&ShardEnvelope { kind, items: mirror_refs.as_slice() })
            .map_err(StoreError::Serialize)?;
        write_file(&mirror_dir.join(format!("{}.json", Uuid::new_v4())), &mirror_bytes)?;

        let mut by_type: std::collections::BTreeMap<&str, Vec<&T>> = std::collections::BTreeMap::new();
        for item in &items {
            by_type.entry(type_of(item)).or_default().push(item);
        }
        for (item_type, group) in by_type {
            let type_dir = self.cache_dir.join("index").join(kind).join(item_type);
            ensure_dir(&type_dir)?;
            let bytes = serde_json::to_vec_pretty(&ShardEnvelope { kind, items: group.as_slice() })
                .map_err(StoreError::Serialize)?;
            write_file(&type_dir.join(format!("{}.json", Uuid::new_v4())), &bytes)?;
        }
        Ok(())
    }

    /// Walks `index/<kind>/<type_filter or every type>` in shard
    /// discovery order, decoding each shard and invoking `iteratee` once
    /// per contained item in insertion order. Stops at the first error
    /// `iteratee` returns.
    fn iterate_index<T>(
        &self,
        kind: &str,
        type_filter: Option<&str>,
        items_of: impl Fn(serde_json::Value) -> Result<Vec<T>, StoreError>,
        iteratee: &mut dyn FnMut(T) -> Result<(), FrameworkError>,
    ) -> Result<(), FrameworkError> {
        let index_root = self.cache_dir.join("index").join(kind);
        if !index_root.exists() {
            return Ok(());
        }
        let type_dirs: Vec<PathBuf> = match type_filter {
            Some(type_name) => {
                let dir = index_root.join(type_name);
                if dir.exists() { vec![dir] } else { Vec::new() }
            }
            None => {
                let mut dirs: Vec<PathBuf> = fs::read_dir(&index_root)
                    .map_err(|source| StoreError::ReadDir { path: index_root.clone(), source })?
                    .filter_map(|entry| entry.ok().map(|e| e.path()))
                    .filter(|p| p.is_dir())
                    .collect();
                dirs.sort();
                dirs
            }
        };

        for dir in type_dirs {
            let mut shard_files: Vec<PathBuf> = fs::read_dir(&dir)
                .map_err(|source| StoreError::ReadDir { path: dir.clone(), source })?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .collect();
            shard_files.sort();
            for shard_path in shard_files {
                let bytes = fs::read(&shard_path)
                    .map_err(|source| StoreError::ReadShard { path: shard_path.clone(), source })?;
                let raw: serde_json::Value = serde_json::from_slice(&bytes)
                    .map_err(|source| StoreError::Deserialize { path: shard_path.clone(), source })?;
                for item in items_of(raw)? {
                    iteratee(item)?;
                }
            }
        }
        Ok(())
    }
}

/// Internal shard envelope shape: `{"entities": [...]}` or
/// `{"relationships": [...]}`, keyed by `kind`.
struct ShardEnvelope<'a, T> {
    kind: &'a str,
    items: &'a [&'a T],
}

impl<T: Serialize> Serialize for ShardEnvelope<'_, T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(self.kind, self.items)?;
        map.end()
    }
}

/// Creates `path` and all missing parent directories.
fn ensure_dir(path: &Path) -> Result<(), StoreError> {
    fs::create_dir_all(path).map_err(|source| StoreError::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}

/// Writes `bytes` to `path`, overwriting any existing contents.
fn write_file(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    fs::write(path, bytes).map_err(|source| StoreError::WriteShard {
        path: path.to_path_buf(),
        source,
    })
}

impl GraphSink for GraphObjectStore {
    fn add_entity(&mut self, step_id: &str, entity: Entity) -> Result<(), FrameworkError> {
        let total = {
            let mut entities = self.entities.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            entities.add(step_id, [entity]);
            entities.total_item_count()
        };
        if total >= self.flush_threshold {
            self.flush_map(&self.entities, "entities", |e: &Entity| e.entity_type.as_str())
                .map_err(FrameworkError::from)?;
        }
        Ok(())
    }

    fn add_relationship(
        &mut self,
        step_id: &str,
        relationship: Relationship,
    ) -> Result<(), FrameworkError> {
        let total = {
            let mut relationships =
                self.relationships.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            relationships.add(step_id, [relationship]);
            relationships.total_item_count()
        };
        if total >= self.flush_threshold {
            self.flush_map(&self.relationships, "relationships", |r: &Relationship| {
                r.relationship_type.as_str()
            })
            .map_err(FrameworkError::from)?;
        }
        Ok(())
    }

    fn flush(&mut self, step_id: &str) -> Result<(), FrameworkError> {
        self.flush_bucket(&self.entities, "entities", step_id, |e: &Entity| e.entity_type.as_str())
            .map_err(FrameworkError::from)?;
        self.flush_bucket(&self.relationships, "relationships", step_id, |r: &Relationship| {
            r.relationship_type.as_str()
        })
        .map_err(FrameworkError::from)?;
        Ok(())
    }

    fn flush_all(&mut self) -> Result<(), FrameworkError> {
        self.flush_map(&self.entities, "entities", |e: &Entity| e.entity_type.as_str())
            .map_err(FrameworkError::from)?;
        self.flush_map(&self.relationships, "relationships", |r: &Relationship| {
            r.relationship_type.as_str()
        })
        .map_err(FrameworkError::from)?;
        Ok(())
    }

    fn iterate_entities(
        &mut self,
        entity_type: Option<&str>,
        iteratee: &mut dyn FnMut(Entity) -> Result<(), FrameworkError>,
    ) -> Result<(), FrameworkError> {
        self.flush_map(&self.entities, "entities", |e: &Entity| e.entity_type.as_str())
            .map_err(FrameworkError::from)?;
        self.iterate_index(
            "entities",
            entity_type,
            |raw| {
                let shard: EntityShard = serde_json::from_value(raw).map_err(|source| {
                    StoreError::Deserialize { path: PathBuf::from("<shard>"), source }
                })?;
                Ok(shard.entities)
            },
            iteratee,
        )
    }

    fn iterate_relationships(
        &mut self,
        relationship_type: Option<&str>,
        iteratee: &mut dyn FnMut(Relationship) -> Result<(), FrameworkError>,
    ) -> Result<(), FrameworkError> {
        self.flush_map(&self.relationships, "relationships", |r: &Relationship| {
            r.relationship_type.as_str()
        })
        .map_err(FrameworkError::from)?;
        self.iterate_index(
            "relationships",
            relationship_type,
            |raw| {
                let shard: RelationshipShard = serde_json::from_value(raw).map_err(|source| {
                    StoreError::Deserialize { path: PathBuf::from("<shard>"), source }
                })?;
                Ok(shard.relationships)
            },
            iteratee,
        )
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
    use integration_core::model::PropertyBag;
    use tempfile::tempdir;

    fn sample_entity(key: &str, entity_type: &str) -> Entity {
        Entity {
            key: key.to_string(),
            entity_type: entity_type.to_string(),
            class: vec!["Resource".to_string()],
            properties: PropertyBag::new(),
            raw_data: Vec::new(),
        }
    }

    fn sample_relationship(key: &str, relationship_type: &str) -> Relationship {
        Relationship {
            key: key.to_string(),
            relationship_type: relationship_type.to_string(),
            class: "HAS".to_string(),
            from_entity_key: "from".to_string(),
            to_entity_key: "to".to_string(),
            properties: PropertyBag::new(),
        }
    }

    #[test]
    fn flush_writes_mirror_and_index_shards() {
        let dir = tempdir().expect("tempdir");
        let mut store = GraphObjectStore::new(dir.path());
        store
            .add_entity("step-a", sample_entity("host:1", "test_host"))
            .expect("add succeeds");
        store.flush("step-a").expect("flush succeeds");

        let mirror_dir = dir.path().join("graph").join("entities").join("step-a");
        let index_dir = dir.path().join("index").join("entities").join("test_host");
        assert_eq!(fs::read_dir(&mirror_dir).expect("mirror dir exists").count(), 1);
        assert_eq!(fs::read_dir(&index_dir).expect("index dir exists").count(), 1);
    }

    #[test]
    fn relationships_get_their_own_type_index() {
        let dir = tempdir().expect("tempdir");
        let mut store = GraphObjectStore::new(dir.path());
        store
            .add_relationship("step-a", sample_relationship("rel:1", "HOSTS"))
            .expect("add succeeds");
        store.flush("step-a").expect("flush succeeds");

        let index_dir = dir.path().join("index").join("relationships").join("HOSTS");
        assert_eq!(fs::read_dir(&index_dir).expect("index dir exists").count(), 1);
    }

    #[test]
    fn implicit_flush_at_threshold_clears_buffer() {
        let dir = tempdir().expect("tempdir");
        let mut store = GraphObjectStore::new(dir.path());
        for i in 0..DEFAULT_FLUSH_THRESHOLD {
            store
                .add_entity("step-a", sample_entity(&i.to_string(), "test_host"))
                .expect("add succeeds");
        }
        assert_eq!(store.buffered_entity_count("step-a"), 0);
    }

    #[test]
    fn flush_with_nothing_buffered_is_a_noop() {
        let dir = tempdir().expect("tempdir");
        let mut store = GraphObjectStore::new(dir.path());
        store.flush("step-a").expect("flush succeeds");
        assert!(!dir.path().join("graph").exists());
    }

    #[test]
    fn iterate_entities_visits_every_buffered_item_and_flushes_first() {
        let dir = tempdir().expect("tempdir");
        let mut store = GraphObjectStore::new(dir.path());
        store
            .add_entity("step-a", sample_entity("host:1", "test_host"))
            .expect("add succeeds");
        store
            .add_entity("step-b", sample_entity("bucket:1", "test_bucket"))
            .expect("add succeeds");

        let mut seen: Vec<String> = Vec::new();
        store
            .iterate_entities(None, &mut |entity| {
                seen.push(entity.key);
                Ok(())
            })
            .expect("iteration succeeds");
        seen.sort();
        assert_eq!(seen, vec!["bucket:1".to_string(), "host:1".to_string()]);
        assert_eq!(store.buffered_entity_count("step-a"), 0);
    }

    #[test]
    fn iterate_entities_can_filter_by_type() {
        let dir = tempdir().expect("tempdir");
        let mut store = GraphObjectStore::new(dir.path());
        store
            .add_entity("step-a", sample_entity("host:1", "test_host"))
            .expect("add succeeds");
        store
            .add_entity("step-a", sample_entity("bucket:1", "test_bucket"))
            .expect("add succeeds");

        let mut seen: Vec<String> = Vec::new();
        store
            .iterate_entities(Some("test_host"), &mut |entity| {
                seen.push(entity.key);
                Ok(())
            })
            .expect("iteration succeeds");
        assert_eq!(seen, vec!["host:1".to_string()]);
    }

    #[test]
    fn iterate_entities_stops_at_first_iteratee_error() {
        let dir = tempdir().expect("tempdir");
        let mut store = GraphObjectStore::new(dir.path());
        store
            .add_entity("step-a", sample_entity("host:1", "test_host"))
            .expect("add succeeds");

        let result = store.iterate_entities(None, &mut |_entity| {
            Err(FrameworkError::new(integration_core::errors::ErrorKind::Unexpected, "boom"))
        });
        assert!(result.is_err());
    }
}
