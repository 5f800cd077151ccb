// crates/integration-store/src/lib.rs
// ============================================================================
// Module: integration-store
// Description: Disk-backed graph object store (C3): buffers entities and
//              relationships per step in a BucketMap, flushing to JSON
//              shards under a cache directory once the flush threshold
//              is reached or flush is called explicitly.
// Dependencies: integration-core, serde_json, thiserror, uuid, tracing
// ============================================================================
//! ## Overview
//!
//! Storage layout (unchanged from the integration execution framework's
//! data model):
//!
//! ```text
//! <cacheDir>/graph/<stepId>/<uuid>.json        per-step shard
//! <cacheDir>/index/entities/<type>/<uuid>.json  type-indexed shard
//! ```
//!
//! Writes are serialized through a single writer lock per store instance
//! so concurrent steps never interleave partial writes to the same
//! shard directory.

#![forbid(unsafe_code)]

/// Store-specific error type and conversion into the shared taxonomy.
pub mod errors;
/// The disk-backed [`GraphSink`](integration_core::GraphSink) implementation.
pub mod graph_store;

pub use errors::StoreError;
pub use graph_store::GraphObjectStore;
