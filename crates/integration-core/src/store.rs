// crates/integration-core/src/store.rs
// ============================================================================
// Module: store
// Description: The minimal trait the orchestrator needs from a graph
//              object store, kept here so integration-core has no
//              filesystem dependency of its own. integration-store
//              provides the disk-backed implementation.
// Dependencies: none beyond this crate's own model/errors types
// ============================================================================

use crate::errors::FrameworkError;
use crate::model::{Entity, Relationship};

/// What the orchestrator needs from a graph object store: the ability to
/// add entities/relationships for a step and flush them, plus read back
/// everything collected for a step (used by `integration-sync` to build
/// synchronization batches).
///
/// # Invariants
/// - `add_entity`/`add_relationship` never block on network I/O; they
///   may buffer in memory and perform a local disk write on flush.
pub trait GraphSink {
    /// Adds an entity produced by `step_id`, buffering it until the
    /// bucket's flush threshold is reached or `flush` is called.
    ///
    /// # Errors
    /// Returns a [`FrameworkError`] if the entity cannot be buffered
    /// (e.g. a disk write during an implicit flush failed).
    fn add_entity(&mut self, step_id: &str, entity: Entity) -> Result<(), FrameworkError>;

    /// Adds a relationship produced by `step_id`, with the same
    /// buffering semantics as [`GraphSink::add_entity`].
    ///
    /// # Errors
    /// Returns a [`FrameworkError`] if the relationship cannot be
    /// buffered.
    fn add_relationship(
        &mut self,
        step_id: &str,
        relationship: Relationship,
    ) -> Result<(), FrameworkError>;

    /// Forces any buffered entities/relationships for `step_id` to disk.
    ///
    /// # Errors
    /// Returns a [`FrameworkError`] if the flush write fails.
    fn flush(&mut self, step_id: &str) -> Result<(), FrameworkError>;

    /// Forces every buffered entity and relationship, across every step,
    /// to disk (§4.7 step 7).
    ///
    /// # Errors
    /// Returns a [`FrameworkError`] if any flush write fails.
    fn flush_all(&mut self) -> Result<(), FrameworkError>;

    /// Flushes the entity map, then walks the on-disk entity type index,
    /// invoking `iteratee` once per entity in shard-discovery order
    /// (insertion order within a shard). Restricts iteration to
    /// `entity_type` when given, otherwise visits every type.
    ///
    /// Iteration stops at the first error `iteratee` returns, which is
    /// propagated as this call's result.
    ///
    /// # Errors
    /// Returns a [`FrameworkError`] if the flush fails, a shard cannot be
    /// read back, or `iteratee` returns an error.
    fn iterate_entities(
        &mut self,
        entity_type: Option<&str>,
        iteratee: &mut dyn FnMut(Entity) -> Result<(), FrameworkError>,
    ) -> Result<(), FrameworkError>;

    /// Flushes the relationship map, then walks the on-disk relationship
    /// type index, invoking `iteratee` once per relationship, with the
    /// same ordering and error-propagation rules as
    /// [`GraphSink::iterate_entities`].
    ///
    /// # Errors
    /// Returns a [`FrameworkError`] if the flush fails, a shard cannot be
    /// read back, or `iteratee` returns an error.
    fn iterate_relationships(
        &mut self,
        relationship_type: Option<&str>,
        iteratee: &mut dyn FnMut(Relationship) -> Result<(), FrameworkError>,
    ) -> Result<(), FrameworkError>;
}
