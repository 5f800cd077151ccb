// crates/integration-core/src/lib.rs
// ============================================================================
// Module: integration-core
// Description: Data model, entity canonicalization, step scheduler and
//              execution orchestrator for the integration execution
//              framework. Has no network or filesystem dependency of its
//              own; those live in the sibling `integration-store` and
//              `integration-sync` crates.
// Dependencies: serde, serde_json, serde_jcs, sha2, thiserror, time, tracing
// ============================================================================
//! ## Overview
//!
//! This crate is the framework's pure core: the data types every other
//! crate exchanges (`Entity`, `Relationship`, `Step`), the canonicalization
//! rule that turns raw provider data into a canonical entity, the logger
//! abstraction every step is invoked with, and the scheduler/orchestrator
//! that walk a step graph to completion.
//!
//! Nothing here touches disk or network; callers supply a
//! [`store::GraphSink`] and [`logger::Logger`] implementation from the
//! surrounding crates.

#![forbid(unsafe_code)]

/// Canonical entity/relationship construction rules.
pub mod canonicalize;
/// Shared error taxonomy (§7 error kinds).
pub mod errors;
/// Logger interface and the `tracing`-backed adapter.
pub mod logger;
/// Core data model: steps, entities, relationships, the bucket map.
pub mod model;
/// Execution orchestrator tying scheduler, store and sync together.
pub mod orchestrator;
/// Topological step scheduler.
pub mod scheduler;
/// Minimal store-facing trait so this crate stays storage-agnostic.
pub mod store;

pub use canonicalize::{create_integration_entity, EntityAssignment, EntityClass};
pub use errors::{ErrorKind, FrameworkError};
pub use logger::{Logger, LoggerEvent, time_operation};
pub use model::{
    BucketMap, Entity, PropertyValue, RawDataEntry, Relationship, Step, StepStartState,
    StepStatus,
};
pub use orchestrator::{
    InvocationValidator, Orchestrator, OrchestratorOutcome, StepContext, StepHandler, StepResult,
    SynchronizationHook, DEFAULT_MAX_CONCURRENCY,
};
pub use scheduler::{Scheduler, SchedulerError};
pub use store::GraphSink;
