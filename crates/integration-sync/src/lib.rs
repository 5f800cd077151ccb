// crates/integration-sync/src/lib.rs
// ============================================================================
// Module: integration-sync
// Description: Event publishing queue (C4) and synchronization driver
//              (C6): the framework's network lifecycle boundary. Owns
//              ordered event delivery with retry/backoff and the
//              batched upload protocol to the remote sync API.
// Dependencies: integration-core, reqwest (blocking), serde_json,
//               thiserror, url, tracing
// ============================================================================
//! ## Overview
//!
//! [`queue::EventQueue`] is a single-worker FIFO: events are pushed from
//! any thread, a dedicated worker thread drains them in order, and
//! `on_idle` lets a caller block until the queue has delivered
//! everything pushed so far.
//!
//! [`driver::SynchronizationDriver`] owns the job lifecycle described in
//! the external interface contract: initiate, upload batches, finalize,
//! or abort on unrecoverable error.

#![forbid(unsafe_code)]

/// Synchronization-specific error type.
pub mod errors;
/// Job lifecycle driver (C6).
pub mod driver;
/// Ordered single-worker event publishing queue (C4).
pub mod queue;

pub use driver::{SyncApi, SynchronizationDriver, SynchronizationJob, UploadBatch};
pub use errors::SyncError;
pub use queue::{EventQueue, EventQueuePublisher, EventSink, QueuedEvent};
