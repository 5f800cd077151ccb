// crates/integration-sync/src/errors.rs
// ============================================================================
// Module: errors
// Description: Synchronization-specific error type, convertible into the
//              shared FrameworkError taxonomy.
// Dependencies: thiserror, integration-core
// ============================================================================

use integration_core::errors::{ErrorKind, FrameworkError};
use thiserror::Error;

/// Failures raised while talking to the remote synchronization API or
/// while publishing to the event queue.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The synchronization API returned a non-success response.
    #[error("synchronization API rejected request (status={status}): {message}")]
    ApiRejected {
        /// HTTP status code returned.
        status: u16,
        /// Response body or derived message.
        message: String,
    },
    /// The HTTP transport itself failed (DNS, TLS, connection reset).
    #[error("synchronization API transport error: {0}")]
    Transport(#[source] reqwest::Error),
    /// A batch payload failed to serialize.
    #[error("failed to serialize synchronization payload: {0}")]
    Serialize(#[source] serde_json::Error),
    /// The event queue's worker thread is no longer running.
    #[error("event queue worker has stopped accepting events")]
    QueueClosed,
}

impl From<SyncError> for FrameworkError {
    fn from(value: SyncError) -> Self {
        let kind = match value {
            SyncError::ApiRejected { .. } | SyncError::Transport(_) => {
                ErrorKind::SynchronizationApi
            }
            SyncError::Serialize(_) | SyncError::QueueClosed => ErrorKind::Unexpected,
        };
        FrameworkError::new(kind, value.to_string())
    }
}
