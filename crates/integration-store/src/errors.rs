// crates/integration-store/src/errors.rs
// ============================================================================
// Module: errors
// Description: Store-specific error type, convertible into the shared
//              FrameworkError taxonomy so callers above this crate only
//              need to match on ErrorKind.
// Dependencies: thiserror, integration-core
// ============================================================================

use std::path::PathBuf;

use integration_core::errors::{ErrorKind, FrameworkError};
use thiserror::Error;

/// Failures raised while writing to or reading from the graph object
/// store's on-disk shard layout.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Creating a shard directory failed.
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        /// The directory that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Writing a shard file failed.
    #[error("failed to write shard {path}: {source}")]
    WriteShard {
        /// The shard file that could not be written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Serializing an entity or relationship to JSON failed.
    #[error("failed to serialize shard contents: {0}")]
    Serialize(#[source] serde_json::Error),
    /// Listing a type-index directory failed.
    #[error("failed to list index directory {path}: {source}")]
    ReadDir {
        /// The directory that could not be listed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Reading a shard file back off disk failed.
    #[error("failed to read shard {path}: {source}")]
    ReadShard {
        /// The shard file that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Decoding a shard's JSON contents failed.
    #[error("failed to decode shard {path}: {source}")]
    Deserialize {
        /// The shard file whose contents failed to decode.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

impl From<StoreError> for FrameworkError {
    fn from(value: StoreError) -> Self {
        FrameworkError::new(ErrorKind::Unexpected, value.to_string())
    }
}
