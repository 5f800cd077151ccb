// crates/integration-sync/src/driver.rs
// ============================================================================
// Module: driver
// Description: Synchronization driver (C6): owns the remote job
//              lifecycle (initiate, upload batches, finalize, abort) and
//              packs entities/relationships read back from the graph
//              store into bounded-size upload requests, routing each
//              kind to its own endpoint.
// Dependencies: integration-core, reqwest (blocking), serde, serde_json,
//               url, tracing
// ============================================================================

use std::sync::Mutex;
use std::time::Duration;

use integration_core::logger::Logger;
use integration_core::model::{Entity, Relationship};
use integration_core::store::GraphSink;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::SyncError;

/// Maximum number of entities or relationships bundled into a single
/// upload request body, matching §4.6's recommended per-kind cap.
pub const DEFAULT_BATCH_SIZE: usize = 250;

/// How many times a single batch upload is retried before the driver
/// gives up and aborts the job.
const MAX_UPLOAD_ATTEMPTS: u32 = 3;

/// Base backoff between upload retries; scaled by the attempt number.
const RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// A synchronization job's identity, returned by `initiate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynchronizationJob {
    /// Job id assigned by the remote synchronization API.
    pub id: String,
}

/// One batch of canonical entities or relationships uploaded to a job.
/// A batch carries exactly one kind; `upload_batch` implementations
/// route based on which list is non-empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadBatch {
    /// Entities in this batch.
    #[serde(default)]
    pub entities: Vec<Entity>,
    /// Relationships in this batch.
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

impl UploadBatch {
    /// Whether this batch carries nothing to upload.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty()
    }
}

/// The remote synchronization API surface the driver depends on,
/// abstracted so tests can substitute a fake without a live server.
pub trait SyncApi: Send + Sync {
    /// Begins a new synchronization job for the given integration
    /// instance.
    ///
    /// # Errors
    /// Returns [`SyncError`] if the API rejects the request.
    fn initiate(&self, integration_instance_id: &str) -> Result<SynchronizationJob, SyncError>;

    /// Uploads one batch of entities or relationships to an open job,
    /// routing to the entity or relationship endpoint depending on which
    /// side of `batch` is populated.
    ///
    /// # Errors
    /// Returns [`SyncError`] if the API rejects the request.
    fn upload_batch(&self, job: &SynchronizationJob, batch: &UploadBatch) -> Result<(), SyncError>;

    /// Finalizes a job once every batch has been uploaded successfully,
    /// reporting the union of entity/relationship types contributed by
    /// steps that did not fully succeed.
    ///
    /// # Errors
    /// Returns [`SyncError`] if the API rejects the request.
    fn finalize(&self, job: &SynchronizationJob, partial_dataset_types: &[String]) -> Result<(), SyncError>;

    /// Aborts a job after an unrecoverable error, so the remote side
    /// does not wait indefinitely for more batches.
    ///
    /// # Errors
    /// Returns [`SyncError`] if the API rejects the request.
    fn abort(&self, job: &SynchronizationJob, reason: &str) -> Result<(), SyncError>;
}

/// Drives the synchronization job lifecycle against a [`SyncApi`],
/// reading entities and relationships back from a [`GraphSink`] rather
/// than holding them in memory.
pub struct SynchronizationDriver<A: SyncApi> {
    /// The API client this driver issues lifecycle calls against.
    api: A,
    /// Maximum number of entities or relationships per upload request.
    batch_size: usize,
}

impl<A: SyncApi> SynchronizationDriver<A> {
    /// Builds a driver around the given API client with the default
    /// batch size.
    pub const fn new(api: A) -> Self {
        Self {
            api,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// The underlying API client, mainly useful in tests that want to
    /// inspect a fake implementation's recorded calls.
    #[must_use]
    pub const fn api(&self) -> &A {
        &self.api
    }

    /// Overrides the batch size used to chunk uploads.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Runs a full synchronization: initiate, upload every entity and
    /// relationship read back from `sink`, finalize with
    /// `partial_dataset_types`. Aborts the job and propagates the error
    /// if any upload fails after exhausting retries.
    ///
    /// # Errors
    /// Returns [`SyncError`] from whichever lifecycle call failed.
    pub fn synchronize(
        &self,
        integration_instance_id: &str,
        sink: &Mutex<dyn GraphSink + Send>,
        logger: &dyn Logger,
        partial_dataset_types: &[String],
    ) -> Result<SynchronizationJob, SyncError> {
        let job = self.api.initiate(integration_instance_id)?;
        logger.synchronization_upload_start(&job.id);
        let upload_result = self.upload_all(&job, sink);
        logger.synchronization_upload_end(&job.id);

        if let Err(err) = upload_result {
            let _ = self.api.abort(&job, &err.to_string());
            return Err(err);
        }

        self.api.finalize(&job, partial_dataset_types)?;
        Ok(job)
    }

    /// Iterates every entity then every relationship out of `sink`,
    /// packing them into `batch_size`-sized requests and uploading each
    /// in turn, stopping at the first failure.
    fn upload_all(&self, job: &SynchronizationJob, sink: &Mutex<dyn GraphSink + Send>) -> Result<(), SyncError> {
        let mut store = sink.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        let mut pending_entities: Vec<Entity> = Vec::new();
        let mut failure: Option<SyncError> = None;
        let flush_entities = |pending: &mut Vec<Entity>, failure: &mut Option<SyncError>| {
            if pending.is_empty() || failure.is_some() {
                return;
            }
            let batch = UploadBatch {
                entities: std::mem::take(pending),
                relationships: Vec::new(),
            };
            if let Err(err) = self.upload_with_retry(job, &batch) {
                *failure = Some(err);
            }
        };

        store
            .iterate_entities(None, &mut |entity| {
                pending_entities.push(entity);
                if pending_entities.len() >= self.batch_size {
                    flush_entities(&mut pending_entities, &mut failure);
                }
                if failure.is_some() {
                    return Err(integration_core::errors::FrameworkError::new(
                        integration_core::errors::ErrorKind::SynchronizationApi,
                        "upload aborted after a batch failure",
                    ));
                }
                Ok(())
            })
            .ok();
        flush_entities(&mut pending_entities, &mut failure);
        if let Some(err) = failure {
            return Err(err);
        }

        let mut pending_relationships: Vec<Relationship> = Vec::new();
        let mut failure: Option<SyncError> = None;
        let flush_relationships = |pending: &mut Vec<Relationship>, failure: &mut Option<SyncError>| {
            if pending.is_empty() || failure.is_some() {
                return;
            }
            let batch = UploadBatch {
                entities: Vec::new(),
                relationships: std::mem::take(pending),
            };
            if let Err(err) = self.upload_with_retry(job, &batch) {
                *failure = Some(err);
            }
        };

        store
            .iterate_relationships(None, &mut |relationship| {
                pending_relationships.push(relationship);
                if pending_relationships.len() >= self.batch_size {
                    flush_relationships(&mut pending_relationships, &mut failure);
                }
                if failure.is_some() {
                    return Err(integration_core::errors::FrameworkError::new(
                        integration_core::errors::ErrorKind::SynchronizationApi,
                        "upload aborted after a batch failure",
                    ));
                }
                Ok(())
            })
            .ok();
        flush_relationships(&mut pending_relationships, &mut failure);
        if let Some(err) = failure {
            return Err(err);
        }

        Ok(())
    }

    /// Uploads one batch, retrying transient failures with backoff up to
    /// [`MAX_UPLOAD_ATTEMPTS`] times.
    fn upload_with_retry(&self, job: &SynchronizationJob, batch: &UploadBatch) -> Result<(), SyncError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.api.upload_batch(job, batch) {
                Ok(()) => return Ok(()),
                Err(err) if attempt < MAX_UPLOAD_ATTEMPTS => {
                    tracing::warn!(attempt, error = %err, "batch upload failed, retrying");
                    std::thread::sleep(RETRY_BACKOFF * attempt);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// A [`SyncApi`] implementation backed by blocking HTTP calls to a real
/// synchronization service.
pub struct HttpSyncApi {
    /// Base URL of the synchronization service, e.g.
    /// `https://api.example.com/persister/synchronization`.
    base_url: Url,
    /// Blocking HTTP client reused across every lifecycle call.
    client: reqwest::blocking::Client,
}

impl HttpSyncApi {
    /// Builds a client targeting `base_url`, e.g.
    /// `https://api.example.com/persister/synchronization`.
    ///
    /// # Errors
    /// Returns [`SyncError::Transport`] if the underlying HTTP client
    /// cannot be constructed.
    pub fn new(base_url: Url) -> Result<Self, SyncError> {
        let client = reqwest::blocking::Client::builder()
            .build()
            .map_err(SyncError::Transport)?;
        Ok(Self { base_url, client })
    }

    /// Joins `path` onto the service's base URL as a path segment.
    fn endpoint(&self, path: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push(path);
        }
        url
    }
}

impl SyncApi for HttpSyncApi {
    fn initiate(&self, integration_instance_id: &str) -> Result<SynchronizationJob, SyncError> {
        let response = self
            .client
            .post(self.endpoint("jobs"))
            .json(&serde_json::json!({ "integrationInstanceId": integration_instance_id }))
            .send()
            .map_err(SyncError::Transport)?;
        read_job_response(response)
    }

    fn upload_batch(&self, job: &SynchronizationJob, batch: &UploadBatch) -> Result<(), SyncError> {
        let response = if batch.relationships.is_empty() {
            self.client
                .post(self.endpoint(&format!("jobs/{}/entities", job.id)))
                .json(&serde_json::json!({ "entities": batch.entities }))
                .send()
                .map_err(SyncError::Transport)?
        } else {
            self.client
                .post(self.endpoint(&format!("jobs/{}/relationships", job.id)))
                .json(&serde_json::json!({ "relationships": batch.relationships }))
                .send()
                .map_err(SyncError::Transport)?
        };
        expect_success(response)
    }

    fn finalize(&self, job: &SynchronizationJob, partial_dataset_types: &[String]) -> Result<(), SyncError> {
        let response = self
            .client
            .post(self.endpoint(&format!("jobs/{}/finalize", job.id)))
            .json(&serde_json::json!({ "partialDatasets": { "types": partial_dataset_types } }))
            .send()
            .map_err(SyncError::Transport)?;
        expect_success(response)
    }

    fn abort(&self, job: &SynchronizationJob, reason: &str) -> Result<(), SyncError> {
        let response = self
            .client
            .post(self.endpoint(&format!("jobs/{}/abort", job.id)))
            .json(&serde_json::json!({ "reason": reason }))
            .send()
            .map_err(SyncError::Transport)?;
        expect_success(response)
    }
}

/// Maps a non-success HTTP response to [`SyncError::ApiRejected`].
fn expect_success(response: reqwest::blocking::Response) -> Result<(), SyncError> {
    if response.status().is_success() {
        Ok(())
    } else {
        let status = response.status().as_u16();
        let message = response.text().unwrap_or_default();
        Err(SyncError::ApiRejected { status, message })
    }
}

/// Parses a job-initiation response, mapping a non-success status to
/// [`SyncError::ApiRejected`] before attempting to decode the body.
fn read_job_response(response: reqwest::blocking::Response) -> Result<SynchronizationJob, SyncError> {
    if !response.status().is_success() {
        let status = response.status().as_u16();
        let message = response.text().unwrap_or_default();
        return Err(SyncError::ApiRejected { status, message });
    }
    response.json().map_err(SyncError::Transport)
}

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test assertions use expect/unwrap for clarity."
    )]
    use super::*;
    use integration_core::logger::TracingLogger;
    use integration_core::model::PropertyBag;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeApi {
        batches_seen: Mutex<Vec<UploadBatch>>,
        fail_on_batch: AtomicUsize,
        aborted: Mutex<Option<String>>,
    }

    impl SyncApi for FakeApi {
        fn initiate(&self, _integration_instance_id: &str) -> Result<SynchronizationJob, SyncError> {
            Ok(SynchronizationJob { id: "job-1".to_string() })
        }

        fn upload_batch(&self, _job: &SynchronizationJob, batch: &UploadBatch) -> Result<(), SyncError> {
            let mut seen = self.batches_seen.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let index = seen.len();
            seen.push(batch.clone());
            if self.fail_on_batch.load(Ordering::SeqCst) == index + 1 {
                return Err(SyncError::ApiRejected {
                    status: 500,
                    message: "synthetic failure".to_string(),
                });
            }
            Ok(())
        }

        fn finalize(&self, _job: &SynchronizationJob, _partial_dataset_types: &[String]) -> Result<(), SyncError> {
            Ok(())
        }

        fn abort(&self, _job: &SynchronizationJob, reason: &str) -> Result<(), SyncError> {
            *self.aborted.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(reason.to_string());
            Ok(())
        }
    }

    struct FixedSink {
        entities: Vec<Entity>,
        relationships: Vec<Relationship>,
    }

    impl GraphSink for FixedSink {
        fn add_entity(&mut self, _step_id: &str, entity: Entity) -> Result<(), integration_core::errors::FrameworkError> {
            self.entities.push(entity);
            Ok(())
        }
        fn add_relationship(
            &mut self,
            _step_id: &str,
            relationship: Relationship,
        ) -> Result<(), integration_core::errors::FrameworkError> {
            self.relationships.push(relationship);
            Ok(())
        }
        fn flush(&mut self, _step_id: &str) -> Result<(), integration_core::errors::FrameworkError> {
            Ok(())
        }
        fn flush_all(&mut self) -> Result<(), integration_core::errors::FrameworkError> {
            Ok(())
        }
        fn iterate_entities(
            &mut self,
            _entity_type: Option<&str>,
            iteratee: &mut dyn FnMut(Entity) -> Result<(), integration_core::errors::FrameworkError>,
        ) -> Result<(), integration_core::errors::FrameworkError> {
            for entity in self.entities.drain(..) {
                iteratee(entity)?;
            }
            Ok(())
        }
        fn iterate_relationships(
            &mut self,
            _relationship_type: Option<&str>,
            iteratee: &mut dyn FnMut(Relationship) -> Result<(), integration_core::errors::FrameworkError>,
        ) -> Result<(), integration_core::errors::FrameworkError> {
            for relationship in self.relationships.drain(..) {
                iteratee(relationship)?;
            }
            Ok(())
        }
    }

    fn sample_entity(key: &str) -> Entity {
        Entity {
            key: key.to_string(),
            entity_type: "test_host".to_string(),
            class: vec!["Host".to_string()],
            properties: PropertyBag::new(),
            raw_data: Vec::new(),
        }
    }

    #[test]
    fn batches_respect_the_configured_size() {
        let api = FakeApi::default();
        let driver = SynchronizationDriver::new(api).with_batch_size(2);
        let entities: Vec<Entity> = (0..5).map(|i| sample_entity(&i.to_string())).collect();
        let sink: Mutex<dyn GraphSink + Send> = Mutex::new(FixedSink { entities, relationships: Vec::new() });
        let logger = TracingLogger::new();
        driver
            .synchronize("instance-1", &sink, &logger, &[])
            .expect("sync succeeds");
        let seen = driver.api.batches_seen.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].entities.len(), 2);
        assert_eq!(seen[2].entities.len(), 1);
    }

    #[test]
    fn upload_failure_aborts_the_job() {
        let api = FakeApi {
            fail_on_batch: AtomicUsize::new(1),
            ..FakeApi::default()
        };
        let driver = SynchronizationDriver::new(api);
        let entities = vec![sample_entity("a")];
        let sink: Mutex<dyn GraphSink + Send> = Mutex::new(FixedSink { entities, relationships: Vec::new() });
        let logger = TracingLogger::new();
        let result = driver.synchronize("instance-1", &sink, &logger, &[]);
        assert!(result.is_err());
        assert!(driver
            .api
            .aborted
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .is_some());
    }
}
