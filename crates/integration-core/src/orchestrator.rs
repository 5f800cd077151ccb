// crates/integration-core/src/orchestrator.rs
// ============================================================================
// Module: orchestrator
// Description: The execution orchestrator (C7): drives the full §4.7
//              invocation sequence around the scheduler — an optional
//              synchronization job initiate/upload/finalize hook and an
//              optional invocation validator, both abstracted as traits
//              so this crate keeps no network dependency of its own —
//              invokes step handlers with bounded concurrency via a
//              scoped thread pool, and folds each step's outcome into a
//              per-step result summary plus the partial-dataset type
//              union.
// Dependencies: std::thread (scoped threads), this crate's own types
// ============================================================================

use std::sync::{Arc, Mutex};

use crate::errors::FrameworkError;
use crate::logger::{Logger, time_operation};
use crate::model::{Step, StepStartState, StepStatus};
use crate::scheduler::{Scheduler, SchedulerError};
use crate::store::GraphSink;
use std::collections::{BTreeMap, BTreeSet};

/// Context a step handler is invoked with: its own scoped logger and a
/// shared handle to the graph object store.
pub struct StepContext<'a> {
    /// The step being executed.
    pub step: &'a Step,
    /// A logger scoped to this step (bound with `stepId`/`stepName`).
    pub logger: Box<dyn Logger>,
    /// Shared handle to the graph object store every step writes into.
    pub sink: Arc<Mutex<dyn GraphSink + Send>>,
}

/// A unit of data-collection work the orchestrator invokes once per
/// ready step.
pub trait StepHandler: Send + Sync {
    /// Executes the step's collection logic, writing entities and
    /// relationships through `ctx.sink`.
    ///
    /// # Errors
    /// Returns a [`FrameworkError`] if collection fails; the
    /// orchestrator marks the step `Failure` and its dependents
    /// `PartialSuccessDueToDependencyFailure`.
    fn run(&self, ctx: &StepContext<'_>) -> Result<(), FrameworkError>;
}

/// The optional `validateInvocation` hook (§4.7 step 5): runs once,
/// before the scheduler, and aborts the whole invocation on failure.
pub trait InvocationValidator: Send + Sync {
    /// Validates provider-level preconditions before any step runs.
    ///
    /// # Errors
    /// Returns a [`FrameworkError`] (conventionally
    /// [`crate::errors::ErrorKind::IntegrationValidation`]) to abort the
    /// invocation before any step is dispatched.
    fn validate(&self) -> Result<(), FrameworkError>;
}

/// Abstracts the synchronization job lifecycle (§4.7 steps 4, 8–9) away
/// from this crate, which has no network dependency of its own. A
/// caller composing `integration-sync`'s driver and event queue
/// implements this trait and hands it to [`Orchestrator::run`].
pub trait SynchronizationHook: Send + Sync {
    /// Opens the synchronization job the upload phase will target.
    ///
    /// # Errors
    /// Returns a [`FrameworkError`] if the remote API rejects the
    /// request; the orchestrator aborts the invocation without running
    /// any step.
    fn initiate(&self) -> Result<(), FrameworkError>;

    /// Drains the event queue, uploads every entity/relationship read
    /// back from the graph store, and finalizes the job with
    /// `partial_dataset_types`.
    ///
    /// # Errors
    /// Returns a [`FrameworkError`] if any upload or the finalize call
    /// fails; the orchestrator then calls [`SynchronizationHook::abort`].
    fn upload_and_finalize(&self, partial_dataset_types: &[String]) -> Result<(), FrameworkError>;

    /// Aborts the job after an unrecoverable error elsewhere in the
    /// invocation.
    fn abort(&self, reason: &str);
}

/// Maximum number of steps the orchestrator will run concurrently.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Per-step outcome summary (§4.5's `integrationStepResults` entry).
#[derive(Debug, Clone)]
pub struct StepResult {
    /// The step's id.
    pub id: String,
    /// The step's human-readable name.
    pub name: String,
    /// Union of this step's declared entity and relationship types.
    pub types: Vec<String>,
    /// The step's terminal status.
    pub status: StepStatus,
    /// Ids of steps this one depends on.
    pub depends_on: Vec<String>,
}

/// The terminal outcome of a full orchestration run.
#[derive(Debug, Clone)]
pub struct OrchestratorOutcome {
    /// Per-step outcome summary, in declared execution order.
    pub integration_step_results: Vec<StepResult>,
    /// Union of declared types of every step whose status is in
    /// `{Failure, PartialSuccessDueToDependencyFailure, Disabled}`.
    pub partial_dataset_types: Vec<String>,
    /// Whether every declared step reached `Success`.
    pub all_succeeded: bool,
}

impl OrchestratorOutcome {
    /// Looks up a single step's terminal status by id.
    #[must_use]
    pub fn status_of(&self, id: &str) -> Option<StepStatus> {
        self.integration_step_results
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.status)
    }
}

/// Drives a step graph to completion: repeatedly asks the scheduler for
/// ready steps, dispatches up to `max_concurrency` of them at once on a
/// scoped thread pool, waits for that batch, folds results back into the
/// scheduler, and repeats until every step reaches a terminal state —
/// wrapped in the invocation-level sequence of §4.7: optional
/// synchronization job initiation, the optional invocation validator,
/// the scheduler run, a final graph-store flush, and optional upload and
/// finalize.
pub struct Orchestrator {
    /// The resolved step graph and its live status map.
    scheduler: Scheduler,
    /// Upper bound on steps dispatched to the scoped thread pool at once.
    max_concurrency: usize,
}

impl Orchestrator {
    /// Builds an orchestrator from a declared step graph and start
    /// state.
    ///
    /// # Errors
    /// Propagates any [`SchedulerError`] from resolving the step graph.
    pub fn new(
        steps: Vec<Step>,
        start_state: &BTreeMap<String, StepStartState>,
        max_concurrency: usize,
    ) -> Result<Self, SchedulerError> {
        Ok(Self {
            scheduler: Scheduler::new(steps, start_state)?,
            max_concurrency: max_concurrency.max(1),
        })
    }

    /// Every step id in the declared graph's execution order.
    #[must_use]
    pub fn scheduler_step_ids(&self) -> Vec<String> {
        self.scheduler.order().to_vec()
    }

    /// Runs the full invocation sequence using the handlers in
    /// `handlers` (keyed by step id), logging lifecycle events through
    /// `logger` and writing into `sink`. `validator` and `sync_hook` are
    /// optional per §4.7 steps 4–5 and 8–9.
    ///
    /// Steps without a registered handler are treated as a
    /// [`crate::errors::ErrorKind::StepExecution`] failure rather than
    /// silently skipped, so a misconfigured step graph cannot pass
    /// silently.
    pub fn run(
        &mut self,
        handlers: &BTreeMap<String, Box<dyn StepHandler>>,
        logger: &dyn Logger,
        sink: Arc<Mutex<dyn GraphSink + Send>>,
        validator: Option<&dyn InvocationValidator>,
        sync_hook: Option<&dyn SynchronizationHook>,
    ) -> OrchestratorOutcome {
        if let Some(hook) = sync_hook {
            if let Err(err) = hook.initiate() {
                logger.error(&format!("failed to initiate synchronization job: {err}"));
                return self.outcome_without_running();
            }
        }

        if let Some(validator) = validator {
            if let Err(err) = validator.validate() {
                logger.validation_failure(&err);
                if let Some(hook) = sync_hook {
                    hook.abort(&err.to_string());
                }
                return self.outcome_without_running();
            }
        }

        self.run_scheduler(handlers, logger, Arc::clone(&sink));

        if let Err(err) = sink.lock().unwrap_or_else(std::sync::PoisonError::into_inner).flush_all() {
            logger.error(&format!("final graph store flush failed: {err}"));
            if let Some(hook) = sync_hook {
                hook.abort(&err.to_string());
            }
        }

        let outcome = self.build_outcome();

        if let Some(hook) = sync_hook {
            if let Err(err) = hook.upload_and_finalize(&outcome.partial_dataset_types) {
                if !logger.is_handled_error(&err) {
                    logger.error(&format!("synchronization upload failed: {err}"));
                }
                hook.abort(&err.to_string());
            }
        }

        outcome
    }

    /// Drives the scheduler's readiness loop (§4.7 step 6) to
    /// completion.
    fn run_scheduler(
        &mut self,
        handlers: &BTreeMap<String, Box<dyn StepHandler>>,
        logger: &dyn Logger,
        sink: Arc<Mutex<dyn GraphSink + Send>>,
    ) {
        loop {
            let order: Vec<String> = self.scheduler.order().to_vec();
            let ready: Vec<String> = order
                .iter()
                .filter(|id| self.scheduler.is_ready(id))
                .take(self.max_concurrency)
                .cloned()
                .collect();

            if ready.is_empty() {
                if self.scheduler.is_done() {
                    break;
                }
                // Nothing ready but not done: remaining steps are
                // blocked on in-progress dependents from a previous
                // batch that hasn't resolved, which cannot happen in
                // this synchronous driver, or the graph has stalled.
                // Treat as done to guarantee termination.
                break;
            }

            for id in &ready {
                self.scheduler.mark_in_progress(id);
            }

            let outcomes: Vec<(String, StepStatus)> = std::thread::scope(|scope| {
                let handles: Vec<_> = ready
                    .iter()
                    .filter_map(|id| {
                        let step = self.scheduler.step(id)?.clone();
                        let step_logger = logger.child(&[
                            ("stepId", step.id.as_str()),
                            ("stepName", step.name.as_str()),
                        ]);
                        let sink = Arc::clone(&sink);
                        let handler = handlers.get(id).map(std::convert::AsRef::as_ref);
                        Some(scope.spawn(move || {
                            let status = run_one_step(&step, step_logger, sink, handler);
                            (step.id.clone(), status)
                        }))
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|h| h.join().unwrap_or((String::new(), StepStatus::Failure)))
                    .collect()
            });

            for (id, status) in outcomes {
                if !id.is_empty() {
                    self.scheduler.mark_complete(&id, status);
                }
            }
        }
    }

    /// Builds an [`OrchestratorOutcome`] reflecting the scheduler's
    /// current status map, used both for a normal completion and for an
    /// early abort before any step ran.
    fn build_outcome(&self) -> OrchestratorOutcome {
        let partial_statuses = [
            StepStatus::Failure,
            StepStatus::PartialSuccessDueToDependencyFailure,
            StepStatus::Disabled,
        ];

        let mut integration_step_results = Vec::new();
        let mut partial_types: BTreeSet<String> = BTreeSet::new();

        for id in self.scheduler.order() {
            let Some(step) = self.scheduler.step(id) else { continue };
            let status = self.scheduler.status(id).unwrap_or(StepStatus::Disabled);
            let types: Vec<String> = step
                .entities
                .iter()
                .chain(step.relationships.iter())
                .cloned()
                .collect();
            if partial_statuses.contains(&status) {
                partial_types.extend(types.iter().cloned());
            }
            integration_step_results.push(StepResult {
                id: step.id.clone(),
                name: step.name.clone(),
                types,
                status,
                depends_on: step.dependency_step_ids.clone(),
            });
        }

        let all_succeeded = integration_step_results
            .iter()
            .all(|r| r.status == StepStatus::Success);

        OrchestratorOutcome {
            integration_step_results,
            partial_dataset_types: partial_types.into_iter().collect(),
            all_succeeded,
        }
    }

    /// Builds the outcome for an invocation that aborted before the
    /// scheduler ran: every step keeps whatever status it was seeded
    /// with (`Pending` or `Disabled`), none of them ran.
    fn outcome_without_running(&self) -> OrchestratorOutcome {
        self.build_outcome()
    }
}

/// Runs a single ready step's handler, logging lifecycle events and
/// timing the call, and folds the outcome into a terminal [`StepStatus`].
fn run_one_step(
    step: &Step,
    logger: Box<dyn Logger>,
    sink: Arc<Mutex<dyn GraphSink + Send>>,
    handler: Option<&dyn StepHandler>,
) -> StepStatus {
    logger.step_start(step);
    let Some(handler) = handler else {
        let err = FrameworkError::new(crate::errors::ErrorKind::StepExecution, "no handler registered for step");
        logger.step_failure(step, &err);
        return StepStatus::Failure;
    };
    let ctx = StepContext {
        step,
        logger: logger.child(&[]),
        sink,
    };
    let metric_name = format!("step.{}.duration", step.id);
    let result = time_operation(logger.as_ref(), &metric_name, || handler.run(&ctx));
    match result {
        Ok(()) => {
            logger.step_success(step);
            StepStatus::Success
        }
        Err(err) => {
            logger.step_failure(step, &err);
            StepStatus::Failure
        }
    }
}
