// crates/integration-core/src/scheduler.rs
// ============================================================================
// Module: scheduler
// Description: Resolves a declared step graph and a StepStartState map
//              into an execution order, and drives each step's status
//              through the StepStatus state machine, propagating
//              dependency failure/disablement per §4.5's rules.
// Dependencies: none beyond this crate's own model types
// ============================================================================

use std::collections::{BTreeMap, HashSet, VecDeque};

use thiserror::Error;

use crate::model::{Step, StepStartState, StepStatus};

/// Errors raised while resolving a step graph, before any step handler
/// runs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    /// A step's `dependency_step_ids` referenced an id not present in
    /// the declared step graph.
    #[error("step \"{step_id}\" declares unknown dependency \"{dependency_id}\"")]
    UnknownDependency {
        /// The step with the dangling dependency.
        step_id: String,
        /// The dependency id that was never declared.
        dependency_id: String,
    },
    /// The step graph contains a dependency cycle.
    #[error("step graph contains a dependency cycle involving \"{step_id}\"")]
    DependencyCycle {
        /// One of the steps participating in the cycle.
        step_id: String,
    },
    /// `start_state` did not cover every declared step, or covered ids
    /// outside the declared step graph.
    #[error("start state coverage mismatch: {0}")]
    StartStateMismatch(String),
}

/// Resolves a step graph into an execution schedule and tracks every
/// step's [`StepStatus`] as execution proceeds.
#[derive(Debug, Clone)]
pub struct Scheduler {
    steps: BTreeMap<String, Step>,
    order: Vec<String>,
    status: BTreeMap<String, StepStatus>,
}

impl Scheduler {
    /// Builds a scheduler from a declared step graph and start state,
    /// computing a topological execution order and seeding each step's
    /// initial status from `start_state`.
    ///
    /// # Errors
    /// Returns [`SchedulerError::UnknownDependency`] if a step names a
    /// dependency id outside the graph, [`SchedulerError::DependencyCycle`]
    /// if the graph is not a DAG, and
    /// [`SchedulerError::StartStateMismatch`] if `start_state` does not
    /// have exactly one entry per declared step.
    pub fn new(
        steps: Vec<Step>,
        start_state: &BTreeMap<String, StepStartState>,
    ) -> Result<Self, SchedulerError> {
        let steps: BTreeMap<String, Step> =
            steps.into_iter().map(|s| (s.id.clone(), s)).collect();

        let declared: HashSet<&str> = steps.keys().map(String::as_str).collect();
        let provided: HashSet<&str> = start_state.keys().map(String::as_str).collect();
        if declared != provided {
            let missing: Vec<&str> = declared.difference(&provided).copied().collect();
            let extra: Vec<&str> = provided.difference(&declared).copied().collect();
            return Err(SchedulerError::StartStateMismatch(format!(
                "missing={missing:?} extra={extra:?}"
            )));
        }

        for step in steps.values() {
            for dep in &step.dependency_step_ids {
                if !steps.contains_key(dep) {
                    return Err(SchedulerError::UnknownDependency {
                        step_id: step.id.clone(),
                        dependency_id: dep.clone(),
                    });
                }
            }
        }

        let order = topological_order(&steps)?;

        let mut status = BTreeMap::new();
        for id in steps.keys() {
            let disabled = start_state
                .get(id)
                .map(|s| s.disabled)
                .unwrap_or(false);
            status.insert(
                id.clone(),
                if disabled {
                    StepStatus::Disabled
                } else {
                    StepStatus::Pending
                },
            );
        }

        Ok(Self {
            steps,
            order,
            status,
        })
    }

    /// The execution order, with every dependency preceding its
    /// dependents.
    #[must_use]
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Looks up a declared step by id.
    #[must_use]
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.get(id)
    }

    /// Current status of a step.
    #[must_use]
    pub fn status(&self, id: &str) -> Option<StepStatus> {
        self.status.get(id).copied()
    }

    /// Whether a step is ready to run: `Pending` and every dependency is
    /// `Success`. A step with a dependency that ended `Failure`,
    /// `Disabled`, or `PartialSuccessDueToDependencyFailure` is itself
    /// transitioned to `PartialSuccessDueToDependencyFailure` as a side
    /// effect and never becomes ready; calling `is_ready` on dependents
    /// in execution order propagates this transitively.
    #[must_use]
    pub fn is_ready(&mut self, id: &str) -> bool {
        let Some(step) = self.steps.get(id).cloned() else {
            return false;
        };
        if self.status.get(id) != Some(&StepStatus::Pending) {
            return false;
        }
        let mut blocked = false;
        for dep in &step.dependency_step_ids {
            match self.status.get(dep) {
                Some(StepStatus::Success) => {}
                Some(StepStatus::Failure | StepStatus::Disabled | StepStatus::PartialSuccessDueToDependencyFailure) => {
                    blocked = true;
                }
                _ => return false,
            }
        }
        if blocked {
            self.status
                .insert(id.to_string(), StepStatus::PartialSuccessDueToDependencyFailure);
            return false;
        }
        true
    }

    /// Marks a step as currently executing. Panics-free no-op if the
    /// step is unknown.
    pub fn mark_in_progress(&mut self, id: &str) {
        if let Some(entry) = self.status.get_mut(id) {
            *entry = StepStatus::InProgress;
        }
    }

    /// Marks a step's terminal outcome.
    pub fn mark_complete(&mut self, id: &str, status: StepStatus) {
        if let Some(entry) = self.status.get_mut(id) {
            *entry = status;
        }
    }

    /// Whether every declared step has reached a terminal status
    /// (`Success`, `Failure` or `Disabled`).
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.status
            .values()
            .all(|s| !matches!(s, StepStatus::Pending | StepStatus::InProgress))
    }
}

fn topological_order(
    steps: &BTreeMap<String, Step>,
) -> Result<Vec<String>, SchedulerError> {
    let mut in_degree: BTreeMap<&str, usize> = steps
        .keys()
        .map(|id| (id.as_str(), 0usize))
        .collect();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

    for step in steps.values() {
        for dep in &step.dependency_step_ids {
            if let Some(degree) = in_degree.get_mut(step.id.as_str()) {
                *degree += 1;
            }
            dependents
                .entry(dep.as_str())
                .or_default()
                .push(step.id.as_str());
        }
    }

    let mut ready: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut order = Vec::with_capacity(steps.len());
    while let Some(id) = ready.pop_front() {
        order.push(id.to_string());
        if let Some(next) = dependents.get(id) {
            for dependent in next {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push_back(dependent);
                    }
                }
            }
        }
    }

    if order.len() != steps.len() {
        let stuck = steps
            .keys()
            .find(|id| !order.contains(*id))
            .cloned()
            .unwrap_or_default();
        return Err(SchedulerError::DependencyCycle { step_id: stuck });
    }

    Ok(order)
}
