//! Weighted multi-step workflows and the registry that tracks them.
//!
//! A [`Workflow`] is a plain state machine. [`WorkflowTracker`] owns the live
//! workflows of a session and publishes a [`WorkflowUpdated`] snapshot plus a
//! [`ProgressEvent`] on the bus after every change.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
    time::SystemTime,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    error::WorkflowError,
    events::{EventBus, detached_bus},
    workers::{ProgressEvent, WorkflowUpdated},
};

/// Highest progress a step can contribute before it has succeeded.
const UNFINISHED_CAP: f64 = 99.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl OperationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OperationStatus::Succeeded | OperationStatus::Failed)
    }
}

/// What a failed step does to its workflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// The workflow is marked failed.
    #[default]
    HardFail,
    /// The failure is recorded on the step only.
    Continue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepSpec {
    pub label: String,
    pub weight: f64,
    pub policy: FailurePolicy,
}

impl StepSpec {
    pub fn new(label: impl Into<String>, weight: f64) -> Self {
        Self {
            label: label.into(),
            weight,
            policy: FailurePolicy::HardFail,
        }
    }

    pub fn continue_on_failure(mut self) -> Self {
        self.policy = FailurePolicy::Continue;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: Uuid,
    pub label: String,
    pub weight: f64,
    pub policy: FailurePolicy,
    pub status: OperationStatus,
    pub progress: f64,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Final, user-visible result of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobOutcome {
    Succeeded,
    PartiallySucceeded { succeeded: usize, total: usize },
    Failed { reason: String },
    Cancelled { completed: usize, total: usize },
}

impl JobOutcome {
    /// Outcome of a job where `succeeded` of `total` units produced a result.
    pub fn from_counts(succeeded: usize, total: usize) -> Self {
        if succeeded == total {
            JobOutcome::Succeeded
        } else {
            JobOutcome::PartiallySucceeded { succeeded, total }
        }
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Succeeded => f.write_str("succeeded"),
            JobOutcome::PartiallySucceeded { succeeded, total } => {
                write!(f, "partially succeeded ({succeeded} of {total})")
            }
            JobOutcome::Failed { reason } => write!(f, "failed: {reason}"),
            JobOutcome::Cancelled { completed, total } => {
                write!(f, "cancelled ({completed} of {total} done)")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub label: String,
    pub operations: Vec<Operation>,
    pub progress: f64,
    pub status: WorkflowStatus,
    pub outcome: Option<JobOutcome>,
    pub started_at: SystemTime,
    pub updated_at: SystemTime,
}

impl Workflow {
    pub fn new(label: impl Into<String>, steps: &[StepSpec]) -> Result<Self, WorkflowError> {
        if steps.is_empty() {
            return Err(WorkflowError::NoSteps);
        }

        let operations = steps
            .iter()
            .map(|step| {
                if !step.weight.is_finite() || step.weight <= 0.0 {
                    return Err(WorkflowError::InvalidWeight {
                        label: step.label.clone(),
                        weight: step.weight,
                    });
                }
                Ok(Operation {
                    id: Uuid::new_v4(),
                    label: step.label.clone(),
                    weight: step.weight,
                    policy: step.policy,
                    status: OperationStatus::Pending,
                    progress: 0.0,
                    message: String::new(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let now = SystemTime::now();
        Ok(Self {
            id: Uuid::new_v4(),
            label: label.into(),
            operations,
            progress: 0.0,
            status: WorkflowStatus::Pending,
            outcome: None,
            started_at: now,
            updated_at: now,
        })
    }

    fn operation_mut(&mut self, index: usize) -> Result<&mut Operation, WorkflowError> {
        let len = self.operations.len();
        let op = self
            .operations
            .get_mut(index)
            .ok_or(WorkflowError::StepOutOfRange { index, len })?;

        if op.status.is_terminal() {
            return Err(WorkflowError::StepFinished { index });
        }
        Ok(op)
    }

    /// Moves a pending step to running and raises its progress. Progress is
    /// clamped to `[0, 100]` and never goes backwards.
    pub fn update_step(
        &mut self,
        index: usize,
        progress: f64,
        message: impl Into<String>,
    ) -> Result<(), WorkflowError> {
        let op = self.operation_mut(index)?;
        op.status = OperationStatus::Running;
        if progress.is_finite() {
            op.progress = op.progress.max(progress.clamp(0.0, 100.0));
        }
        op.message = message.into();
        self.recompute();
        Ok(())
    }

    pub fn complete_step(
        &mut self,
        index: usize,
        success: bool,
        message: impl Into<String>,
    ) -> Result<(), WorkflowError> {
        let op = self.operation_mut(index)?;
        if success {
            op.status = OperationStatus::Succeeded;
            op.progress = 100.0;
        } else {
            op.status = OperationStatus::Failed;
        }
        op.message = message.into();
        self.recompute();
        Ok(())
    }

    pub fn finish(&mut self, outcome: JobOutcome) {
        self.outcome = Some(outcome);
        self.recompute();
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }

    fn recompute(&mut self) {
        let total_weight: f64 = self.operations.iter().map(|op| op.weight).sum();
        let all_succeeded = self
            .operations
            .iter()
            .all(|op| op.status == OperationStatus::Succeeded);

        self.progress = if all_succeeded {
            100.0
        } else {
            let weighted: f64 = self
                .operations
                .iter()
                .map(|op| match op.status {
                    OperationStatus::Succeeded => op.weight * 100.0,
                    _ => op.weight * op.progress.min(UNFINISHED_CAP),
                })
                .sum();
            (weighted / total_weight).min(UNFINISHED_CAP)
        };

        let hard_failed = self
            .operations
            .iter()
            .any(|op| op.status == OperationStatus::Failed && op.policy == FailurePolicy::HardFail);

        self.status = match &self.outcome {
            Some(JobOutcome::Failed { .. }) => WorkflowStatus::Failed,
            Some(JobOutcome::Cancelled { .. }) => WorkflowStatus::Cancelled,
            _ if hard_failed => WorkflowStatus::Failed,
            Some(_) => WorkflowStatus::Completed,
            None if self.operations.iter().all(|op| op.status.is_terminal()) => {
                WorkflowStatus::Completed
            }
            None if self
                .operations
                .iter()
                .any(|op| op.status != OperationStatus::Pending) =>
            {
                WorkflowStatus::Running
            }
            None => WorkflowStatus::Pending,
        };

        self.updated_at = SystemTime::now();
    }
}

/// Registry of live workflows for one session.
///
/// Cheap to clone; clones share the registry and the bus.
#[derive(Clone)]
pub struct WorkflowTracker {
    inner: Arc<TrackerInner>,
}

struct TrackerInner {
    workflows: Mutex<HashMap<Uuid, Workflow>>,
    bus: EventBus,
}

impl WorkflowTracker {
    pub fn new(bus: EventBus) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                workflows: Mutex::new(HashMap::new()),
                bus,
            }),
        }
    }

    /// A tracker whose updates go nowhere.
    pub fn detached() -> Self {
        Self::new(detached_bus())
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn start_workflow(
        &self,
        label: impl Into<String>,
        steps: &[StepSpec],
    ) -> Result<Workflow, WorkflowError> {
        let workflow = Workflow::new(label, steps)?;
        debug!(workflow = %workflow.id, label = %workflow.label, steps = steps.len(), "workflow started");

        self.inner
            .workflows
            .lock()
            .expect("workflow registry poisoned")
            .insert(workflow.id, workflow.clone());

        self.inner
            .bus
            .publish(Arc::new(WorkflowUpdated::new(workflow.clone())));
        Ok(workflow)
    }

    pub fn update_step(
        &self,
        workflow_id: Uuid,
        index: usize,
        progress: f64,
        message: impl Into<String>,
    ) -> Result<Workflow, WorkflowError> {
        let message = message.into();
        self.mutate(workflow_id, Some(index), |wf| {
            wf.update_step(index, progress, message)
        })
    }

    pub fn complete_step(
        &self,
        workflow_id: Uuid,
        index: usize,
        success: bool,
        message: impl Into<String>,
    ) -> Result<Workflow, WorkflowError> {
        let message = message.into();
        self.mutate(workflow_id, Some(index), |wf| {
            wf.complete_step(index, success, message)
        })
    }

    pub fn finish(&self, workflow_id: Uuid, outcome: JobOutcome) -> Result<Workflow, WorkflowError> {
        self.mutate(workflow_id, None, |wf| {
            wf.finish(outcome);
            Ok(())
        })
    }

    pub fn snapshot(&self, workflow_id: Uuid) -> Option<Workflow> {
        self.inner
            .workflows
            .lock()
            .expect("workflow registry poisoned")
            .get(&workflow_id)
            .cloned()
    }

    /// Drops a workflow once its final state has been observed.
    pub fn discard(&self, workflow_id: Uuid) -> Option<Workflow> {
        self.inner
            .workflows
            .lock()
            .expect("workflow registry poisoned")
            .remove(&workflow_id)
    }

    pub fn reporter(&self, workflow_id: Uuid, step: usize) -> StepReporter {
        StepReporter {
            tracker: Some(self.clone()),
            workflow_id,
            step,
        }
    }

    fn mutate(
        &self,
        workflow_id: Uuid,
        step: Option<usize>,
        apply: impl FnOnce(&mut Workflow) -> Result<(), WorkflowError>,
    ) -> Result<Workflow, WorkflowError> {
        let snapshot = {
            let mut workflows = self
                .inner
                .workflows
                .lock()
                .expect("workflow registry poisoned");
            let workflow = workflows
                .get_mut(&workflow_id)
                .ok_or(WorkflowError::UnknownWorkflow(workflow_id))?;
            apply(workflow)?;
            workflow.clone()
        };

        if let Some((index, op)) = step.and_then(|i| snapshot.operations.get(i).map(|op| (i, op))) {
            self.inner.bus.publish(Arc::new(ProgressEvent::new(
                workflow_id,
                op.id,
                index,
                op.progress,
                op.message.clone(),
            )));
        }
        self.inner
            .bus
            .publish(Arc::new(WorkflowUpdated::new(snapshot.clone())));

        Ok(snapshot)
    }
}

/// Handle for one step of one workflow.
///
/// Reporting never fails the caller: rejected updates are logged.
#[derive(Clone)]
pub struct StepReporter {
    tracker: Option<WorkflowTracker>,
    workflow_id: Uuid,
    step: usize,
}

impl StepReporter {
    /// A reporter that drops every update.
    pub fn detached() -> Self {
        Self {
            tracker: None,
            workflow_id: Uuid::nil(),
            step: 0,
        }
    }

    pub fn workflow_id(&self) -> Uuid {
        self.workflow_id
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub fn tracker(&self) -> Option<&WorkflowTracker> {
        self.tracker.as_ref()
    }

    pub fn update(&self, progress: f64, message: impl Into<String>) {
        if let Some(tracker) = &self.tracker
            && let Err(e) = tracker.update_step(self.workflow_id, self.step, progress, message)
        {
            warn!(workflow = %self.workflow_id, step = self.step, error = %e, "progress update rejected");
        }
    }

    pub fn succeed(&self, message: impl Into<String>) {
        self.complete(true, message);
    }

    pub fn fail(&self, message: impl Into<String>) {
        self.complete(false, message);
    }

    fn complete(&self, success: bool, message: impl Into<String>) {
        if let Some(tracker) = &self.tracker
            && let Err(e) = tracker.complete_step(self.workflow_id, self.step, success, message)
        {
            warn!(workflow = %self.workflow_id, step = self.step, error = %e, "step completion rejected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        events::{BusConfig, EventBusBuilder, downcast_ref},
        queues::QueueKind,
        workers::{InputSpec, SubscriptionSpec, WorkerBatch},
    };

    fn steps() -> Vec<StepSpec> {
        vec![
            StepSpec::new("upload", 3.0),
            StepSpec::new("frames", 1.0).continue_on_failure(),
        ]
    }

    #[test]
    fn rejects_empty_and_invalid_steps() {
        assert_eq!(Workflow::new("x", &[]).unwrap_err(), WorkflowError::NoSteps);

        for weight in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let err = Workflow::new("x", &[StepSpec::new("a", weight)]).unwrap_err();
            assert!(matches!(err, WorkflowError::InvalidWeight { .. }));
        }
    }

    #[test]
    fn aggregate_is_weighted_and_capped_until_success() {
        let mut wf = Workflow::new("job", &steps()).unwrap();
        assert_eq!(wf.status, WorkflowStatus::Pending);

        wf.update_step(0, 50.0, "half").unwrap();
        assert_eq!(wf.status, WorkflowStatus::Running);
        assert!((wf.progress - 37.5).abs() < 1e-9);

        wf.update_step(0, 150.0, "over").unwrap();
        wf.update_step(1, 100.0, "done but not succeeded").unwrap();
        assert_eq!(wf.operations[0].progress, 100.0);
        assert!(wf.progress <= 99.0);

        wf.complete_step(0, true, "").unwrap();
        wf.complete_step(1, true, "").unwrap();
        assert_eq!(wf.progress, 100.0);
        assert_eq!(wf.status, WorkflowStatus::Completed);
    }

    #[test]
    fn aggregate_never_decreases() {
        let mut wf = Workflow::new("job", &steps()).unwrap();
        let mut last = wf.progress;

        for (step, p) in [(0, 10.0), (0, 5.0), (1, 40.0), (0, 80.0), (1, 20.0), (0, 99.5)] {
            wf.update_step(step, p, "").unwrap();
            assert!(wf.progress >= last, "{} < {}", wf.progress, last);
            last = wf.progress;
        }
        wf.complete_step(1, false, "render failed").unwrap();
        assert!(wf.progress >= last);
    }

    #[test]
    fn failure_policy_decides_workflow_status() {
        let mut wf = Workflow::new("job", &steps()).unwrap();
        wf.complete_step(1, false, "no frames").unwrap();
        assert_eq!(wf.status, WorkflowStatus::Running);

        wf.complete_step(0, false, "storage down").unwrap();
        assert_eq!(wf.status, WorkflowStatus::Failed);
        assert!(wf.progress < 100.0);
    }

    #[test]
    fn terminal_steps_reject_updates() {
        let mut wf = Workflow::new("job", &steps()).unwrap();
        wf.complete_step(0, true, "").unwrap();

        assert_eq!(
            wf.update_step(0, 10.0, ""),
            Err(WorkflowError::StepFinished { index: 0 })
        );
        assert_eq!(
            wf.complete_step(0, false, ""),
            Err(WorkflowError::StepFinished { index: 0 })
        );
        assert_eq!(
            wf.update_step(7, 10.0, ""),
            Err(WorkflowError::StepOutOfRange { index: 7, len: 2 })
        );
    }

    #[test]
    fn outcome_display() {
        assert_eq!(
            JobOutcome::from_counts(2, 3).to_string(),
            "partially succeeded (2 of 3)"
        );
        assert_eq!(JobOutcome::from_counts(3, 3).to_string(), "succeeded");
    }

    #[test]
    fn cancelled_outcome_marks_workflow_cancelled() {
        let mut wf = Workflow::new("job", &steps()).unwrap();
        wf.update_step(0, 30.0, "").unwrap();
        wf.finish(JobOutcome::Cancelled {
            completed: 1,
            total: 3,
        });
        assert_eq!(wf.status, WorkflowStatus::Cancelled);
        assert!(wf.is_terminal());
    }

    #[tokio::test]
    async fn tracker_publishes_progress_and_snapshots() {
        let (bus, mut wiring, tasks) = EventBusBuilder::new(BusConfig::default())
            .subscribe(SubscriptionSpec {
                subscriber_id: "observer",
                inputs: vec![
                    InputSpec {
                        event_type: ProgressEvent::EVENT_TYPE,
                        queue_kind: QueueKind::FifoDropOldest { capacity: 16 },
                    },
                    InputSpec {
                        event_type: WorkflowUpdated::EVENT_TYPE,
                        queue_kind: QueueKind::Latest1,
                    },
                ],
            })
            .build()
            .unwrap();
        tasks.spawn_all();
        let mut inputs = wiring.take("observer").unwrap();

        let tracker = WorkflowTracker::new(bus);
        let wf = tracker.start_workflow("job", &steps()).unwrap();
        tracker.update_step(wf.id, 0, 40.0, "uploading").unwrap();

        let Some(WorkerBatch::Snapshots(updates)) = inputs.try_next() else {
            panic!("expected a snapshot");
        };
        let latest = downcast_ref::<WorkflowUpdated>(&updates[0].event.event).unwrap();
        assert_eq!(latest.workflow.operations[0].progress, 40.0);

        let Some(WorkerBatch::FifoItem { event, .. }) = inputs.try_next() else {
            panic!("expected a progress event");
        };
        let progress = downcast_ref::<ProgressEvent>(&event.event).unwrap();
        assert_eq!(progress.workflow_id, wf.id);
        assert_eq!(progress.operation_id, wf.operations[0].id);
        assert_eq!(progress.message, "uploading");

        assert_eq!(tracker.snapshot(wf.id).unwrap().status, WorkflowStatus::Running);
        assert!(tracker.discard(wf.id).is_some());
        assert_eq!(
            tracker.update_step(wf.id, 0, 50.0, ""),
            Err(WorkflowError::UnknownWorkflow(wf.id))
        );
    }
}
