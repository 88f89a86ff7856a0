//! The execution loop.
//!
//! One loop runs per active execution. It exclusively owns the
//! [`ExecutionState`]: step units run concurrently in spawned tasks and
//! report back over a single completion channel, and the loop applies each
//! report, persists, and dispatches whatever became ready.
//!
//! Concurrency is bounded by a semaphore. The loop takes an owned permit per
//! dispatched step and moves it into the step's task; the task releases it
//! before reporting.

use std::collections::{BTreeSet, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use braid_resolver::{Scope, evaluate_condition};
use braid_store::{
  ExecutionState, ExecutionStatus, StepError, StepErrorKind, StepStatus, derive_status,
};
use braid_workflow::CompiledWorkflow;
use futures::FutureExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::engine::Shared;
use crate::error::EngineError;
use crate::events::ExecutionEvent;
use crate::step::{StepReport, StepResult, StepUnit, resolution_error};

enum Readiness {
  /// Some source is not terminal yet.
  Waiting,
  Ready,
  Skip(String),
  /// A source failed or was cancelled.
  Blocked(String),
  /// A condition could not be evaluated.
  Fail(StepError),
}

pub(crate) struct Scheduler {
  shared: Arc<Shared>,
  workflow: Arc<CompiledWorkflow>,
  state: ExecutionState,
  cancel: CancellationToken,
}

impl Scheduler {
  pub(crate) fn new(
    shared: Arc<Shared>,
    workflow: Arc<CompiledWorkflow>,
    state: ExecutionState,
    cancel: CancellationToken,
  ) -> Self {
    Self {
      shared,
      workflow,
      state,
      cancel,
    }
  }

  /// Drive the execution until it is terminal or paused.
  #[instrument(
    name = "execution_loop",
    skip(self),
    fields(
      execution_id = %self.state.execution_id,
      workflow_id = %self.state.workflow_id,
    )
  )]
  pub(crate) async fn run(mut self) -> Result<ExecutionState, EngineError> {
    if self.state.status == ExecutionStatus::Pending {
      self.state.status = ExecutionStatus::Running;
      self.persist().await?;
      info!(steps = self.workflow.len(), "execution_started");
      self.publish(ExecutionEvent::ExecutionStarted {
        execution_id: self.state.execution_id.clone(),
        workflow_id: self.state.workflow_id.clone(),
      });
    }

    let semaphore = Arc::new(Semaphore::new(self.shared.config.max_parallel_steps));
    let (tx, mut rx) = mpsc::channel::<StepReport>(self.workflow.len().max(1));
    let mut tasks = JoinSet::new();
    let mut in_flight: HashSet<String> = HashSet::new();
    let cancel = self.cancel.clone();

    loop {
      if cancel.is_cancelled() {
        return self.finish_cancelled(&mut tasks).await;
      }

      if !self.state.is_paused() {
        for step_id in self.settle().await? {
          if cancel.is_cancelled() {
            break;
          }
          let Ok(permit) = semaphore.clone().try_acquire_owned() else {
            break;
          };
          self.dispatch(step_id, permit, &tx, &mut tasks, &mut in_flight).await?;
        }
      }

      if in_flight.is_empty() {
        break;
      }

      tokio::select! {
        biased;
        _ = cancel.cancelled() => {
          return self.finish_cancelled(&mut tasks).await;
        }
        report = rx.recv() => {
          let Some(report) = report else {
            return Err(self.aborted("completion channel closed"));
          };
          in_flight.remove(&report.step_id);
          self.apply(report).await?;
          while tasks.try_join_next().is_some() {}
        }
      }
    }

    self.finish().await
  }

  /// Resolve every pending step whose sources are terminal: skip it, block
  /// it, fail it, or return it as ready. Ready steps come back in
  /// topological order.
  async fn settle(&mut self) -> Result<Vec<String>, EngineError> {
    let workflow = self.workflow.clone();
    let mut ready = Vec::new();
    let mut changed = false;

    for step_id in workflow.topological_order() {
      if self.status_of(step_id) != Some(StepStatus::Pending) {
        continue;
      }

      match self.readiness(step_id) {
        Readiness::Waiting => {}
        Readiness::Ready => ready.push(step_id.clone()),
        Readiness::Skip(reason) => {
          if let Some(step) = self.state.step_mut(step_id) {
            step.skip();
          }
          debug!(step_id = %step_id, reason = %reason, "step_skipped");
          self.publish(ExecutionEvent::StepSkipped {
            execution_id: self.state.execution_id.clone(),
            step_id: step_id.clone(),
            reason,
          });
          changed = true;
        }
        Readiness::Blocked(source) => {
          self.cascade(&source);
          changed = true;
        }
        Readiness::Fail(error) => {
          self.record_failure(step_id, error);
          changed = true;
        }
      }
    }

    if changed {
      self.persist().await?;
    }
    Ok(ready)
  }

  fn readiness(&self, step_id: &str) -> Readiness {
    let graph = self.workflow.graph();
    let sources = graph.upstream(step_id);

    let mut all_skipped = !sources.is_empty();
    let mut skipped_sources = BTreeSet::new();
    for source in sources {
      match self.status_of(source) {
        Some(StepStatus::Completed) => all_skipped = false,
        Some(StepStatus::Skipped) => {
          skipped_sources.insert(source.as_str());
        }
        Some(StepStatus::Failed) | Some(StepStatus::Cancelled) => {
          return Readiness::Blocked(source.clone());
        }
        Some(StepStatus::Pending) | Some(StepStatus::Running) | None => return Readiness::Waiting,
      }
    }
    if all_skipped {
      return Readiness::Skip("all upstream steps were skipped".to_string());
    }

    let scope = self.scope_for(step_id);
    for edge in self.workflow.incoming_edges(step_id) {
      let Some(condition) = &edge.condition else {
        continue;
      };
      // An edge from a skipped step never fires.
      if skipped_sources.contains(edge.source.as_str()) {
        continue;
      }
      match evaluate_condition(step_id, condition, &scope) {
        Ok(true) => {}
        Ok(false) => {
          return Readiness::Skip(format!("condition on edge from '{}' is false", edge.source));
        }
        Err(e) => return Readiness::Fail(resolution_error(&e)),
      }
    }

    if let Some(condition) = self.workflow.get_step(step_id).and_then(|s| s.condition.as_ref()) {
      match evaluate_condition(step_id, condition, &scope) {
        Ok(true) => {}
        Ok(false) => return Readiness::Skip("step condition is false".to_string()),
        Err(e) => return Readiness::Fail(resolution_error(&e)),
      }
    }

    Readiness::Ready
  }

  /// The outputs a step may read: those of its ancestors.
  fn scope_for(&self, step_id: &str) -> Scope {
    let mut scope = Scope::new();
    for ancestor in self.workflow.graph().ancestors(step_id) {
      match self.status_of(&ancestor) {
        Some(StepStatus::Skipped) => scope.mark_skipped(ancestor),
        Some(StepStatus::Completed) => {
          if let Some(output) = self.state.variables.get(&ancestor) {
            scope.insert_output(ancestor, output.clone());
          }
        }
        _ => {}
      }
    }
    scope
  }

  async fn dispatch(
    &mut self,
    step_id: String,
    permit: OwnedSemaphorePermit,
    tx: &mpsc::Sender<StepReport>,
    tasks: &mut JoinSet<()>,
    in_flight: &mut HashSet<String>,
  ) -> Result<(), EngineError> {
    let Some(step) = self.workflow.get_step(&step_id).cloned() else {
      return Err(self.aborted(&format!("step '{}' missing from workflow", step_id)));
    };

    if let Some(state) = self.state.step_mut(&step_id) {
      state.transition(StepStatus::Running);
    }
    self.persist().await?;
    info!(step_id = %step_id, capability = %step.capability, "step_started");
    self.publish(ExecutionEvent::StepStarted {
      execution_id: self.state.execution_id.clone(),
      step_id: step_id.clone(),
    });

    let config = &self.shared.config;
    let unit = StepUnit {
      execution_id: self.state.execution_id.clone(),
      workflow_id: self.state.workflow_id.clone(),
      scope: self.scope_for(&step_id),
      executor: self.shared.registry.get(&step.capability),
      governance: self.shared.governance.clone(),
      timeout: config.step_timeout(step.timeout_ms),
      max_retry_attempts: step.max_retry_attempts.unwrap_or(config.max_retry_attempts),
      cancel: self.cancel.child_token(),
      step,
    };

    let tx = tx.clone();
    in_flight.insert(step_id.clone());
    tasks.spawn(async move {
      let report = match AssertUnwindSafe(unit.run()).catch_unwind().await {
        Ok(report) => report,
        Err(panic) => StepReport::failed(
          step_id,
          StepError::new(
            StepErrorKind::ExecutorError,
            format!("executor panicked: {}", panic_message(panic.as_ref())),
          ),
        ),
      };
      drop(permit);
      // The loop only stops listening once it is finished with this run.
      let _ = tx.send(report).await;
    });

    Ok(())
  }

  async fn apply(&mut self, report: StepReport) -> Result<(), EngineError> {
    let StepReport {
      step_id,
      attempts,
      resolved_parameters,
      result,
    } = report;

    if let Some(step) = self.state.step_mut(&step_id) {
      step.attempt_count = attempts;
      step.resolved_parameters = resolved_parameters;
    }

    match result {
      StepResult::Completed(output) => {
        if let Some(step) = self.state.step_mut(&step_id) {
          step.complete(output.clone());
        }
        self.state.variables.insert(step_id.clone(), output.clone());
        info!(step_id = %step_id, attempts, "step_completed");
        self.publish(ExecutionEvent::StepCompleted {
          execution_id: self.state.execution_id.clone(),
          step_id,
          output,
        });
      }
      StepResult::AwaitInput(input) => {
        info!(step_id = %step_id, keys = ?input.keys, "step_awaiting_input");
        self.publish(ExecutionEvent::StepAwaitingInput {
          execution_id: self.state.execution_id.clone(),
          step_id: step_id.clone(),
          keys: input.keys.clone(),
        });
        self.state.add_pending_input(step_id, input);
        self.state.status = ExecutionStatus::PausedAwaitingInput;
      }
      StepResult::Failed(error) => self.record_failure(&step_id, error),
    }

    self.persist().await
  }

  /// Fail a step and cancel everything downstream of it.
  fn record_failure(&mut self, step_id: &str, error: StepError) {
    if error.kind == StepErrorKind::Internal {
      error!(step_id = %step_id, error = %error, "engine_invariant_violated");
    } else {
      warn!(step_id = %step_id, error = %error, "step_failed");
    }

    if let Some(step) = self.state.step_mut(step_id) {
      step.fail(error.clone());
    }
    if self.state.error.is_none() {
      self.state.error = Some(format!("step '{}' failed: {}", step_id, error.message));
    }
    self.publish(ExecutionEvent::StepFailed {
      execution_id: self.state.execution_id.clone(),
      step_id: step_id.to_string(),
      error,
    });
    self.cascade(step_id);
  }

  /// Cancel every pending descendant of `failed_step`.
  fn cascade(&mut self, failed_step: &str) {
    let reason = format!("upstream step '{}' did not complete", failed_step);
    let descendants = self.workflow.graph().descendants(failed_step);
    for descendant in descendants {
      let cancelled = self.state.step_mut(&descendant).is_some_and(|step| {
        step.status == StepStatus::Pending
          && step.cancel(StepError::new(StepErrorKind::UpstreamFailed, reason.clone()))
      });
      if cancelled {
        debug!(step_id = %descendant, upstream = %failed_step, "step_cancelled");
        self.publish(ExecutionEvent::StepCancelled {
          execution_id: self.state.execution_id.clone(),
          step_id: descendant,
          reason: reason.clone(),
        });
      }
    }
  }

  async fn finish(mut self) -> Result<ExecutionState, EngineError> {
    if self.state.is_paused() {
      self.persist().await?;
      info!(pending_input_keys = ?self.state.pending_input_keys, "execution_paused");
      self.publish(ExecutionEvent::ExecutionPaused {
        execution_id: self.state.execution_id.clone(),
        pending_input_keys: self.state.pending_input_keys.clone(),
      });
      return Ok(self.state);
    }

    let mut status = derive_status(self.state.step_states.values());
    if status == ExecutionStatus::Running {
      // Nothing in flight and nothing ready, yet steps remain: a scheduling bug.
      let stuck: Vec<String> = self
        .state
        .step_states
        .values()
        .filter(|s| !s.status.is_terminal())
        .map(|s| s.step_id.clone())
        .collect();
      error!(steps = ?stuck, "execution_stalled");
      for step_id in stuck {
        if let Some(step) = self.state.step_mut(&step_id) {
          step.fail(StepError::new(
            StepErrorKind::Internal,
            "step never became ready",
          ));
        }
      }
      status = ExecutionStatus::Failed;
    }

    self.state.status = status;
    self.persist().await?;

    let execution_id = self.state.execution_id.clone();
    match status {
      ExecutionStatus::Failed => {
        let error = self
          .state
          .error
          .clone()
          .unwrap_or_else(|| "execution failed".to_string());
        error!(error = %error, "execution_failed");
        self.publish(ExecutionEvent::ExecutionFailed {
          execution_id,
          error,
        });
      }
      ExecutionStatus::Cancelled => {
        warn!("execution_cancelled");
        self.publish(ExecutionEvent::ExecutionCancelled { execution_id });
      }
      _ => {
        info!("execution_completed");
        self.publish(ExecutionEvent::ExecutionCompleted { execution_id });
      }
    }

    Ok(self.state)
  }

  async fn finish_cancelled(mut self, tasks: &mut JoinSet<()>) -> Result<ExecutionState, EngineError> {
    tasks.abort_all();
    while tasks.join_next().await.is_some() {}

    let cancelled = cancel_unfinished(&mut self.state);
    self.persist().await?;

    warn!(cancelled_steps = cancelled.len(), "execution_cancelled");
    for step_id in cancelled {
      self.publish(ExecutionEvent::StepCancelled {
        execution_id: self.state.execution_id.clone(),
        step_id,
        reason: "execution cancelled".to_string(),
      });
    }
    self.publish(ExecutionEvent::ExecutionCancelled {
      execution_id: self.state.execution_id.clone(),
    });
    Ok(self.state)
  }

  fn status_of(&self, step_id: &str) -> Option<StepStatus> {
    self.state.step(step_id).map(|s| s.status)
  }

  async fn persist(&mut self) -> Result<(), EngineError> {
    self.state.touch();
    self.shared.store.save(&self.state).await?;
    Ok(())
  }

  fn publish(&self, event: ExecutionEvent) {
    self.shared.publish(event);
  }

  fn aborted(&self, message: &str) -> EngineError {
    EngineError::Aborted {
      execution_id: self.state.execution_id.clone(),
      message: message.to_string(),
    }
  }
}

/// Mark every pending or running step cancelled and the execution
/// cancelled. Returns the steps that changed.
pub(crate) fn cancel_unfinished(state: &mut ExecutionState) -> Vec<String> {
  let mut cancelled = Vec::new();
  for step in state.step_states.values_mut() {
    if !step.status.is_terminal()
      && step.cancel(StepError::new(StepErrorKind::Cancelled, "execution cancelled"))
    {
      cancelled.push(step.step_id.clone());
    }
  }
  state.clear_pending_inputs();
  state.status = ExecutionStatus::Cancelled;
  cancelled
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
  if let Some(s) = panic.downcast_ref::<&str>() {
    s.to_string()
  } else if let Some(s) = panic.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic".to_string()
  }
}
