use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
  Pending,
  Running,
  PausedAwaitingInput,
  Completed,
  Failed,
  Cancelled,
}

impl ExecutionStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      ExecutionStatus::Pending => "pending",
      ExecutionStatus::Running => "running",
      ExecutionStatus::PausedAwaitingInput => "paused_awaiting_input",
      ExecutionStatus::Completed => "completed",
      ExecutionStatus::Failed => "failed",
      ExecutionStatus::Cancelled => "cancelled",
    }
  }

  /// Completed, failed or cancelled. A paused execution is not terminal.
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
    )
  }
}

impl std::fmt::Display for ExecutionStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Status of a single step within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
  Pending,
  Running,
  Completed,
  Failed,
  Cancelled,
  Skipped,
}

impl StepStatus {
  pub fn is_terminal(&self) -> bool {
    !matches!(self, StepStatus::Pending | StepStatus::Running)
  }

  /// Steps only move forward: `Pending -> Running -> terminal`. A pending
  /// step may also end directly (skipped, cancelled, or failed by cascade).
  pub fn can_transition_to(&self, next: StepStatus) -> bool {
    match self {
      StepStatus::Pending => next != StepStatus::Pending,
      StepStatus::Running => next.is_terminal(),
      _ => false,
    }
  }
}

impl std::fmt::Display for StepStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      StepStatus::Pending => "pending",
      StepStatus::Running => "running",
      StepStatus::Completed => "completed",
      StepStatus::Failed => "failed",
      StepStatus::Cancelled => "cancelled",
      StepStatus::Skipped => "skipped",
    };
    f.write_str(s)
  }
}

/// Why a step failed or was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepErrorKind {
  PermissionDenied,
  PathNotFound,
  SourceSkipped,
  ConditionError,
  SchemaViolation,
  UnknownCapability,
  ExecutorError,
  Timeout,
  Cancelled,
  UpstreamFailed,
  /// The engine broke one of its own invariants.
  Internal,
}

impl StepErrorKind {
  /// Only capability failures and timeouts are retried.
  pub fn is_retryable(&self) -> bool {
    matches!(self, StepErrorKind::ExecutorError | StepErrorKind::Timeout)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepError {
  pub kind: StepErrorKind,
  pub message: String,
}

impl StepError {
  pub fn new(kind: StepErrorKind, message: impl Into<String>) -> Self {
    Self {
      kind,
      message: message.into(),
    }
  }
}

impl std::fmt::Display for StepError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{:?}: {}", self.kind, self.message)
  }
}

/// Persisted state of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepState {
  pub step_id: String,
  pub status: StepStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub output: Option<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<StepError>,
  #[serde(default)]
  pub attempt_count: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub resolved_parameters: Option<Value>,
  pub started_at: Option<DateTime<Utc>>,
  pub completed_at: Option<DateTime<Utc>>,
}

impl StepState {
  pub fn new(step_id: impl Into<String>) -> Self {
    Self {
      step_id: step_id.into(),
      status: StepStatus::Pending,
      output: None,
      error: None,
      attempt_count: 0,
      resolved_parameters: None,
      started_at: None,
      completed_at: None,
    }
  }

  /// Move to `next` if the transition is allowed. Returns whether it was.
  pub fn transition(&mut self, next: StepStatus) -> bool {
    if !self.status.can_transition_to(next) {
      return false;
    }
    let now = Utc::now();
    if next == StepStatus::Running {
      self.started_at = Some(now);
    }
    if next.is_terminal() {
      self.completed_at = Some(now);
    }
    self.status = next;
    true
  }

  pub fn complete(&mut self, output: Value) -> bool {
    let applied = self.transition(StepStatus::Completed);
    if applied {
      self.output = Some(output);
    }
    applied
  }

  pub fn fail(&mut self, error: StepError) -> bool {
    self.finish_with_error(StepStatus::Failed, error)
  }

  pub fn cancel(&mut self, error: StepError) -> bool {
    self.finish_with_error(StepStatus::Cancelled, error)
  }

  pub fn skip(&mut self) -> bool {
    self.transition(StepStatus::Skipped)
  }

  fn finish_with_error(&mut self, status: StepStatus, error: StepError) -> bool {
    let applied = self.transition(status);
    if applied {
      self.error = Some(error);
    }
    applied
  }

  /// Return a step that never recorded an outcome to `Pending`.
  ///
  /// Used only when recovering an execution after a crash; this is the one
  /// move that is not monotonic.
  pub fn reset(&mut self) {
    if self.status == StepStatus::Running {
      self.status = StepStatus::Pending;
      self.started_at = None;
      self.resolved_parameters = None;
    }
  }
}

/// Input an execution is waiting for on behalf of one paused step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingInput {
  pub keys: BTreeSet<String>,
  /// Optional JSON Schema (object subset) for the supplied values.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub schema: Option<Value>,
}

/// Persisted state of an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
  pub execution_id: String,
  pub workflow_id: String,
  pub status: ExecutionStatus,
  pub step_states: BTreeMap<String, StepState>,
  /// Outputs of completed steps, keyed by step id.
  pub variables: BTreeMap<String, Value>,
  /// Keys requested while paused. Empty otherwise.
  #[serde(default)]
  pub pending_input_keys: BTreeSet<String>,
  /// Pending input per paused step.
  #[serde(default)]
  pub pending_inputs: BTreeMap<String, PendingInput>,
  /// Summary of the failure that ended the run.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl ExecutionState {
  pub fn new<I, S>(execution_id: impl Into<String>, workflow_id: impl Into<String>, step_ids: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let now = Utc::now();
    let step_states = step_ids
      .into_iter()
      .map(|id| {
        let id = id.into();
        (id.clone(), StepState::new(id))
      })
      .collect();
    Self {
      execution_id: execution_id.into(),
      workflow_id: workflow_id.into(),
      status: ExecutionStatus::Pending,
      step_states,
      variables: BTreeMap::new(),
      pending_input_keys: BTreeSet::new(),
      pending_inputs: BTreeMap::new(),
      error: None,
      created_at: now,
      updated_at: now,
    }
  }

  pub fn step(&self, step_id: &str) -> Option<&StepState> {
    self.step_states.get(step_id)
  }

  pub fn step_mut(&mut self, step_id: &str) -> Option<&mut StepState> {
    self.step_states.get_mut(step_id)
  }

  pub fn is_terminal(&self) -> bool {
    self.status.is_terminal()
  }

  /// Ids of steps currently in `status`.
  pub fn steps_with_status(&self, status: StepStatus) -> Vec<&str> {
    self
      .step_states
      .values()
      .filter(|s| s.status == status)
      .map(|s| s.step_id.as_str())
      .collect()
  }

  pub fn skipped_steps(&self) -> BTreeSet<String> {
    self
      .steps_with_status(StepStatus::Skipped)
      .into_iter()
      .map(str::to_string)
      .collect()
  }

  pub fn is_paused(&self) -> bool {
    self.status == ExecutionStatus::PausedAwaitingInput
  }

  /// Record a paused step and the keys it needs.
  pub fn add_pending_input(&mut self, step_id: impl Into<String>, input: PendingInput) {
    self.pending_input_keys.extend(input.keys.iter().cloned());
    self.pending_inputs.insert(step_id.into(), input);
  }

  pub fn clear_pending_inputs(&mut self) {
    self.pending_input_keys.clear();
    self.pending_inputs.clear();
  }

  pub fn touch(&mut self) {
    self.updated_at = Utc::now();
  }
}

/// Derive the execution status from its steps.
///
/// Running while any step is not terminal; otherwise failed if any step
/// failed, cancelled if any step was cancelled, and completed when every step
/// either completed or was skipped. Pausing is set by the scheduler and is
/// never derived.
pub fn derive_status<'a>(steps: impl IntoIterator<Item = &'a StepState>) -> ExecutionStatus {
  let mut failed = false;
  let mut cancelled = false;
  for step in steps {
    match step.status {
      StepStatus::Pending | StepStatus::Running => return ExecutionStatus::Running,
      StepStatus::Failed => failed = true,
      StepStatus::Cancelled => cancelled = true,
      StepStatus::Completed | StepStatus::Skipped => {}
    }
  }
  if failed {
    ExecutionStatus::Failed
  } else if cancelled {
    ExecutionStatus::Cancelled
  } else {
    ExecutionStatus::Completed
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn step(id: &str, status: StepStatus) -> StepState {
    StepState {
      status,
      ..StepState::new(id)
    }
  }

  #[test]
  fn test_monotonic_transitions() {
    let mut s = StepState::new("a");
    assert!(s.transition(StepStatus::Running));
    assert!(s.started_at.is_some());
    assert!(!s.transition(StepStatus::Pending));
    assert!(s.complete(json!({ "ok": true })));
    assert!(s.completed_at.is_some());
    assert!(!s.fail(StepError::new(StepErrorKind::Timeout, "late")));
    assert_eq!(s.status, StepStatus::Completed);
    assert!(s.error.is_none());
  }

  #[test]
  fn test_pending_can_end_without_running() {
    let mut s = StepState::new("a");
    assert!(s.cancel(StepError::new(StepErrorKind::UpstreamFailed, "b failed")));
    assert_eq!(s.status, StepStatus::Cancelled);
    assert!(s.started_at.is_none());
  }

  #[test]
  fn test_reset_only_touches_running() {
    let mut running = step("a", StepStatus::Running);
    running.reset();
    assert_eq!(running.status, StepStatus::Pending);

    let mut done = step("b", StepStatus::Completed);
    done.reset();
    assert_eq!(done.status, StepStatus::Completed);
  }

  #[test]
  fn test_derive_status() {
    let all = |steps: &[StepState]| derive_status(steps.iter());

    assert_eq!(
      all(&[step("a", StepStatus::Completed), step("b", StepStatus::Running)]),
      ExecutionStatus::Running
    );
    assert_eq!(
      all(&[step("a", StepStatus::Completed), step("b", StepStatus::Skipped)]),
      ExecutionStatus::Completed
    );
    assert_eq!(
      all(&[step("a", StepStatus::Failed), step("b", StepStatus::Cancelled)]),
      ExecutionStatus::Failed
    );
    assert_eq!(
      all(&[step("a", StepStatus::Completed), step("b", StepStatus::Cancelled)]),
      ExecutionStatus::Cancelled
    );
    assert_eq!(all(&[]), ExecutionStatus::Completed);
  }

  #[test]
  fn test_pending_inputs_union_keys() {
    let mut state = ExecutionState::new("e", "w", ["a", "b"]);
    state.add_pending_input(
      "a",
      PendingInput {
        keys: ["approved".to_string()].into(),
        schema: None,
      },
    );
    state.add_pending_input(
      "b",
      PendingInput {
        keys: ["approved".to_string(), "note".to_string()].into(),
        schema: None,
      },
    );
    assert_eq!(state.pending_input_keys.len(), 2);
    state.clear_pending_inputs();
    assert!(state.pending_input_keys.is_empty());
    assert!(state.pending_inputs.is_empty());
  }

  #[test]
  fn test_state_serde_uses_snake_case() {
    let state = ExecutionState {
      status: ExecutionStatus::PausedAwaitingInput,
      ..ExecutionState::new("e", "w", ["a"])
    };
    let json = serde_json::to_value(&state).unwrap();
    assert_eq!(json["status"], "paused_awaiting_input");
    assert_eq!(json["step_states"]["a"]["status"], "pending");
  }
}
