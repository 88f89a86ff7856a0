//! Engine errors.

use braid_resolver::ValidationError;
use braid_store::{ExecutionStatus, StoreError};
use braid_workflow::GraphError;

use crate::config::ConfigError;

/// Errors returned by [`Engine`](crate::Engine) entry points.
///
/// Step-level failures are not errors here: they are recorded in the step's
/// state and drive the execution to a terminal status.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  /// The workflow definition is invalid. No execution was created.
  #[error("invalid workflow: {0}")]
  Graph(#[from] GraphError),

  #[error("invalid engine config: {0}")]
  Config(#[from] ConfigError),

  #[error("state store error: {0}")]
  Store(StoreError),

  #[error("execution '{execution_id}' not found")]
  ExecutionNotFound { execution_id: String },

  /// A step names a capability with no registered executor.
  #[error("step '{step_id}' uses unknown capability '{capability}'")]
  UnknownCapability { step_id: String, capability: String },

  /// The engine holds no compiled workflow for the execution. Use
  /// `attach` or `recover` after a restart.
  #[error("execution '{execution_id}' is not attached to a workflow")]
  NotAttached { execution_id: String },

  #[error("execution '{execution_id}' belongs to workflow '{actual}', not '{expected}'")]
  WorkflowMismatch {
    execution_id: String,
    expected: String,
    actual: String,
  },

  #[error("execution '{execution_id}' already has a running loop")]
  AlreadyRunning { execution_id: String },

  #[error("execution '{execution_id}' is {status}, not paused")]
  NotPaused {
    execution_id: String,
    status: ExecutionStatus,
  },

  #[error("execution '{execution_id}' is already {status}")]
  NotCancellable {
    execution_id: String,
    status: ExecutionStatus,
  },

  /// Inputs supplied to `resume` do not satisfy the pending request.
  #[error("invalid resume input: {0}")]
  InvalidInput(#[from] ValidationError),

  /// The execution loop stopped on an engine error, e.g. a failed write.
  #[error("execution '{execution_id}' aborted: {message}")]
  Aborted {
    execution_id: String,
    message: String,
  },
}

impl From<StoreError> for EngineError {
  fn from(error: StoreError) -> Self {
    match error {
      StoreError::NotFound(execution_id) => EngineError::ExecutionNotFound { execution_id },
      other => EngineError::Store(other),
    }
  }
}
