use braid_config::PathError;
use thiserror::Error;

/// Errors that reject a workflow definition before any step runs.
#[derive(Debug, Error)]
pub enum GraphError {
  #[error("step '{step_id}' is defined more than once")]
  DuplicateStep { step_id: String },

  #[error("edge from step '{step_id}' to itself")]
  SelfLoop { step_id: String },

  #[error("{referenced_by} references unknown step '{step_id}'")]
  UnknownStepReference {
    step_id: String,
    referenced_by: String,
  },

  #[error("cycle detected among steps: {}", steps.join(", "))]
  CycleDetected { steps: Vec<String> },

  #[error("invalid reference in step '{step_id}': {source}")]
  InvalidReference {
    step_id: String,
    #[source]
    source: PathError,
  },

  #[error("step '{step_id}' references step '{source_step_id}', which is not upstream of it")]
  UnreachableReference {
    step_id: String,
    source_step_id: String,
  },

  #[error("invalid condition expression in step '{step_id}': {message}")]
  InvalidExpression { step_id: String, message: String },
}
