use braid_config::PathError;
use thiserror::Error;

/// Errors raised while resolving references or evaluating conditions.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResolutionError {
  /// The referenced step has not reached a terminal state.
  ///
  /// The scheduler never resolves a step before its sources are terminal, so
  /// this indicates an engine bug rather than a workflow problem.
  #[error("step '{step_id}' resolved before dependency '{source_step_id}' finished")]
  DependencyNotReady {
    step_id: String,
    source_step_id: String,
  },

  #[error("step '{step_id}': path '{path}' not found")]
  PathNotFound { step_id: String, path: String },

  #[error("step '{step_id}': source step '{source_step_id}' was skipped and the reference has no default")]
  SourceSkipped {
    step_id: String,
    source_step_id: String,
  },

  #[error("step '{step_id}': invalid reference: {source}")]
  InvalidReference {
    step_id: String,
    #[source]
    source: PathError,
  },

  #[error("step '{step_id}': condition expression failed: {message}")]
  Expression { step_id: String, message: String },
}

impl ResolutionError {
  /// Whether this error signals a broken scheduling invariant.
  pub fn is_internal(&self) -> bool {
    matches!(self, ResolutionError::DependencyNotReady { .. })
  }
}

/// Errors raised when resolved parameters do not match a schema.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
  #[error("step '{step_id}': schema violation on '{field}': {message}")]
  SchemaViolation {
    step_id: String,
    field: String,
    message: String,
  },
}
