//! The per-step unit of work.
//!
//! Runs inside a spawned task and never touches `ExecutionState`: it reports
//! back to the execution loop with a [`StepReport`].
//!
//! Sequence: governance check, parameter resolution, schema validation, then
//! the executor call under the step timeout. Failures before the executor
//! call are final; executor failures and timeouts are retried up to the
//! step's retry limit, immediately.

use std::sync::Arc;
use std::time::Duration;

use braid_config::StepDef;
use braid_resolver::{ResolutionError, Scope, resolve_parameters, validate_parameters};
use braid_store::{PendingInput, StepError, StepErrorKind};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::executor::{ExecutorError, StepContext, StepExecutor, StepOutcome};
use crate::governance::{GovernanceCheck, GovernanceDecision, GovernanceRequest};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StepResult {
  Completed(Value),
  AwaitInput(PendingInput),
  Failed(StepError),
}

#[derive(Debug, Clone)]
pub(crate) struct StepReport {
  pub step_id: String,
  pub attempts: u32,
  pub resolved_parameters: Option<Value>,
  pub result: StepResult,
}

impl StepReport {
  pub fn failed(step_id: impl Into<String>, error: StepError) -> Self {
    Self {
      step_id: step_id.into(),
      attempts: 0,
      resolved_parameters: None,
      result: StepResult::Failed(error),
    }
  }
}

pub(crate) struct StepUnit {
  pub execution_id: String,
  pub workflow_id: String,
  pub step: StepDef,
  pub scope: Scope,
  pub executor: Option<Arc<dyn StepExecutor>>,
  pub governance: Arc<dyn GovernanceCheck>,
  pub timeout: Option<Duration>,
  pub max_retry_attempts: u32,
  pub cancel: CancellationToken,
}

impl StepUnit {
  #[instrument(
    name = "step_execute",
    skip(self),
    fields(
      execution_id = %self.execution_id,
      step_id = %self.step.step_id,
      capability = %self.step.capability,
    )
  )]
  pub async fn run(self) -> StepReport {
    let mut attempts = 0;
    let mut resolved_parameters = None;
    let result = self.execute(&mut attempts, &mut resolved_parameters).await;
    StepReport {
      step_id: self.step.step_id,
      attempts,
      resolved_parameters,
      result,
    }
  }

  async fn execute(&self, attempts: &mut u32, resolved: &mut Option<Value>) -> StepResult {
    let step_id = self.step.step_id.as_str();

    let request = GovernanceRequest {
      execution_id: &self.execution_id,
      workflow_id: &self.workflow_id,
      step: &self.step,
    };
    if let GovernanceDecision::Deny { reason } = self.governance.check(&request).await {
      return StepResult::Failed(StepError::new(StepErrorKind::PermissionDenied, reason));
    }

    let parameters = match resolve_parameters(step_id, &self.step.parameters, &self.scope) {
      Ok(parameters) => parameters,
      Err(e) => return StepResult::Failed(resolution_error(&e)),
    };
    *resolved = Some(parameters.clone());

    if let Some(schema) = &self.step.parameter_schema {
      if let Err(e) = validate_parameters(step_id, &parameters, schema) {
        return StepResult::Failed(StepError::new(StepErrorKind::SchemaViolation, e.to_string()));
      }
    }

    let Some(executor) = self.executor.clone() else {
      return StepResult::Failed(StepError::new(
        StepErrorKind::UnknownCapability,
        format!("no executor registered for '{}'", self.step.capability),
      ));
    };

    loop {
      *attempts += 1;
      let attempt_cancel = self.cancel.child_token();
      let ctx = StepContext {
        execution_id: self.execution_id.clone(),
        workflow_id: self.workflow_id.clone(),
        step_id: step_id.to_string(),
        capability: self.step.capability.clone(),
        parameters: parameters.clone(),
        attempt: *attempts,
        timeout: self.timeout,
        cancel: attempt_cancel.clone(),
      };

      let outcome = match self.timeout {
        Some(limit) => match tokio::time::timeout(limit, executor.execute(ctx)).await {
          Ok(result) => result.map_err(executor_error),
          Err(_) => {
            attempt_cancel.cancel();
            Err(StepError::new(
              StepErrorKind::Timeout,
              format!("timed out after {}ms", limit.as_millis()),
            ))
          }
        },
        None => executor.execute(ctx).await.map_err(executor_error),
      };

      match outcome {
        Ok(StepOutcome::Completed(output)) => return StepResult::Completed(output),
        Ok(StepOutcome::AwaitInput { keys, schema }) => {
          info!(keys = ?keys, "step_requested_input");
          return StepResult::AwaitInput(PendingInput { keys, schema });
        }
        Err(error)
          if error.kind.is_retryable()
            && *attempts <= self.max_retry_attempts
            && !self.cancel.is_cancelled() =>
        {
          warn!(
            attempt = *attempts,
            max_retry_attempts = self.max_retry_attempts,
            error = %error,
            "step_retrying"
          );
        }
        Err(error) => return StepResult::Failed(error),
      }
    }
  }
}

/// Every executor error fails the step. A `Cancelled` the engine did not ask
/// for is the executor giving up, so it is reported as an executor error.
fn executor_error(error: ExecutorError) -> StepError {
  StepError::new(StepErrorKind::ExecutorError, error.to_string())
}

pub(crate) fn resolution_error(error: &ResolutionError) -> StepError {
  let kind = match error {
    ResolutionError::PathNotFound { .. } => StepErrorKind::PathNotFound,
    ResolutionError::SourceSkipped { .. } => StepErrorKind::SourceSkipped,
    ResolutionError::Expression { .. } => StepErrorKind::ConditionError,
    ResolutionError::DependencyNotReady { .. } | ResolutionError::InvalidReference { .. } => {
      StepErrorKind::Internal
    }
  };
  StepError::new(kind, error.to_string())
}
