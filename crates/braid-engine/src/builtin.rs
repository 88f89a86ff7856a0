//! Built-in capabilities.
//!
//! | capability    | behavior                                                   |
//! |---------------|------------------------------------------------------------|
//! | `noop`        | completes with `{}`                                        |
//! | `echo`        | completes with its resolved parameters                     |
//! | `sleep`       | waits `duration_ms`, honoring cancellation                 |
//! | `await_input` | pauses for the keys in `keys`, optionally typed by `schema` |
//! | `fail`        | fails with `message`                                       |

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::executor::{ExecutorError, ExecutorRegistry, StepContext, StepExecutor, StepOutcome};

pub(crate) fn register_builtins(registry: &mut ExecutorRegistry) {
  registry.register("noop", NoopExecutor);
  registry.register("echo", EchoExecutor);
  registry.register("sleep", SleepExecutor);
  registry.register("await_input", AwaitInputExecutor);
  registry.register("fail", FailExecutor);
}

#[derive(Debug, Clone, Default)]
pub struct NoopExecutor;

#[async_trait]
impl StepExecutor for NoopExecutor {
  async fn execute(&self, _ctx: StepContext) -> Result<StepOutcome, ExecutorError> {
    Ok(StepOutcome::Completed(json!({})))
  }
}

#[derive(Debug, Clone, Default)]
pub struct EchoExecutor;

#[async_trait]
impl StepExecutor for EchoExecutor {
  async fn execute(&self, ctx: StepContext) -> Result<StepOutcome, ExecutorError> {
    Ok(StepOutcome::Completed(ctx.parameters))
  }
}

#[derive(Debug, Clone, Default)]
pub struct SleepExecutor;

#[async_trait]
impl StepExecutor for SleepExecutor {
  async fn execute(&self, ctx: StepContext) -> Result<StepOutcome, ExecutorError> {
    let ms = ctx
      .parameter("duration_ms")
      .and_then(Value::as_u64)
      .ok_or_else(|| ExecutorError::InvalidParameters {
        message: "'duration_ms' must be a non-negative integer".to_string(),
      })?;

    tokio::select! {
      _ = tokio::time::sleep(Duration::from_millis(ms)) => {
        Ok(StepOutcome::Completed(json!({ "slept_ms": ms })))
      }
      _ = ctx.cancel.cancelled() => Err(ExecutorError::Cancelled),
    }
  }
}

#[derive(Debug, Clone, Default)]
pub struct AwaitInputExecutor;

#[async_trait]
impl StepExecutor for AwaitInputExecutor {
  async fn execute(&self, ctx: StepContext) -> Result<StepOutcome, ExecutorError> {
    let keys: BTreeSet<String> = ctx
      .parameter("keys")
      .and_then(Value::as_array)
      .map(|items| {
        items
          .iter()
          .filter_map(|k| k.as_str().map(str::to_string))
          .collect()
      })
      .unwrap_or_default();

    if keys.is_empty() {
      return Err(ExecutorError::InvalidParameters {
        message: "'keys' must be a non-empty array of strings".to_string(),
      });
    }

    Ok(StepOutcome::AwaitInput {
      keys,
      schema: ctx.parameter("schema").cloned(),
    })
  }
}

#[derive(Debug, Clone, Default)]
pub struct FailExecutor;

#[async_trait]
impl StepExecutor for FailExecutor {
  async fn execute(&self, ctx: StepContext) -> Result<StepOutcome, ExecutorError> {
    let message = ctx
      .parameter("message")
      .and_then(Value::as_str)
      .unwrap_or("step failed");
    Err(ExecutorError::failed(message))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tokio_util::sync::CancellationToken;

  fn ctx(parameters: Value) -> StepContext {
    StepContext {
      execution_id: "e".to_string(),
      workflow_id: "w".to_string(),
      step_id: "s".to_string(),
      capability: "test".to_string(),
      parameters,
      attempt: 1,
      timeout: None,
      cancel: CancellationToken::new(),
    }
  }

  #[tokio::test]
  async fn test_registry_builtins() {
    let registry = ExecutorRegistry::with_builtins();
    assert_eq!(
      registry.capabilities(),
      vec!["await_input", "echo", "fail", "noop", "sleep"]
    );
  }

  #[tokio::test]
  async fn test_echo_returns_parameters() {
    let outcome = EchoExecutor.execute(ctx(json!({ "a": 1 }))).await.unwrap();
    assert_eq!(outcome, StepOutcome::Completed(json!({ "a": 1 })));
  }

  #[tokio::test]
  async fn test_await_input_requires_keys() {
    assert!(matches!(
      AwaitInputExecutor.execute(ctx(json!({}))).await,
      Err(ExecutorError::InvalidParameters { .. })
    ));

    let outcome = AwaitInputExecutor
      .execute(ctx(json!({ "keys": ["approved", "note"] })))
      .await
      .unwrap();
    assert!(matches!(outcome, StepOutcome::AwaitInput { keys, schema: None } if keys.len() == 2));
  }

  #[tokio::test]
  async fn test_fail_uses_message() {
    let err = FailExecutor
      .execute(ctx(json!({ "message": "boom" })))
      .await
      .unwrap_err();
    assert_eq!(err.to_string(), "boom");
  }

  #[tokio::test]
  async fn test_sleep_honors_cancellation() {
    let context = ctx(json!({ "duration_ms": 60_000 }));
    context.cancel.cancel();
    assert_eq!(
      SleepExecutor.execute(context).await,
      Err(ExecutorError::Cancelled)
    );
  }
}
