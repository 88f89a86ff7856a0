//! Step executors.
//!
//! A step's `capability` is a symbolic name looked up in an
//! [`ExecutorRegistry`] handed to the engine at construction. The engine only
//! knows the [`StepExecutor`] trait, never a concrete capability.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Everything an executor gets to see about the step it runs.
#[derive(Debug, Clone)]
pub struct StepContext {
  pub execution_id: String,
  pub workflow_id: String,
  pub step_id: String,
  pub capability: String,
  /// Resolved parameters, always a JSON object.
  pub parameters: Value,
  /// 1 for the first attempt.
  pub attempt: u32,
  /// Time the engine allows this attempt.
  pub timeout: Option<Duration>,
  /// Cancelled when the execution is cancelled or the attempt times out.
  pub cancel: CancellationToken,
}

impl StepContext {
  /// Get a parameter by name.
  pub fn parameter(&self, name: &str) -> Option<&Value> {
    self.parameters.get(name)
  }
}

/// What a successful executor call produced.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
  /// The step finished with this output.
  Completed(Value),
  /// The step needs input the graph cannot supply. The execution pauses
  /// until `resume` provides every key.
  AwaitInput {
    keys: BTreeSet<String>,
    schema: Option<Value>,
  },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutorError {
  /// The underlying capability failed.
  #[error("{message}")]
  Failed { message: String },

  /// Parameters were structurally valid but unusable by this capability.
  #[error("invalid parameters: {message}")]
  InvalidParameters { message: String },

  /// The executor stopped because its cancellation token fired.
  #[error("executor cancelled")]
  Cancelled,
}

impl ExecutorError {
  pub fn failed(message: impl Into<String>) -> Self {
    ExecutorError::Failed {
      message: message.into(),
    }
  }
}

/// A callable capability.
#[async_trait]
pub trait StepExecutor: Send + Sync {
  async fn execute(&self, ctx: StepContext) -> Result<StepOutcome, ExecutorError>;
}

/// Maps capability names to executors.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
  executors: HashMap<String, Arc<dyn StepExecutor>>,
}

impl ExecutorRegistry {
  /// An empty registry.
  pub fn new() -> Self {
    Self::default()
  }

  /// A registry holding the built-in capabilities.
  pub fn with_builtins() -> Self {
    let mut registry = Self::new();
    crate::builtin::register_builtins(&mut registry);
    registry
  }

  pub fn register(&mut self, capability: impl Into<String>, executor: impl StepExecutor + 'static) {
    self.executors.insert(capability.into(), Arc::new(executor));
  }

  pub fn with(mut self, capability: impl Into<String>, executor: impl StepExecutor + 'static) -> Self {
    self.register(capability, executor);
    self
  }

  pub fn get(&self, capability: &str) -> Option<Arc<dyn StepExecutor>> {
    self.executors.get(capability).cloned()
  }

  pub fn contains(&self, capability: &str) -> bool {
    self.executors.contains_key(capability)
  }

  /// Registered capability names, sorted.
  pub fn capabilities(&self) -> Vec<&str> {
    let mut names: Vec<&str> = self.executors.keys().map(String::as_str).collect();
    names.sort_unstable();
    names
  }
}

impl std::fmt::Debug for ExecutorRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ExecutorRegistry")
      .field("capabilities", &self.capabilities())
      .finish()
  }
}
