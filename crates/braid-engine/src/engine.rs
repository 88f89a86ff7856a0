//! The engine: entry points for starting and controlling executions.

use std::collections::HashMap;
use std::sync::Arc;

use braid_config::WorkflowDef;
use braid_resolver::{ValidationError, validate_parameters};
use braid_store::{ExecutionState, ExecutionStatus, StateStore, StepStatus};
use braid_workflow::{CompiledWorkflow, compile};
use serde_json::{Map, Value, json};
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::{ExecutionEvent, ExecutionNotifier, NoopNotifier, publish};
use crate::executor::ExecutorRegistry;
use crate::governance::{AllowAll, GovernanceCheck};
use crate::scheduler::{Scheduler, cancel_unfinished};

/// Collaborators shared by the engine and its execution loops.
pub(crate) struct Shared {
  pub config: EngineConfig,
  pub registry: ExecutorRegistry,
  pub store: Arc<dyn StateStore>,
  pub notifier: Arc<dyn ExecutionNotifier>,
  pub governance: Arc<dyn GovernanceCheck>,
}

impl Shared {
  pub fn publish(&self, event: ExecutionEvent) {
    publish(self.notifier.as_ref(), event);
  }
}

type LoopResult = Option<Result<ExecutionState, String>>;

/// Engine-side bookkeeping for one execution.
struct Run {
  workflow: Arc<CompiledWorkflow>,
  cancel: CancellationToken,
  /// Result of the latest loop. `None` when no loop was started by this
  /// engine (attached executions).
  done: Option<watch::Receiver<LoopResult>>,
}

impl Run {
  fn is_looping(&self) -> bool {
    self.done.as_ref().is_some_and(|done| done.borrow().is_none())
  }
}

/// Builder for [`Engine`].
pub struct EngineBuilder {
  config: EngineConfig,
  registry: ExecutorRegistry,
  store: Arc<dyn StateStore>,
  notifier: Arc<dyn ExecutionNotifier>,
  governance: Arc<dyn GovernanceCheck>,
}

impl EngineBuilder {
  pub fn config(mut self, config: EngineConfig) -> Self {
    self.config = config;
    self
  }

  pub fn registry(mut self, registry: ExecutorRegistry) -> Self {
    self.registry = registry;
    self
  }

  pub fn notifier(mut self, notifier: impl ExecutionNotifier + 'static) -> Self {
    self.notifier = Arc::new(notifier);
    self
  }

  pub fn governance(mut self, governance: impl GovernanceCheck + 'static) -> Self {
    self.governance = Arc::new(governance);
    self
  }

  pub fn build(self) -> Result<Engine, EngineError> {
    self.config.validate()?;
    Ok(Engine {
      shared: Arc::new(Shared {
        config: self.config,
        registry: self.registry,
        store: self.store,
        notifier: self.notifier,
        governance: self.governance,
      }),
      runs: Mutex::new(HashMap::new()),
      control: Mutex::new(()),
    })
  }
}

/// The workflow execution engine.
///
/// Every execution is driven by its own loop on the tokio runtime.
/// `start` returns as soon as the execution is persisted; use `wait` to
/// await the outcome, or `get_state` to read the latest snapshot.
pub struct Engine {
  shared: Arc<Shared>,
  runs: Mutex<HashMap<String, Run>>,
  /// Serializes resume, cancel and recover.
  control: Mutex<()>,
}

impl Engine {
  /// Start building an engine around a state store.
  ///
  /// Defaults: [`EngineConfig::default`], the built-in executors, no
  /// notifications, and no governance restrictions.
  pub fn builder(store: Arc<dyn StateStore>) -> EngineBuilder {
    EngineBuilder {
      config: EngineConfig::default(),
      registry: ExecutorRegistry::with_builtins(),
      store,
      notifier: Arc::new(NoopNotifier),
      governance: Arc::new(AllowAll),
    }
  }

  pub fn config(&self) -> &EngineConfig {
    &self.shared.config
  }

  pub fn registry(&self) -> &ExecutorRegistry {
    &self.shared.registry
  }

  /// Compile a definition and start executing it.
  ///
  /// An invalid definition is rejected before any state is created.
  #[instrument(skip(self, definition), fields(workflow_id = %definition.workflow_id))]
  pub async fn start(&self, definition: WorkflowDef) -> Result<String, EngineError> {
    let workflow = Arc::new(self.prepare(&definition)?);
    let execution_id = Uuid::new_v4().to_string();
    let state = ExecutionState::new(
      execution_id.clone(),
      workflow.workflow_id.clone(),
      workflow.step_ids().cloned(),
    );
    self.shared.store.save(&state).await?;
    info!(execution_id = %execution_id, "execution_created");

    let run = self.spawn_loop(workflow, state);
    self.runs.lock().await.insert(execution_id.clone(), run);
    Ok(execution_id)
  }

  /// Start an execution and wait for it to stop.
  pub async fn run(&self, definition: WorkflowDef) -> Result<ExecutionState, EngineError> {
    let execution_id = self.start(definition).await?;
    self.wait(&execution_id).await
  }

  /// Latest persisted snapshot of an execution.
  pub async fn get_state(&self, execution_id: &str) -> Result<ExecutionState, EngineError> {
    Ok(self.shared.store.load(execution_id).await?)
  }

  /// Wait until the current loop of an execution stops (terminal or paused)
  /// and return its state. Returns the stored state when no loop is active.
  pub async fn wait(&self, execution_id: &str) -> Result<ExecutionState, EngineError> {
    let done = {
      let runs = self.runs.lock().await;
      runs.get(execution_id).and_then(|run| run.done.clone())
    };
    let Some(mut done) = done else {
      return self.get_state(execution_id).await;
    };

    let result = done
      .wait_for(|result| result.is_some())
      .await
      .map(|result| (*result).clone())
      .map_err(|_| EngineError::Aborted {
        execution_id: execution_id.to_string(),
        message: "execution loop exited without a result".to_string(),
      })?;

    match result {
      Some(Ok(state)) => Ok(state),
      Some(Err(message)) => Err(EngineError::Aborted {
        execution_id: execution_id.to_string(),
        message,
      }),
      None => self.get_state(execution_id).await,
    }
  }

  /// Cancel an execution.
  ///
  /// In-flight steps are aborted and every unfinished step ends cancelled.
  /// Returns once the cancelled state is persisted.
  #[instrument(skip(self))]
  pub async fn cancel(&self, execution_id: &str) -> Result<(), EngineError> {
    let _control = self.control.lock().await;

    let token = {
      let runs = self.runs.lock().await;
      runs
        .get(execution_id)
        .filter(|run| run.is_looping())
        .map(|run| run.cancel.clone())
    };
    if let Some(token) = token {
      token.cancel();
      let state = self.wait(execution_id).await?;
      info!(status = %state.status, "execution_cancel_requested");
      return Ok(());
    }

    let mut state = self.get_state(execution_id).await?;
    if state.is_terminal() {
      return Err(EngineError::NotCancellable {
        execution_id: execution_id.to_string(),
        status: state.status,
      });
    }

    // No loop owns this execution (paused, or orphaned by a restart).
    let cancelled = cancel_unfinished(&mut state);
    state.touch();
    self.shared.store.save(&state).await?;
    warn!(cancelled_steps = cancelled.len(), "execution_cancelled");
    for step_id in cancelled {
      self.shared.publish(ExecutionEvent::StepCancelled {
        execution_id: execution_id.to_string(),
        step_id,
        reason: "execution cancelled".to_string(),
      });
    }
    self.shared.publish(ExecutionEvent::ExecutionCancelled {
      execution_id: execution_id.to_string(),
    });
    Ok(())
  }

  /// Supply the input a paused execution is waiting for and continue it.
  ///
  /// `inputs` must be a JSON object holding every pending key, each valid
  /// against the schema the requesting step declared. Each paused step
  /// completes with the keys it asked for as its output.
  #[instrument(skip(self, inputs))]
  pub async fn resume(&self, execution_id: &str, inputs: Value) -> Result<(), EngineError> {
    let _control = self.control.lock().await;

    let workflow = {
      let runs = self.runs.lock().await;
      let run = runs.get(execution_id).ok_or_else(|| EngineError::NotAttached {
        execution_id: execution_id.to_string(),
      })?;
      run.workflow.clone()
    };

    // Let a loop that is still draining in-flight steps finish first.
    self.wait(execution_id).await?;

    let mut state = self.get_state(execution_id).await?;
    if !state.is_paused() {
      return Err(EngineError::NotPaused {
        execution_id: execution_id.to_string(),
        status: state.status,
      });
    }

    let Value::Object(inputs) = inputs else {
      return Err(EngineError::InvalidInput(ValidationError::SchemaViolation {
        step_id: String::new(),
        field: String::new(),
        message: "inputs must be a JSON object".to_string(),
      }));
    };
    validate_inputs(&state, &inputs)?;

    // Siblings still draining when the process died have no outcome; run them again.
    let reset = reset_interrupted(&mut state);
    if !reset.is_empty() {
      info!(reset_steps = ?reset, "interrupted_steps_reset");
    }

    let pending = std::mem::take(&mut state.pending_inputs);
    state.clear_pending_inputs();
    for (step_id, input) in pending {
      let output: Map<String, Value> = input
        .keys
        .iter()
        .filter_map(|key| inputs.get(key).map(|v| (key.clone(), v.clone())))
        .collect();
      let output = Value::Object(output);
      let Some(step) = state.step_mut(&step_id) else {
        continue;
      };
      if step.status == StepStatus::Running && step.complete(output.clone()) {
        state.variables.insert(step_id.clone(), output.clone());
        self.shared.publish(ExecutionEvent::StepCompleted {
          execution_id: execution_id.to_string(),
          step_id,
          output,
        });
      }
    }

    state.status = ExecutionStatus::Running;
    state.touch();
    self.shared.store.save(&state).await?;
    info!("execution_resumed");
    self.shared.publish(ExecutionEvent::ExecutionResumed {
      execution_id: execution_id.to_string(),
    });

    let run = self.spawn_loop(workflow, state);
    self.runs.lock().await.insert(execution_id.to_string(), run);
    Ok(())
  }

  /// Associate a persisted execution with its workflow definition, without
  /// running it. Needed after a restart before `resume` or `cancel` of a
  /// paused execution can continue it.
  pub async fn attach(&self, definition: WorkflowDef, execution_id: &str) -> Result<(), EngineError> {
    let _control = self.control.lock().await;
    self.attach_locked(&definition, execution_id).await.map(|_| ())
  }

  /// Continue an execution whose process died mid-run.
  ///
  /// Steps that were running with no recorded outcome go back to pending
  /// and run again; completed steps are never re-run. Paused executions are
  /// attached and stay paused; terminal executions are left as they are.
  #[instrument(skip(self, definition))]
  pub async fn recover(&self, definition: WorkflowDef, execution_id: &str) -> Result<(), EngineError> {
    let _control = self.control.lock().await;
    let (workflow, mut state) = self.attach_locked(&definition, execution_id).await?;
    if state.is_terminal() {
      return Ok(());
    }

    let reset = reset_interrupted(&mut state);
    state.touch();
    self.shared.store.save(&state).await?;
    info!(reset_steps = ?reset, status = %state.status, "execution_recovered");

    if state.is_paused() {
      return Ok(());
    }
    let run = self.spawn_loop(workflow, state);
    self.runs.lock().await.insert(execution_id.to_string(), run);
    Ok(())
  }

  async fn attach_locked(
    &self,
    definition: &WorkflowDef,
    execution_id: &str,
  ) -> Result<(Arc<CompiledWorkflow>, ExecutionState), EngineError> {
    let workflow = Arc::new(self.prepare(definition)?);
    let state = self.get_state(execution_id).await?;
    if state.workflow_id != workflow.workflow_id {
      return Err(EngineError::WorkflowMismatch {
        execution_id: execution_id.to_string(),
        expected: workflow.workflow_id.clone(),
        actual: state.workflow_id,
      });
    }

    let mut runs = self.runs.lock().await;
    if runs.get(execution_id).is_some_and(Run::is_looping) {
      return Err(EngineError::AlreadyRunning {
        execution_id: execution_id.to_string(),
      });
    }
    runs.insert(
      execution_id.to_string(),
      Run {
        workflow: workflow.clone(),
        cancel: CancellationToken::new(),
        done: None,
      },
    );
    Ok((workflow, state))
  }

  /// Compile a definition and check that every capability is registered.
  fn prepare(&self, definition: &WorkflowDef) -> Result<CompiledWorkflow, EngineError> {
    let workflow = compile(definition)?;
    for step in workflow.steps().values() {
      if !self.shared.registry.contains(&step.capability) {
        return Err(EngineError::UnknownCapability {
          step_id: step.step_id.clone(),
          capability: step.capability.clone(),
        });
      }
    }
    Ok(workflow)
  }

  fn spawn_loop(&self, workflow: Arc<CompiledWorkflow>, state: ExecutionState) -> Run {
    let cancel = CancellationToken::new();
    let (done_tx, done_rx) = watch::channel(None);
    let execution_id = state.execution_id.clone();
    let scheduler = Scheduler::new(self.shared.clone(), workflow.clone(), state, cancel.clone());

    tokio::spawn(async move {
      let result = scheduler.run().await.map_err(|e| {
        error!(execution_id = %execution_id, error = %e, "execution_loop_failed");
        e.to_string()
      });
      done_tx.send_replace(Some(result));
    });

    Run {
      workflow,
      cancel,
      done: Some(done_rx),
    }
  }
}

/// Put steps that were running with no recorded outcome back to pending.
/// Steps waiting for input keep running.
fn reset_interrupted(state: &mut ExecutionState) -> Vec<String> {
  let mut reset = Vec::new();
  for step in state.step_states.values_mut() {
    if step.status == StepStatus::Running && !state.pending_inputs.contains_key(&step.step_id) {
      step.reset();
      reset.push(step.step_id.clone());
    }
  }
  reset
}

/// Check resume inputs against every pending request.
fn validate_inputs(state: &ExecutionState, inputs: &Map<String, Value>) -> Result<(), EngineError> {
  let supplied = Value::Object(inputs.clone());
  for (step_id, pending) in &state.pending_inputs {
    let mut schema = pending.schema.clone().unwrap_or_else(|| json!({}));
    if let Some(obj) = schema.as_object_mut() {
      obj.insert("required".to_string(), json!(pending.keys));
    }
    validate_parameters(step_id, &supplied, &schema)?;
  }
  Ok(())
}
