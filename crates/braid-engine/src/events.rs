//! Execution events and notifiers for observability.
//!
//! Events are emitted as an execution progresses so consumers can stream
//! them to UIs, write audit logs, drive a debugger, etc. The engine never
//! depends on a subscriber: a failed publish is logged and dropped.

use std::collections::BTreeSet;
use std::sync::Arc;

use braid_store::StepError;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

/// Events emitted during execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
  ExecutionStarted {
    execution_id: String,
    workflow_id: String,
  },

  StepStarted {
    execution_id: String,
    step_id: String,
  },

  StepCompleted {
    execution_id: String,
    step_id: String,
    output: serde_json::Value,
  },

  StepFailed {
    execution_id: String,
    step_id: String,
    error: StepError,
  },

  StepSkipped {
    execution_id: String,
    step_id: String,
    reason: String,
  },

  StepCancelled {
    execution_id: String,
    step_id: String,
    reason: String,
  },

  /// A step asked for input the graph cannot provide.
  StepAwaitingInput {
    execution_id: String,
    step_id: String,
    keys: BTreeSet<String>,
  },

  ExecutionPaused {
    execution_id: String,
    pending_input_keys: BTreeSet<String>,
  },

  ExecutionResumed { execution_id: String },

  ExecutionCompleted { execution_id: String },

  ExecutionFailed { execution_id: String, error: String },

  ExecutionCancelled { execution_id: String },
}

impl ExecutionEvent {
  pub fn execution_id(&self) -> &str {
    match self {
      ExecutionEvent::ExecutionStarted { execution_id, .. }
      | ExecutionEvent::StepStarted { execution_id, .. }
      | ExecutionEvent::StepCompleted { execution_id, .. }
      | ExecutionEvent::StepFailed { execution_id, .. }
      | ExecutionEvent::StepSkipped { execution_id, .. }
      | ExecutionEvent::StepCancelled { execution_id, .. }
      | ExecutionEvent::StepAwaitingInput { execution_id, .. }
      | ExecutionEvent::ExecutionPaused { execution_id, .. }
      | ExecutionEvent::ExecutionResumed { execution_id }
      | ExecutionEvent::ExecutionCompleted { execution_id }
      | ExecutionEvent::ExecutionFailed { execution_id, .. }
      | ExecutionEvent::ExecutionCancelled { execution_id } => execution_id,
    }
  }

  /// The step this event is about, if any.
  pub fn step_id(&self) -> Option<&str> {
    match self {
      ExecutionEvent::StepStarted { step_id, .. }
      | ExecutionEvent::StepCompleted { step_id, .. }
      | ExecutionEvent::StepFailed { step_id, .. }
      | ExecutionEvent::StepSkipped { step_id, .. }
      | ExecutionEvent::StepCancelled { step_id, .. }
      | ExecutionEvent::StepAwaitingInput { step_id, .. } => Some(step_id),
      _ => None,
    }
  }

  /// Snake-case event name, as used in logs.
  pub fn name(&self) -> &'static str {
    match self {
      ExecutionEvent::ExecutionStarted { .. } => "execution_started",
      ExecutionEvent::StepStarted { .. } => "step_started",
      ExecutionEvent::StepCompleted { .. } => "step_completed",
      ExecutionEvent::StepFailed { .. } => "step_failed",
      ExecutionEvent::StepSkipped { .. } => "step_skipped",
      ExecutionEvent::StepCancelled { .. } => "step_cancelled",
      ExecutionEvent::StepAwaitingInput { .. } => "step_awaiting_input",
      ExecutionEvent::ExecutionPaused { .. } => "execution_paused",
      ExecutionEvent::ExecutionResumed { .. } => "execution_resumed",
      ExecutionEvent::ExecutionCompleted { .. } => "execution_completed",
      ExecutionEvent::ExecutionFailed { .. } => "execution_failed",
      ExecutionEvent::ExecutionCancelled { .. } => "execution_cancelled",
    }
  }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
  /// The receiving side has gone away.
  #[error("notifier channel closed")]
  Closed,

  #[error("notifier transport error: {0}")]
  Transport(String),
}

/// Trait for receiving execution events.
///
/// The engine calls `notify` for each event, in order per execution.
/// Implementations decide what to do with them and must not block.
pub trait ExecutionNotifier: Send + Sync {
  fn notify(&self, event: ExecutionEvent) -> Result<(), NotifyError>;
}

/// A no-op notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: ExecutionEvent) -> Result<(), NotifyError> {
    Ok(())
  }
}

/// A notifier that sends events to an unbounded channel.
///
/// Event volume is a handful per step, so the channel is unbounded to keep a
/// slow consumer from stalling the execution loop.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }

  /// Create a notifier together with its receiving end.
  pub fn channel() -> (Self, mpsc::UnboundedReceiver<ExecutionEvent>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (Self::new(sender), receiver)
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) -> Result<(), NotifyError> {
    self.sender.send(event).map_err(|_| NotifyError::Closed)
  }
}

/// Delivers every event to several notifiers.
///
/// All notifiers are tried; the first error is returned.
#[derive(Clone, Default)]
pub struct FanoutNotifier {
  notifiers: Vec<Arc<dyn ExecutionNotifier>>,
}

impl FanoutNotifier {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with(mut self, notifier: impl ExecutionNotifier + 'static) -> Self {
    self.notifiers.push(Arc::new(notifier));
    self
  }
}

impl ExecutionNotifier for FanoutNotifier {
  fn notify(&self, event: ExecutionEvent) -> Result<(), NotifyError> {
    let mut first_error = None;
    for notifier in &self.notifiers {
      if let Err(e) = notifier.notify(event.clone()) {
        first_error.get_or_insert(e);
      }
    }
    first_error.map_or(Ok(()), Err)
  }
}

/// Publish an event, logging and dropping delivery failures.
pub(crate) fn publish(notifier: &dyn ExecutionNotifier, event: ExecutionEvent) {
  let name = event.name();
  let execution_id = event.execution_id().to_string();
  if let Err(e) = notifier.notify(event) {
    warn!(
      execution_id = %execution_id,
      event = name,
      error = %e,
      "notify_failed"
    );
  }
}
