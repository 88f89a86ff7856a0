#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use braid_engine::{
  ChannelNotifier, Engine, EngineConfig, ExecutionEvent, ExecutorError, ExecutorRegistry,
  StepContext, StepExecutor, StepOutcome,
};
use braid_store::MemoryStore;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
  Start(String),
  End(String),
}

#[derive(Default)]
struct RecorderInner {
  log: Mutex<Vec<Entry>>,
  active: AtomicUsize,
  max_active: AtomicUsize,
}

/// Records start/end of every call and the peak number of concurrent calls.
/// Sleeps for the `delay_ms` parameter, then completes with its parameters.
#[derive(Clone, Default)]
pub struct Recorder {
  inner: Arc<RecorderInner>,
}

impl Recorder {
  pub fn entries(&self) -> Vec<Entry> {
    self.inner.log.lock().unwrap().clone()
  }

  pub fn position(&self, entry: Entry) -> usize {
    self
      .entries()
      .iter()
      .position(|e| *e == entry)
      .unwrap_or_else(|| panic!("missing {:?}", entry))
  }

  pub fn started(&self, step_id: &str) -> bool {
    self.entries().contains(&Entry::Start(step_id.to_string()))
  }

  pub fn start_count(&self, step_id: &str) -> usize {
    self
      .entries()
      .iter()
      .filter(|e| **e == Entry::Start(step_id.to_string()))
      .count()
  }

  pub fn max_active(&self) -> usize {
    self.inner.max_active.load(Ordering::SeqCst)
  }

  fn push(&self, entry: Entry) {
    self.inner.log.lock().unwrap().push(entry);
  }
}

#[async_trait]
impl StepExecutor for Recorder {
  async fn execute(&self, ctx: StepContext) -> Result<StepOutcome, ExecutorError> {
    self.push(Entry::Start(ctx.step_id.clone()));
    let now = self.inner.active.fetch_add(1, Ordering::SeqCst) + 1;
    self.inner.max_active.fetch_max(now, Ordering::SeqCst);

    let delay = ctx.parameter("delay_ms").and_then(Value::as_u64).unwrap_or(0);
    if delay > 0 {
      tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    self.inner.active.fetch_sub(1, Ordering::SeqCst);
    self.push(Entry::End(ctx.step_id.clone()));
    Ok(StepOutcome::Completed(ctx.parameters))
  }
}

/// Never finishes on its own; returns only when cancelled.
pub struct Blocker;

#[async_trait]
impl StepExecutor for Blocker {
  async fn execute(&self, ctx: StepContext) -> Result<StepOutcome, ExecutorError> {
    ctx.cancel.cancelled().await;
    Err(ExecutorError::Cancelled)
  }
}

pub struct Panics;

#[async_trait]
impl StepExecutor for Panics {
  async fn execute(&self, _ctx: StepContext) -> Result<StepOutcome, ExecutorError> {
    panic!("executor exploded")
  }
}

pub fn registry(recorder: &Recorder) -> ExecutorRegistry {
  ExecutorRegistry::with_builtins()
    .with("record", recorder.clone())
    .with("block", Blocker)
    .with("panic", Panics)
}

pub fn engine(recorder: &Recorder, config: EngineConfig) -> (Engine, Arc<MemoryStore>) {
  let store = Arc::new(MemoryStore::new());
  let engine = Engine::builder(store.clone())
    .config(config)
    .registry(registry(recorder))
    .build()
    .unwrap();
  (engine, store)
}

pub fn engine_with_events(
  recorder: &Recorder,
  config: EngineConfig,
) -> (Engine, Arc<MemoryStore>, UnboundedReceiver<ExecutionEvent>) {
  let store = Arc::new(MemoryStore::new());
  let (notifier, events) = ChannelNotifier::channel();
  let engine = Engine::builder(store.clone())
    .config(config)
    .registry(registry(recorder))
    .notifier(notifier)
    .build()
    .unwrap();
  (engine, store, events)
}

/// Receive events until one matches, returning everything seen.
pub async fn recv_until(
  events: &mut UnboundedReceiver<ExecutionEvent>,
  mut done: impl FnMut(&ExecutionEvent) -> bool,
) -> Vec<ExecutionEvent> {
  let mut seen = Vec::new();
  loop {
    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
      .await
      .expect("timed out waiting for event")
      .expect("event channel closed");
    let stop = done(&event);
    seen.push(event);
    if stop {
      return seen;
    }
  }
}

pub fn drain(events: &mut UnboundedReceiver<ExecutionEvent>) -> Vec<ExecutionEvent> {
  let mut seen = Vec::new();
  while let Ok(event) = events.try_recv() {
    seen.push(event);
  }
  seen
}
