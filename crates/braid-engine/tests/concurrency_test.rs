mod common;

use braid_config::{EdgeDef, StepDef, WorkflowDef};
use braid_engine::EngineConfig;
use braid_store::ExecutionStatus;
use common::{Entry, Recorder, engine};
use serde_json::json;

fn independent_steps(count: usize, delay_ms: u64) -> WorkflowDef {
  (0..count).fold(WorkflowDef::new("fan"), |wf, i| {
    wf.with_step(StepDef::new(format!("s{i}"), "record").with_parameter("delay_ms", json!(delay_ms)))
  })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallelism_is_bounded() {
  let recorder = Recorder::default();
  let (engine, _store) = engine(&recorder, EngineConfig::default().with_max_parallel_steps(3));

  let state = engine.run(independent_steps(10, 30)).await.unwrap();

  assert_eq!(state.status, ExecutionStatus::Completed);
  assert_eq!(state.variables.len(), 10);
  assert!(recorder.max_active() <= 3, "max active was {}", recorder.max_active());
  assert!(recorder.max_active() >= 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_slot_runs_sequentially() {
  let recorder = Recorder::default();
  let (engine, _store) = engine(&recorder, EngineConfig::default().with_max_parallel_steps(1));

  let state = engine.run(independent_steps(5, 10)).await.unwrap();

  assert_eq!(state.status, ExecutionStatus::Completed);
  assert_eq!(recorder.max_active(), 1);
  // Strict alternation of start and end.
  let entries = recorder.entries();
  for pair in entries.chunks(2) {
    match pair {
      [Entry::Start(a), Entry::End(b)] => assert_eq!(a, b),
      other => panic!("unexpected interleaving: {:?}", other),
    }
  }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_steps_start_after_all_sources_finish() {
  let recorder = Recorder::default();
  let (engine, _store) = engine(&recorder, EngineConfig::default().with_max_parallel_steps(4));

  let edges = [
    ("ingest", "parse"),
    ("ingest", "audit"),
    ("parse", "enrich"),
    ("parse", "index"),
    ("audit", "index"),
    ("enrich", "publish"),
    ("index", "publish"),
    ("audit", "publish"),
  ];
  let delays = [
    ("ingest", 5),
    ("parse", 20),
    ("audit", 40),
    ("enrich", 10),
    ("index", 5),
    ("publish", 0),
  ];

  let mut workflow = WorkflowDef::new("pipeline");
  for (id, delay) in delays {
    workflow = workflow.with_step(StepDef::new(id, "record").with_parameter("delay_ms", json!(delay)));
  }
  for (source, target) in edges {
    workflow = workflow.with_edge(EdgeDef::new(source, target));
  }

  let state = engine.run(workflow).await.unwrap();
  assert_eq!(state.status, ExecutionStatus::Completed);

  for (source, target) in edges {
    let end = recorder.position(Entry::End(source.to_string()));
    let start = recorder.position(Entry::Start(target.to_string()));
    assert!(end < start, "{target} started before {source} finished");
  }
  for (id, _) in delays {
    assert_eq!(recorder.start_count(id), 1);
  }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_executions_are_isolated() {
  let recorder = Recorder::default();
  let (engine, _store) = engine(&recorder, EngineConfig::default());

  let first = engine
    .start(WorkflowDef::new("one").with_step(StepDef::new("a", "record").with_parameter("n", json!(1))))
    .await
    .unwrap();
  let second = engine
    .start(WorkflowDef::new("two").with_step(StepDef::new("a", "record").with_parameter("n", json!(2))))
    .await
    .unwrap();
  assert_ne!(first, second);

  let first = engine.wait(&first).await.unwrap();
  let second = engine.wait(&second).await.unwrap();
  assert_eq!(first.variables["a"], json!({ "n": 1 }));
  assert_eq!(second.variables["a"], json!({ "n": 2 }));
  assert_eq!(first.workflow_id, "one");
  assert_eq!(second.workflow_id, "two");
}

#[tokio::test]
async fn test_engine_rejects_parallelism_beyond_semaphore_limit() {
  let store = std::sync::Arc::new(braid_store::MemoryStore::new());
  let result = braid_engine::Engine::builder(store)
    .config(EngineConfig::default().with_max_parallel_steps(usize::MAX))
    .build();
  assert!(matches!(
    result,
    Err(braid_engine::EngineError::Config(braid_engine::ConfigError::InvalidMaxParallel))
  ));
}
