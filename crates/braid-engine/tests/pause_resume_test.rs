mod common;

use std::collections::BTreeSet;

use braid_config::{EdgeDef, ParamValue, StepDef, WorkflowDef};
use braid_engine::{EngineConfig, EngineError, ExecutionEvent};
use braid_resolver::ValidationError;
use braid_store::{ExecutionStatus, StateStore, StepStatus};
use common::{Recorder, drain, engine, engine_with_events};
use serde_json::json;

fn approval_workflow() -> WorkflowDef {
  WorkflowDef::new("approval")
    .with_step(StepDef::new("draft", "record").with_parameter("text", json!("release notes")))
    .with_step(
      StepDef::new("approve", "await_input")
        .with_parameter("keys", json!(["approved", "reviewer"]))
        .with_parameter(
          "schema",
          json!({
            "type": "object",
            "properties": {
              "approved": { "type": "boolean" },
              "reviewer": { "type": "string" }
            }
          }),
        ),
    )
    .with_step(
      StepDef::new("publish", "record")
        .with_parameter("approved", ParamValue::reference("approve.approved").unwrap())
        .with_parameter("by", ParamValue::reference("approve.reviewer").unwrap())
        .with_parameter("text", ParamValue::reference("draft.text").unwrap()),
    )
    .with_edge(EdgeDef::new("draft", "approve"))
    .with_edge(EdgeDef::new("approve", "publish"))
}

fn keys(items: &[&str]) -> BTreeSet<String> {
  items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_pause_persists_pending_keys() {
  let recorder = Recorder::default();
  let (engine, store, mut events) = engine_with_events(&recorder, EngineConfig::default());

  let state = engine.run(approval_workflow()).await.unwrap();

  assert_eq!(state.status, ExecutionStatus::PausedAwaitingInput);
  assert_eq!(state.pending_input_keys, keys(&["approved", "reviewer"]));
  assert_eq!(state.step("approve").unwrap().status, StepStatus::Running);
  assert_eq!(state.step("publish").unwrap().status, StepStatus::Pending);
  assert!(!recorder.started("publish"));

  let persisted = store.load(&state.execution_id).await.unwrap();
  assert_eq!(persisted.status, ExecutionStatus::PausedAwaitingInput);
  assert_eq!(persisted.pending_input_keys, state.pending_input_keys);

  let seen = drain(&mut events);
  assert!(seen.iter().any(|e| matches!(
    e,
    ExecutionEvent::StepAwaitingInput { step_id, .. } if step_id == "approve"
  )));
  assert!(matches!(
    seen.last(),
    Some(ExecutionEvent::ExecutionPaused { pending_input_keys, .. })
      if *pending_input_keys == keys(&["approved", "reviewer"])
  ));
}

#[tokio::test]
async fn test_resume_completes_execution() {
  let recorder = Recorder::default();
  let (engine, _store) = engine(&recorder, EngineConfig::default());

  let paused = engine.run(approval_workflow()).await.unwrap();
  engine
    .resume(&paused.execution_id, json!({ "approved": true, "reviewer": "dana" }))
    .await
    .unwrap();
  let state = engine.wait(&paused.execution_id).await.unwrap();

  assert_eq!(state.status, ExecutionStatus::Completed);
  assert!(state.pending_input_keys.is_empty());
  assert!(state.pending_inputs.is_empty());
  assert_eq!(
    state.variables["approve"],
    json!({ "approved": true, "reviewer": "dana" })
  );
  assert_eq!(
    state.variables["publish"],
    json!({ "approved": true, "by": "dana", "text": "release notes" })
  );
  // Completed steps never run twice.
  assert_eq!(recorder.start_count("draft"), 1);
}

#[tokio::test]
async fn test_resume_rejects_invalid_inputs() {
  let recorder = Recorder::default();
  let (engine, _store) = engine(&recorder, EngineConfig::default());
  let paused = engine.run(approval_workflow()).await.unwrap();
  let id = paused.execution_id.as_str();

  let wrong_type = engine
    .resume(id, json!({ "approved": "yes", "reviewer": "dana" }))
    .await
    .unwrap_err();
  assert!(matches!(
    wrong_type,
    EngineError::InvalidInput(ValidationError::SchemaViolation { ref field, .. }) if field == "approved"
  ));

  let missing = engine.resume(id, json!({ "approved": true })).await.unwrap_err();
  assert!(matches!(
    missing,
    EngineError::InvalidInput(ValidationError::SchemaViolation { ref field, .. }) if field == "reviewer"
  ));

  assert!(matches!(
    engine.resume(id, json!(["approved"])).await,
    Err(EngineError::InvalidInput(_))
  ));

  // Nothing changed; a valid resume still works.
  let state = engine.get_state(id).await.unwrap();
  assert_eq!(state.status, ExecutionStatus::PausedAwaitingInput);
  assert_eq!(state.pending_input_keys, keys(&["approved", "reviewer"]));

  engine
    .resume(id, json!({ "approved": false, "reviewer": "lee", "extra": 1 }))
    .await
    .unwrap();
  let state = engine.wait(id).await.unwrap();
  assert_eq!(state.status, ExecutionStatus::Completed);
  // Only requested keys land in the step output.
  assert_eq!(
    state.variables["approve"],
    json!({ "approved": false, "reviewer": "lee" })
  );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_pauses_union_keys() {
  let recorder = Recorder::default();
  let (engine, _store) = engine(&recorder, EngineConfig::default());

  let workflow = WorkflowDef::new("two-approvals")
    .with_step(StepDef::new("start", "noop"))
    .with_step(StepDef::new("legal", "await_input").with_parameter("keys", json!(["legal_ok"])))
    .with_step(StepDef::new("security", "await_input").with_parameter("keys", json!(["security_ok"])))
    .with_step(StepDef::new("ship", "record"))
    .with_step(StepDef::new("slow_side", "record").with_parameter("delay_ms", json!(50)))
    .with_edge(EdgeDef::new("start", "legal"))
    .with_edge(EdgeDef::new("start", "security"))
    .with_edge(EdgeDef::new("start", "slow_side"))
    .with_edge(EdgeDef::new("legal", "ship"))
    .with_edge(EdgeDef::new("security", "ship"));

  let paused = engine.run(workflow).await.unwrap();
  assert_eq!(paused.status, ExecutionStatus::PausedAwaitingInput);
  assert_eq!(paused.pending_input_keys, keys(&["legal_ok", "security_ok"]));
  // In-flight work drains before the loop stops.
  assert_eq!(paused.step("slow_side").unwrap().status, StepStatus::Completed);

  let id = paused.execution_id.as_str();
  assert!(matches!(
    engine.resume(id, json!({ "legal_ok": true })).await,
    Err(EngineError::InvalidInput(_))
  ));

  engine
    .resume(id, json!({ "legal_ok": true, "security_ok": true }))
    .await
    .unwrap();
  let state = engine.wait(id).await.unwrap();
  assert_eq!(state.status, ExecutionStatus::Completed);
  assert_eq!(state.variables["legal"], json!({ "legal_ok": true }));
  assert_eq!(state.variables["security"], json!({ "security_ok": true }));
  assert!(recorder.started("ship"));
}

#[tokio::test]
async fn test_cancel_paused_execution() {
  let recorder = Recorder::default();
  let (engine, _store) = engine(&recorder, EngineConfig::default());

  let paused = engine.run(approval_workflow()).await.unwrap();
  engine.cancel(&paused.execution_id).await.unwrap();

  let state = engine.get_state(&paused.execution_id).await.unwrap();
  assert_eq!(state.status, ExecutionStatus::Cancelled);
  assert!(state.pending_input_keys.is_empty());
  assert_eq!(state.step("draft").unwrap().status, StepStatus::Completed);
  assert_eq!(state.step("approve").unwrap().status, StepStatus::Cancelled);
  assert_eq!(state.step("publish").unwrap().status, StepStatus::Cancelled);

  assert!(matches!(
    engine.resume(&paused.execution_id, json!({ "approved": true, "reviewer": "x" })).await,
    Err(EngineError::NotPaused { status: ExecutionStatus::Cancelled, .. })
  ));
}

#[tokio::test]
async fn test_resume_requires_paused_execution() {
  let recorder = Recorder::default();
  let (engine, _store) = engine(&recorder, EngineConfig::default());

  let done = engine
    .run(WorkflowDef::new("plain").with_step(StepDef::new("a", "noop")))
    .await
    .unwrap();
  assert!(matches!(
    engine.resume(&done.execution_id, json!({})).await,
    Err(EngineError::NotPaused { status: ExecutionStatus::Completed, .. })
  ));

  assert!(matches!(
    engine.resume("unknown", json!({})).await,
    Err(EngineError::NotAttached { .. })
  ));
}

#[tokio::test]
async fn test_resume_after_restart_needs_attach() {
  let recorder = Recorder::default();
  let (engine, store) = engine(&recorder, EngineConfig::default());
  let paused = engine.run(approval_workflow()).await.unwrap();

  // A second engine over the same store stands in for a restarted process.
  let restarted = braid_engine::Engine::builder(store.clone())
    .registry(common::registry(&recorder))
    .build()
    .unwrap();
  let id = paused.execution_id.as_str();
  assert!(matches!(
    restarted.resume(id, json!({ "approved": true, "reviewer": "kim" })).await,
    Err(EngineError::NotAttached { .. })
  ));

  restarted.attach(approval_workflow(), id).await.unwrap();
  restarted
    .resume(id, json!({ "approved": true, "reviewer": "kim" }))
    .await
    .unwrap();
  let state = restarted.wait(id).await.unwrap();
  assert_eq!(state.status, ExecutionStatus::Completed);
  assert_eq!(state.variables["publish"]["by"], json!("kim"));
}

#[tokio::test]
async fn test_resume_reruns_steps_interrupted_while_draining() {
  let recorder = Recorder::default();
  let (engine, store) = engine(&recorder, EngineConfig::default());

  let workflow = || {
    WorkflowDef::new("drain")
      .with_step(StepDef::new("start", "noop"))
      .with_step(StepDef::new("ask", "await_input").with_parameter("keys", json!(["ok"])))
      .with_step(StepDef::new("side", "record").with_parameter("n", json!(7)))
      .with_step(StepDef::new("after", "record"))
      .with_edge(EdgeDef::new("start", "ask"))
      .with_edge(EdgeDef::new("start", "side"))
      .with_edge(EdgeDef::new("ask", "after"))
      .with_edge(EdgeDef::new("side", "after"))
  };

  let paused = engine.run(workflow()).await.unwrap();
  assert_eq!(paused.status, ExecutionStatus::PausedAwaitingInput);
  let id = paused.execution_id.as_str();

  // The process died while `side` was still running.
  let mut crashed = store.load(id).await.unwrap();
  let side = crashed.step_mut("side").unwrap();
  side.status = StepStatus::Running;
  side.output = None;
  side.completed_at = None;
  crashed.variables.remove("side");
  store.save(&crashed).await.unwrap();

  let restarted = braid_engine::Engine::builder(store.clone())
    .registry(common::registry(&recorder))
    .build()
    .unwrap();
  restarted.attach(workflow(), id).await.unwrap();
  restarted.resume(id, json!({ "ok": true })).await.unwrap();
  let state = restarted.wait(id).await.unwrap();

  assert_eq!(state.status, ExecutionStatus::Completed);
  assert_eq!(state.step("side").unwrap().status, StepStatus::Completed);
  assert_eq!(state.variables["side"], json!({ "n": 7 }));
  assert_eq!(state.variables["ask"], json!({ "ok": true }));
  assert_eq!(recorder.start_count("side"), 2);
  assert!(recorder.started("after"));
}
