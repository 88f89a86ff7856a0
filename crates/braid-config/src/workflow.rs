use serde::{Deserialize, Serialize};

use crate::edge::EdgeDef;
use crate::step::StepDef;

/// A workflow definition as authored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDef {
  pub workflow_id: String,
  #[serde(default)]
  pub name: String,
  pub steps: Vec<StepDef>,
  #[serde(default)]
  pub edges: Vec<EdgeDef>,
}

impl WorkflowDef {
  pub fn new(workflow_id: impl Into<String>) -> Self {
    let workflow_id = workflow_id.into();
    Self {
      name: workflow_id.clone(),
      workflow_id,
      steps: Vec::new(),
      edges: Vec::new(),
    }
  }

  pub fn with_step(mut self, step: StepDef) -> Self {
    self.steps.push(step);
    self
  }

  pub fn with_edge(mut self, edge: EdgeDef) -> Self {
    self.edges.push(edge);
    self
  }

  /// Parse a definition from JSON.
  pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(json)
  }

  /// Get a step by ID.
  pub fn get_step(&self, step_id: &str) -> Option<&StepDef> {
    self.steps.iter().find(|s| s.step_id == step_id)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::param::ParamValue;

  #[test]
  fn test_parse_workflow_json() {
    let json = r#"{
      "workflow_id": "ticket-flow",
      "steps": [
        { "step_id": "fetch", "capability": "http", "parameters": { "url": "https://example.com" } },
        {
          "step_id": "notify",
          "capability": "email",
          "parameters": { "to": { "$ref": "fetch.body.owner" } },
          "timeout_ms": 5000,
          "continue_on_error": true
        }
      ],
      "edges": [ { "source": "fetch", "target": "notify" } ]
    }"#;

    let workflow = WorkflowDef::from_json(json).unwrap();
    assert_eq!(workflow.steps.len(), 2);
    assert_eq!(workflow.edges.len(), 1);
    assert_eq!(workflow.name, "");

    let notify = workflow.get_step("notify").unwrap();
    assert_eq!(notify.timeout_ms, Some(5000));
    assert!(notify.continue_on_error);
    assert!(matches!(
      notify.parameters.get("to"),
      Some(ParamValue::Reference(_))
    ));
    assert!(matches!(
      workflow.get_step("fetch").unwrap().parameters.get("url"),
      Some(ParamValue::Literal(_))
    ));
  }
}
