use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

/// The view of an execution that resolution reads from.
///
/// `variables` holds the outputs of completed steps; `skipped` names steps
/// that finished without running.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scope {
  variables: BTreeMap<String, Value>,
  skipped: BTreeSet<String>,
}

impl Scope {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_output(mut self, step_id: impl Into<String>, output: Value) -> Self {
    self.insert_output(step_id, output);
    self
  }

  pub fn with_skipped(mut self, step_id: impl Into<String>) -> Self {
    self.mark_skipped(step_id);
    self
  }

  pub fn insert_output(&mut self, step_id: impl Into<String>, output: Value) {
    self.variables.insert(step_id.into(), output);
  }

  pub fn mark_skipped(&mut self, step_id: impl Into<String>) {
    self.skipped.insert(step_id.into());
  }

  pub fn output(&self, step_id: &str) -> Option<&Value> {
    self.variables.get(step_id)
  }

  pub fn is_skipped(&self, step_id: &str) -> bool {
    self.skipped.contains(step_id)
  }

  pub fn variables(&self) -> &BTreeMap<String, Value> {
    &self.variables
  }
}
