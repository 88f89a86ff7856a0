use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::condition::Condition;
use crate::param::{ParamValue, VariableReference};
use crate::path::PathError;

/// A single step of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDef {
  pub step_id: String,
  /// Symbolic capability name, resolved through the executor registry.
  pub capability: String,
  #[serde(default)]
  pub parameters: BTreeMap<String, ParamValue>,
  /// When present and false, the step is skipped instead of run.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub condition: Option<Condition>,
  #[serde(default)]
  pub continue_on_error: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub timeout_ms: Option<u64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub max_retry_attempts: Option<u32>,
  /// JSON Schema (object subset) the resolved parameters must satisfy.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub parameter_schema: Option<serde_json::Value>,
}

impl StepDef {
  pub fn new(step_id: impl Into<String>, capability: impl Into<String>) -> Self {
    Self {
      step_id: step_id.into(),
      capability: capability.into(),
      parameters: BTreeMap::new(),
      condition: None,
      continue_on_error: false,
      timeout_ms: None,
      max_retry_attempts: None,
      parameter_schema: None,
    }
  }

  pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
    self.parameters.insert(name.into(), value.into());
    self
  }

  pub fn with_condition(mut self, condition: Condition) -> Self {
    self.condition = Some(condition);
    self
  }

  pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
    self.timeout_ms = Some(timeout_ms);
    self
  }

  pub fn with_max_retry_attempts(mut self, attempts: u32) -> Self {
    self.max_retry_attempts = Some(attempts);
    self
  }

  pub fn with_parameter_schema(mut self, schema: serde_json::Value) -> Self {
    self.parameter_schema = Some(schema);
    self
  }

  pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
    self.continue_on_error = continue_on_error;
    self
  }

  /// Every reference made by this step's parameters and condition.
  pub fn references(&self) -> Result<Vec<VariableReference>, PathError> {
    let mut out = Vec::new();
    for value in self.parameters.values() {
      out.extend(value.references()?);
    }
    if let Some(condition) = &self.condition {
      out.extend(condition.references().into_iter().cloned());
    }
    Ok(out)
  }
}
