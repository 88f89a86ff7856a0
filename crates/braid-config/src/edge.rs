use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::condition::Condition;
use crate::param::VariableReference;
use crate::path::{PathError, parse_segments};

/// A dependency between two steps.
///
/// The target step runs only after the source step is terminal. An optional
/// condition skips the target when it evaluates false, and an optional mapping
/// feeds fields of the source output into the target's parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeDef {
  pub source: String,
  pub target: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub condition: Option<Condition>,
  /// Target parameter name -> path within the source step's output.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub mapping: BTreeMap<String, String>,
}

impl EdgeDef {
  pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
    Self {
      source: source.into(),
      target: target.into(),
      condition: None,
      mapping: BTreeMap::new(),
    }
  }

  pub fn with_condition(mut self, condition: Condition) -> Self {
    self.condition = Some(condition);
    self
  }

  pub fn with_mapping(mut self, parameter: impl Into<String>, path: impl Into<String>) -> Self {
    self.mapping.insert(parameter.into(), path.into());
    self
  }

  /// The mapping expressed as references into the source step's output.
  pub fn mapped_parameters(&self) -> Result<Vec<(String, VariableReference)>, PathError> {
    self
      .mapping
      .iter()
      .map(|(parameter, path)| {
        Ok((
          parameter.clone(),
          VariableReference {
            source_step_id: self.source.clone(),
            path: parse_segments(path)?,
            default: None,
          },
        ))
      })
      .collect()
  }
}
