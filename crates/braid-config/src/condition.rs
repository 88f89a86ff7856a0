//! Boolean conditions over completed step outputs.
//!
//! Conditions gate steps and edges. They are evaluated against the outputs of
//! steps that have already completed, and never have side effects.
//!
//! ```json
//! { "equals": { "value": { "$ref": "triage.severity" }, "to": "high" } }
//! { "all": [ { "exists": { "$ref": "fetch.body.id" } }, { "not": { "truthy": { "$ref": "fetch.body.closed" } } } ] }
//! { "expr": "triage.severity == 'high' and fetch.body.count > 3" }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::param::VariableReference;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
  /// True when the referenced path exists.
  Exists(VariableReference),
  /// True when the referenced value is truthy (not null, false, 0, "" or empty).
  Truthy(VariableReference),
  /// True when the referenced value equals `to`.
  Equals { value: VariableReference, to: Value },
  /// True when the referenced value does not equal `to`.
  NotEquals { value: VariableReference, to: Value },
  Not(Box<Condition>),
  All(Vec<Condition>),
  Any(Vec<Condition>),
  /// A boolean expression over step outputs, keyed by step id.
  Expr(String),
}

impl Condition {
  /// References used by the typed forms of this condition.
  ///
  /// `Expr` conditions are not included; their roots are discovered by the
  /// graph compiler.
  pub fn references(&self) -> Vec<&VariableReference> {
    let mut out = Vec::new();
    self.collect_references(&mut out);
    out
  }

  fn collect_references<'a>(&'a self, out: &mut Vec<&'a VariableReference>) {
    match self {
      Condition::Exists(r) | Condition::Truthy(r) => out.push(r),
      Condition::Equals { value, .. } | Condition::NotEquals { value, .. } => out.push(value),
      Condition::Not(inner) => inner.collect_references(out),
      Condition::All(items) | Condition::Any(items) => {
        for item in items {
          item.collect_references(out);
        }
      }
      Condition::Expr(_) => {}
    }
  }

  /// Expression sources of this condition, including nested ones.
  pub fn expressions(&self) -> Vec<&str> {
    match self {
      Condition::Expr(expr) => vec![expr.as_str()],
      Condition::Not(inner) => inner.expressions(),
      Condition::All(items) | Condition::Any(items) => {
        items.iter().flat_map(|c| c.expressions()).collect()
      }
      _ => Vec::new(),
    }
  }
}
