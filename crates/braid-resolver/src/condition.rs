use braid_config::{Condition, VariableReference};
use minijinja::{Environment, UndefinedBehavior};
use serde_json::Value;

use crate::error::ResolutionError;
use crate::resolve::{Lookup, lookup};
use crate::scope::Scope;

/// Evaluate a condition against the outputs in `scope`.
///
/// Missing paths and skipped sources fall back to the reference's default;
/// without one they make `exists` false, `truthy` false and `equals` false.
/// `expr` conditions see every completed output keyed by step id; names of
/// skipped steps are undefined there.
pub fn evaluate_condition(
  step_id: &str,
  condition: &Condition,
  scope: &Scope,
) -> Result<bool, ResolutionError> {
  match condition {
    Condition::Exists(reference) => Ok(value_of(step_id, reference, scope)?.is_some()),
    Condition::Truthy(reference) => Ok(
      value_of(step_id, reference, scope)?
        .map(|v| is_truthy(&v))
        .unwrap_or(false),
    ),
    Condition::Equals { value, to } => Ok(value_of(step_id, value, scope)?.as_ref() == Some(to)),
    Condition::NotEquals { value, to } => {
      Ok(value_of(step_id, value, scope)?.as_ref() != Some(to))
    }
    Condition::Not(inner) => Ok(!evaluate_condition(step_id, inner, scope)?),
    Condition::All(items) => {
      for item in items {
        if !evaluate_condition(step_id, item, scope)? {
          return Ok(false);
        }
      }
      Ok(true)
    }
    Condition::Any(items) => {
      for item in items {
        if evaluate_condition(step_id, item, scope)? {
          return Ok(true);
        }
      }
      Ok(false)
    }
    Condition::Expr(expr) => evaluate_expression(step_id, expr, scope),
  }
}

fn value_of(
  step_id: &str,
  reference: &VariableReference,
  scope: &Scope,
) -> Result<Option<Value>, ResolutionError> {
  Ok(match lookup(step_id, reference, scope)? {
    Lookup::Found(value) => Some(value.clone()),
    Lookup::Missing | Lookup::Skipped => reference.default.clone(),
  })
}

fn is_truthy(value: &Value) -> bool {
  match value {
    Value::Null => false,
    Value::Bool(b) => *b,
    Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
    Value::String(s) => !s.is_empty(),
    Value::Array(items) => !items.is_empty(),
    Value::Object(fields) => !fields.is_empty(),
  }
}

fn evaluate_expression(step_id: &str, expr: &str, scope: &Scope) -> Result<bool, ResolutionError> {
  let to_error = |e: minijinja::Error| ResolutionError::Expression {
    step_id: step_id.to_string(),
    message: e.to_string(),
  };

  let mut env = Environment::new();
  env.set_undefined_behavior(UndefinedBehavior::Chainable);
  let expression = env.compile_expression(expr).map_err(to_error)?;
  let result = expression
    .eval(minijinja::Value::from_serialize(scope.variables()))
    .map_err(to_error)?;
  Ok(result.is_true())
}
