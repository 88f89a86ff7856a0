//! Reference resolution.
//!
//! A reference names a source step and a path into its output:
//!
//! ```json
//! { "$ref": "fetch.items[0].owner.email", "default": "nobody@example.com" }
//! ```
//!
//! Lookup rules:
//! - source completed: walk the path; a missing segment yields the default,
//!   or `PathNotFound` without one
//! - source skipped: yield the default, or `SourceSkipped` without one
//! - source not finished: `DependencyNotReady`

use std::collections::BTreeMap;

use braid_config::{ParamValue, PathSegment, VariableReference};
use serde_json::{Map, Value};

use crate::error::ResolutionError;
use crate::scope::Scope;

/// Resolve every parameter of a step into a JSON object.
pub fn resolve_parameters(
  step_id: &str,
  parameters: &BTreeMap<String, ParamValue>,
  scope: &Scope,
) -> Result<Value, ResolutionError> {
  let mut resolved = Map::new();
  for (name, param) in parameters {
    let value = match param {
      ParamValue::Reference(reference) => resolve_reference(step_id, reference, scope)?,
      ParamValue::Literal(value) => resolve_value(step_id, value, scope)?,
    };
    resolved.insert(name.clone(), value);
  }
  Ok(Value::Object(resolved))
}

/// Resolve a single reference.
pub fn resolve_reference(
  step_id: &str,
  reference: &VariableReference,
  scope: &Scope,
) -> Result<Value, ResolutionError> {
  match lookup(step_id, reference, scope)? {
    Lookup::Found(value) => Ok(value.clone()),
    Lookup::Missing => reference
      .default
      .clone()
      .ok_or_else(|| ResolutionError::PathNotFound {
        step_id: step_id.to_string(),
        path: reference.target(),
      }),
    Lookup::Skipped => reference
      .default
      .clone()
      .ok_or_else(|| ResolutionError::SourceSkipped {
        step_id: step_id.to_string(),
        source_step_id: reference.source_step_id.clone(),
      }),
  }
}

/// Resolve references nested anywhere inside a literal value.
pub fn resolve_value(step_id: &str, value: &Value, scope: &Scope) -> Result<Value, ResolutionError> {
  if let Some(reference) = VariableReference::from_json(value) {
    let reference = reference.map_err(|source| ResolutionError::InvalidReference {
      step_id: step_id.to_string(),
      source,
    })?;
    return resolve_reference(step_id, &reference, scope);
  }

  match value {
    Value::Array(items) => items
      .iter()
      .map(|item| resolve_value(step_id, item, scope))
      .collect::<Result<Vec<_>, _>>()
      .map(Value::Array),
    Value::Object(fields) => {
      let mut out = Map::new();
      for (key, field) in fields {
        out.insert(key.clone(), resolve_value(step_id, field, scope)?);
      }
      Ok(Value::Object(out))
    }
    other => Ok(other.clone()),
  }
}

pub(crate) enum Lookup<'a> {
  Found(&'a Value),
  Missing,
  Skipped,
}

/// Find the value a reference points at, without applying its default.
pub(crate) fn lookup<'a>(
  step_id: &str,
  reference: &VariableReference,
  scope: &'a Scope,
) -> Result<Lookup<'a>, ResolutionError> {
  let Some(output) = scope.output(&reference.source_step_id) else {
    if scope.is_skipped(&reference.source_step_id) {
      return Ok(Lookup::Skipped);
    }
    return Err(ResolutionError::DependencyNotReady {
      step_id: step_id.to_string(),
      source_step_id: reference.source_step_id.clone(),
    });
  };

  let mut current = output;
  for segment in &reference.path {
    let next = match segment {
      PathSegment::Key(key) => current.as_object().and_then(|obj| obj.get(key)),
      PathSegment::Index(index) => current.as_array().and_then(|items| items.get(*index)),
    };
    match next {
      Some(value) => current = value,
      None => return Ok(Lookup::Missing),
    }
  }
  Ok(Lookup::Found(current))
}
