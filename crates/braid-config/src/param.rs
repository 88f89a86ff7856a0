//! Step parameter values.
//!
//! A parameter is either a literal JSON value or a [`VariableReference`] to
//! another step's output. References may also appear nested inside literal
//! arrays and objects:
//!
//! ```json
//! {
//!   "channel": "#ops",
//!   "ticket": { "$ref": "create_ticket.id" },
//!   "lines": ["opened by", { "$ref": "fetch.user.name", "default": "unknown" }]
//! }
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::path::{PathError, PathSegment, format_path, parse_path};

/// Key that marks a JSON object as a variable reference.
pub const REFERENCE_KEY: &str = "$ref";

/// A pointer from a parameter to a nested field of another step's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawReference", into = "RawReference")]
pub struct VariableReference {
  /// The step whose output is read.
  pub source_step_id: String,
  /// Path into the source step's output. Empty means the whole output.
  pub path: Vec<PathSegment>,
  /// Value used when the path does not exist in the output.
  pub default: Option<Value>,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawReference {
  #[serde(rename = "$ref")]
  target: String,
  #[serde(
    default,
    deserialize_with = "present_value",
    skip_serializing_if = "Option::is_none"
  )]
  default: Option<Value>,
}

/// Treat an explicit `"default": null` as a null default rather than no default.
fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
  D: Deserializer<'de>,
{
  Value::deserialize(deserializer).map(Some)
}

impl TryFrom<RawReference> for VariableReference {
  type Error = PathError;

  fn try_from(raw: RawReference) -> Result<Self, Self::Error> {
    let (source_step_id, path) = parse_path(&raw.target)?;
    Ok(Self {
      source_step_id,
      path,
      default: raw.default,
    })
  }
}

impl From<VariableReference> for RawReference {
  fn from(reference: VariableReference) -> Self {
    Self {
      target: reference.target(),
      default: reference.default,
    }
  }
}

impl VariableReference {
  /// Parse a reference from path syntax, e.g. `"fetch.items[0].id"`.
  pub fn parse(target: &str) -> Result<Self, PathError> {
    let (source_step_id, path) = parse_path(target)?;
    Ok(Self {
      source_step_id,
      path,
      default: None,
    })
  }

  /// Attach a default value.
  pub fn with_default(mut self, default: Value) -> Self {
    self.default = Some(default);
    self
  }

  /// The reference in path syntax.
  pub fn target(&self) -> String {
    format_path(&self.source_step_id, &self.path)
  }

  /// Interpret a JSON value as a reference, if it has the reference shape.
  ///
  /// Returns `None` for values that are not references, and an error for
  /// values that look like references but carry a malformed path.
  pub fn from_json(value: &Value) -> Option<Result<Self, PathError>> {
    let obj = value.as_object()?;
    let target = obj.get(REFERENCE_KEY)?.as_str()?;
    if obj.keys().any(|k| k != REFERENCE_KEY && k != "default") {
      return None;
    }
    Some(parse_path(target).map(|(source_step_id, path)| Self {
      source_step_id,
      path,
      default: obj.get("default").cloned(),
    }))
  }
}

/// A step parameter: a literal or a reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
  Reference(VariableReference),
  Literal(Value),
}

impl ParamValue {
  /// Create a reference parameter from path syntax.
  pub fn reference(target: &str) -> Result<Self, PathError> {
    VariableReference::parse(target).map(ParamValue::Reference)
  }

  /// Collect every reference in this parameter, including ones nested in
  /// literal arrays and objects.
  pub fn references(&self) -> Result<Vec<VariableReference>, PathError> {
    let mut out = Vec::new();
    match self {
      ParamValue::Reference(r) => out.push(r.clone()),
      ParamValue::Literal(value) => collect_references(value, &mut out)?,
    }
    Ok(out)
  }
}

impl From<Value> for ParamValue {
  fn from(value: Value) -> Self {
    ParamValue::Literal(value)
  }
}

impl From<VariableReference> for ParamValue {
  fn from(reference: VariableReference) -> Self {
    ParamValue::Reference(reference)
  }
}

fn collect_references(value: &Value, out: &mut Vec<VariableReference>) -> Result<(), PathError> {
  if let Some(reference) = VariableReference::from_json(value) {
    out.push(reference?);
    return Ok(());
  }
  match value {
    Value::Array(items) => {
      for item in items {
        collect_references(item, out)?;
      }
    }
    Value::Object(map) => {
      for item in map.values() {
        collect_references(item, out)?;
      }
    }
    _ => {}
  }
  Ok(())
}
