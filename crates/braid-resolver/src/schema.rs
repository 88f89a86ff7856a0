//! Parameter schemas.
//!
//! Steps may declare a JSON Schema for their resolved parameters. Only the
//! object subset is understood: `properties.<name>.type` and `required`.
//! Complex schemas (anyOf, oneOf, $defs) are ignored.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::ValidationError;

/// JSON Schema type names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaType {
  String,
  Number,
  Integer,
  Boolean,
  Null,
  Array,
  Object,
}

impl SchemaType {
  fn parse(name: &str) -> Option<Self> {
    Some(match name {
      "string" => SchemaType::String,
      "number" => SchemaType::Number,
      "integer" => SchemaType::Integer,
      "boolean" => SchemaType::Boolean,
      "null" => SchemaType::Null,
      "array" => SchemaType::Array,
      "object" => SchemaType::Object,
      _ => return None,
    })
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      SchemaType::String => "string",
      SchemaType::Number => "number",
      SchemaType::Integer => "integer",
      SchemaType::Boolean => "boolean",
      SchemaType::Null => "null",
      SchemaType::Array => "array",
      SchemaType::Object => "object",
    }
  }

  pub fn matches(&self, value: &Value) -> bool {
    match self {
      SchemaType::String => value.is_string(),
      SchemaType::Number => value.is_number(),
      SchemaType::Integer => value.is_i64() || value.is_u64(),
      SchemaType::Boolean => value.is_boolean(),
      SchemaType::Null => value.is_null(),
      SchemaType::Array => value.is_array(),
      SchemaType::Object => value.is_object(),
    }
  }
}

/// Extract property types from a JSON Schema object.
///
/// Properties with an unknown or missing `type` are left out and accept any
/// value.
pub fn extract_schema_types(json_schema: &Value) -> BTreeMap<String, SchemaType> {
  let mut types = BTreeMap::new();

  if let Some(properties) = json_schema.get("properties").and_then(|p| p.as_object()) {
    for (name, prop_schema) in properties {
      if let Some(schema_type) = prop_schema
        .get("type")
        .and_then(|t| t.as_str())
        .and_then(SchemaType::parse)
      {
        types.insert(name.clone(), schema_type);
      }
    }
  }

  types
}

/// Names listed under `required`.
pub fn required_fields(json_schema: &Value) -> Vec<String> {
  json_schema
    .get("required")
    .and_then(|r| r.as_array())
    .map(|items| {
      items
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect()
    })
    .unwrap_or_default()
}

/// Check resolved parameters against a schema.
pub fn validate_parameters(
  step_id: &str,
  parameters: &Value,
  json_schema: &Value,
) -> Result<(), ValidationError> {
  let violation = |field: &str, message: String| ValidationError::SchemaViolation {
    step_id: step_id.to_string(),
    field: field.to_string(),
    message,
  };

  let Some(fields) = parameters.as_object() else {
    return Err(violation("", format!("expected object, got {}", type_name(parameters))));
  };

  for name in required_fields(json_schema) {
    if !fields.contains_key(&name) {
      return Err(violation(&name, "required field is missing".to_string()));
    }
  }

  for (name, expected) in extract_schema_types(json_schema) {
    if let Some(value) = fields.get(&name) {
      if !expected.matches(value) {
        return Err(violation(
          &name,
          format!("expected {}, got {}", expected.as_str(), type_name(value)),
        ));
      }
    }
  }

  Ok(())
}

fn type_name(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "boolean",
    Value::Number(n) if n.is_f64() => "number",
    Value::Number(_) => "integer",
    Value::String(_) => "string",
    Value::Array(_) => "array",
    Value::Object(_) => "object",
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn schema() -> Value {
    json!({
      "type": "object",
      "properties": {
        "email": { "type": "string" },
        "count": { "type": "integer" },
        "ratio": { "type": "number" },
        "anything": { "description": "no type" }
      },
      "required": ["email"]
    })
  }

  #[test]
  fn test_extract_schema_types() {
    let types = extract_schema_types(&schema());
    assert_eq!(types.len(), 3);
    assert_eq!(types["email"], SchemaType::String);
    assert_eq!(types["count"], SchemaType::Integer);
    assert!(!types.contains_key("anything"));
  }

  #[test]
  fn test_valid_parameters() {
    let params = json!({ "email": "a@b.c", "count": 3, "ratio": 3, "anything": [1] });
    assert!(validate_parameters("s", &params, &schema()).is_ok());
  }

  #[test]
  fn test_missing_required() {
    let err = validate_parameters("s", &json!({ "count": 1 }), &schema()).unwrap_err();
    assert!(matches!(err, ValidationError::SchemaViolation { field, .. } if field == "email"));
  }

  #[test]
  fn test_type_mismatch() {
    let err = validate_parameters("s", &json!({ "email": "x", "count": 1.5 }), &schema()).unwrap_err();
    assert_eq!(
      err.to_string(),
      "step 's': schema violation on 'count': expected integer, got number"
    );
  }

  #[test]
  fn test_empty_schema_accepts_anything() {
    assert!(validate_parameters("s", &json!({ "x": 1 }), &json!({})).is_ok());
  }
}
