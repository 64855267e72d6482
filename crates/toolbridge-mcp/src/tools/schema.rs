//! Tool input schemas and argument validation.
//!
//! Schemas are flat: a set of named properties, each with a primitive JSON
//! type and a required flag. They serialize as JSON Schema objects for
//! `tools/list`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::types::ToolError;

/// Validated, coerced arguments handed to a tool handler.
pub type Arguments = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl PropertyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyType::String => "string",
            PropertyType::Integer => "integer",
            PropertyType::Number => "number",
            PropertyType::Boolean => "boolean",
            PropertyType::Object => "object",
            PropertyType::Array => "array",
        }
    }

    /// Coerce `value` into this type, or `None` if it cannot be.
    pub fn coerce(&self, value: &Value) -> Option<Value> {
        match (self, value) {
            (PropertyType::String, Value::String(_)) => Some(value.clone()),

            (PropertyType::Integer, Value::Number(n)) => {
                if n.is_i64() || n.is_u64() {
                    Some(value.clone())
                } else {
                    n.as_f64().and_then(integral).map(Value::from)
                }
            }
            (PropertyType::Integer, Value::String(s)) => {
                let s = s.trim();
                s.parse::<i64>()
                    .map(Value::from)
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().and_then(integral).map(Value::from))
            }

            (PropertyType::Number, Value::Number(_)) => Some(value.clone()),
            (PropertyType::Number, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number),

            (PropertyType::Boolean, Value::Bool(_)) => Some(value.clone()),
            (PropertyType::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },

            (PropertyType::Object, Value::Object(_)) => Some(value.clone()),
            (PropertyType::Array, Value::Array(_)) => Some(value.clone()),
            _ => None,
        }
    }
}

fn integral(f: f64) -> Option<i64> {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertySchema {
    pub name: String,
    pub kind: PropertyType,
    pub description: String,
    pub required: bool,
}

/// Declared input shape of one tool.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputSchema {
    properties: Vec<PropertySchema>,
}

impl InputSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(self, name: &str, kind: PropertyType, description: &str) -> Self {
        self.property(name, kind, description, true)
    }

    pub fn optional(self, name: &str, kind: PropertyType, description: &str) -> Self {
        self.property(name, kind, description, false)
    }

    fn property(mut self, name: &str, kind: PropertyType, description: &str, required: bool) -> Self {
        self.properties.retain(|p| p.name != name);
        self.properties.push(PropertySchema {
            name: name.to_string(),
            kind,
            description: description.to_string(),
            required,
        });
        self
    }

    pub fn properties(&self) -> &[PropertySchema] {
        &self.properties
    }

    /// JSON Schema rendering used in discovery results.
    pub fn to_json(&self) -> Value {
        let mut properties = Map::new();
        for p in &self.properties {
            let mut entry = json!({ "type": p.kind.as_str() });
            if !p.description.is_empty() {
                entry["description"] = Value::String(p.description.clone());
            }
            properties.insert(p.name.clone(), entry);
        }
        let required: Vec<&str> = self
            .properties
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// Checks call arguments against a tool's schema before the handler sees them.
pub trait SchemaValidator: Send + Sync {
    fn validate(&self, schema: &InputSchema, arguments: Option<Value>) -> Result<Arguments, ToolError>;
}

/// Required properties present, declared types coercible. Undeclared
/// properties pass through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultValidator;

impl SchemaValidator for DefaultValidator {
    fn validate(&self, schema: &InputSchema, arguments: Option<Value>) -> Result<Arguments, ToolError> {
        let mut args = match arguments {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(ToolError::InvalidArguments(format!(
                    "arguments must be an object, got {}",
                    json_kind(&other)
                )))
            }
        };

        for property in schema.properties() {
            let present = args.get(&property.name).filter(|v| !v.is_null()).cloned();
            match present {
                None if property.required => {
                    return Err(ToolError::InvalidArguments(format!(
                        "missing required property '{}'",
                        property.name
                    )));
                }
                None => {
                    args.remove(&property.name);
                }
                Some(value) => {
                    let coerced = property.kind.coerce(&value).ok_or_else(|| {
                        ToolError::InvalidArguments(format!(
                            "property '{}' must be {}, got {}",
                            property.name,
                            property.kind,
                            json_kind(&value)
                        ))
                    })?;
                    args.insert(property.name.clone(), coerced);
                }
            }
        }

        Ok(args)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> InputSchema {
        InputSchema::new()
            .required("key", PropertyType::String, "Object key")
            .optional("maxKeys", PropertyType::Integer, "")
            .optional("isBase64", PropertyType::Boolean, "")
            .optional("ratio", PropertyType::Number, "")
    }

    #[test]
    fn test_to_json_shape() {
        let rendered = schema().to_json();
        assert_eq!(rendered["type"], "object");
        assert_eq!(rendered["properties"]["key"]["type"], "string");
        assert_eq!(rendered["properties"]["key"]["description"], "Object key");
        assert!(rendered["properties"]["maxKeys"].get("description").is_none());
        assert_eq!(rendered["required"], json!(["key"]));
    }

    #[test]
    fn test_missing_required() {
        let err = DefaultValidator.validate(&schema(), Some(json!({}))).unwrap_err();
        assert!(err.to_string().contains("'key'"));

        // Explicit null counts as missing.
        let err = DefaultValidator
            .validate(&schema(), Some(json!({"key": null})))
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[test]
    fn test_coercion() {
        let args = DefaultValidator
            .validate(
                &schema(),
                Some(json!({"key": "a", "maxKeys": "25", "isBase64": "TRUE", "ratio": "0.5"})),
            )
            .unwrap();
        assert_eq!(args["maxKeys"], json!(25));
        assert_eq!(args["isBase64"], json!(true));
        assert_eq!(args["ratio"], json!(0.5));

        let args = DefaultValidator
            .validate(&schema(), Some(json!({"key": "a", "maxKeys": 10.0})))
            .unwrap();
        assert_eq!(args["maxKeys"], json!(10));
    }

    #[test]
    fn test_type_mismatch() {
        for bad in [
            json!({"key": 5}),
            json!({"key": "a", "maxKeys": 1.5}),
            json!({"key": "a", "maxKeys": "ten"}),
            json!({"key": "a", "isBase64": "maybe"}),
            json!({"key": "a", "ratio": []}),
        ] {
            assert!(
                DefaultValidator.validate(&schema(), Some(bad.clone())).is_err(),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_absent_arguments_and_extras() {
        let empty = InputSchema::new();
        assert!(DefaultValidator.validate(&empty, None).unwrap().is_empty());

        let args = DefaultValidator
            .validate(&schema(), Some(json!({"key": "a", "extra": [1], "maxKeys": null})))
            .unwrap();
        assert_eq!(args["extra"], json!([1]));
        assert!(!args.contains_key("maxKeys"));

        let err = DefaultValidator.validate(&empty, Some(json!([1, 2]))).unwrap_err();
        assert!(err.to_string().contains("array"));
    }
}
