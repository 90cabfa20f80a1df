//! Tool definitions exposed to the LLM and the argument-validation pass
//! applied at the registry boundary.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool definition advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: Value,
}

/// Check `args` against a tool's declared JSON Schema.
///
/// Validation happens here, at the registry boundary, not inside each tool:
/// required properties must be present, and present properties must match
/// the declared primitive type (`string`, `integer`, `number`, `boolean`,
/// `array`, `object`). Unknown properties are allowed.
pub fn validate_args(schema: &Value, args: &Value) -> Result<(), String> {
    let obj = match args {
        Value::Object(map) => map,
        Value::Null => {
            // Treat null as an empty object; only fails if fields are required.
            return match schema.get("required").and_then(Value::as_array) {
                Some(req) if !req.is_empty() => {
                    Err(format!("missing required argument '{}'", req[0].as_str().unwrap_or("?")))
                }
                _ => Ok(()),
            };
        }
        other => return Err(format!("arguments must be an object, got {other}")),
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if !obj.contains_key(name) {
                return Err(format!("missing required argument '{name}'"));
            }
        }
    }

    if let Some(props) = schema.get("properties").and_then(Value::as_object) {
        for (name, prop_schema) in props {
            let Some(value) = obj.get(name) else { continue };
            if value.is_null() {
                continue;
            }
            let Some(expected) = prop_schema.get("type").and_then(Value::as_str) else {
                continue;
            };
            let ok = match expected {
                "string" => value.is_string(),
                "integer" => value.is_i64() || value.is_u64(),
                "number" => value.is_number(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !ok {
                return Err(format!("argument '{name}' must be of type {expected}"));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "expr": { "type": "string" },
                "limit": { "type": "integer" }
            },
            "required": ["expr"]
        })
    }

    #[test]
    fn valid_args_pass() {
        assert!(validate_args(&schema(), &json!({ "expr": "2+2" })).is_ok());
        assert!(validate_args(&schema(), &json!({ "expr": "2+2", "limit": 5 })).is_ok());
    }

    #[test]
    fn missing_required_rejected() {
        let err = validate_args(&schema(), &json!({})).unwrap_err();
        assert!(err.contains("expr"));
    }

    #[test]
    fn wrong_type_rejected() {
        let err = validate_args(&schema(), &json!({ "expr": 42 })).unwrap_err();
        assert!(err.contains("string"));
    }

    #[test]
    fn null_args_with_no_required_pass() {
        let schema = json!({ "type": "object", "properties": {} });
        assert!(validate_args(&schema, &Value::Null).is_ok());
    }

    #[test]
    fn extra_properties_allowed() {
        assert!(validate_args(&schema(), &json!({ "expr": "1", "unknown": true })).is_ok());
    }
}
