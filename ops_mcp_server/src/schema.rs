//! Argument validation against per-tool input schemas.
//!
//! The schemas are plain JSON-Schema-shaped documents carried by the tool
//! descriptors. The validator covers the subset those schemas use: object
//! shapes with `required` and `properties`, primitive types, `enum`,
//! numeric `minimum`/`maximum`, and string length bounds. Failures report
//! the first offending path so the protocol layer can surface it in the
//! `-32602` error data.

use serde_json::Value;

/// First schema violation found, with the path that triggered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    /// Slash-separated path from the argument root, e.g. `replicas`.
    pub path: String,
    pub message: String,
}

impl SchemaViolation {
    fn new(path: &str, message: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Validate `value` against `schema`. Returns the first violation.
pub fn validate(schema: &Value, value: &Value) -> Result<(), SchemaViolation> {
    validate_at(schema, value, "")
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}/{}", path, key)
    }
}

fn validate_at(schema: &Value, value: &Value, path: &str) -> Result<(), SchemaViolation> {
    if let Some(expected) = schema.get("type").and_then(Value::as_str) {
        check_type(expected, value, path)?;
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            return Err(SchemaViolation::new(
                path,
                format!("value is not one of the allowed set ({} options)", allowed.len()),
            ));
        }
    }

    match value {
        Value::Object(map) => {
            if let Some(required) = schema.get("required").and_then(Value::as_array) {
                for name in required.iter().filter_map(Value::as_str) {
                    if !map.contains_key(name) {
                        return Err(SchemaViolation::new(
                            &join(path, name),
                            "missing required property",
                        ));
                    }
                }
            }
            if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
                for (name, property_schema) in properties {
                    if let Some(entry) = map.get(name) {
                        validate_at(property_schema, entry, &join(path, name))?;
                    }
                }
            }
        }
        Value::Number(number) => {
            if let Some(minimum) = schema.get("minimum").and_then(Value::as_f64) {
                if number.as_f64().unwrap_or(f64::NAN) < minimum {
                    return Err(SchemaViolation::new(
                        path,
                        format!("value is below the minimum of {}", minimum),
                    ));
                }
            }
            if let Some(maximum) = schema.get("maximum").and_then(Value::as_f64) {
                if number.as_f64().unwrap_or(f64::NAN) > maximum {
                    return Err(SchemaViolation::new(
                        path,
                        format!("value is above the maximum of {}", maximum),
                    ));
                }
            }
        }
        Value::String(s) => {
            if let Some(min_length) = schema.get("minLength").and_then(Value::as_u64) {
                if (s.chars().count() as u64) < min_length {
                    return Err(SchemaViolation::new(
                        path,
                        format!("string is shorter than {}", min_length),
                    ));
                }
            }
            if let Some(max_length) = schema.get("maxLength").and_then(Value::as_u64) {
                if (s.chars().count() as u64) > max_length {
                    return Err(SchemaViolation::new(
                        path,
                        format!("string is longer than {}", max_length),
                    ));
                }
            }
        }
        Value::Array(items) => {
            if let Some(item_schema) = schema.get("items") {
                for (index, item) in items.iter().enumerate() {
                    validate_at(item_schema, item, &join(path, &index.to_string()))?;
                }
            }
        }
        _ => {}
    }

    Ok(())
}

fn check_type(expected: &str, value: &Value, path: &str) -> Result<(), SchemaViolation> {
    let ok = match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "null" => value.is_null(),
        _ => true, // unknown type words don't constrain
    };
    if ok {
        Ok(())
    } else {
        Err(SchemaViolation::new(
            path,
            format!("expected {}, got {}", expected, type_name(value)),
        ))
    }
}

fn type_name(value: &Value) -> &'static str {
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
    use serde_json::json;

    fn tool_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "server": { "type": "string" },
                "command": { "type": "string", "minLength": 1 },
                "timeout": { "type": "integer", "minimum": 1, "maximum": 600 },
                "mode": { "type": "string", "enum": ["plain", "json"] },
                "tags": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["server", "command"]
        })
    }

    #[test]
    fn valid_arguments_pass() {
        let args = json!({"server": "h1", "command": "uptime", "timeout": 30});
        assert!(validate(&tool_schema(), &args).is_ok());
    }

    #[test]
    fn missing_required_reports_the_path() {
        let args = json!({"server": "h1"});
        let violation = validate(&tool_schema(), &args).unwrap_err();
        assert_eq!(violation.path, "command");
        assert!(violation.message.contains("missing required"));
    }

    #[test]
    fn wrong_type_reports_expected_and_actual() {
        let args = json!({"server": "h1", "command": 42});
        let violation = validate(&tool_schema(), &args).unwrap_err();
        assert_eq!(violation.path, "command");
        assert!(violation.message.contains("expected string"));
    }

    #[test]
    fn integer_rejects_floats() {
        let args = json!({"server": "h1", "command": "x", "timeout": 1.5});
        let violation = validate(&tool_schema(), &args).unwrap_err();
        assert_eq!(violation.path, "timeout");
    }

    #[test]
    fn bounds_are_enforced() {
        let args = json!({"server": "h1", "command": "x", "timeout": 0});
        let violation = validate(&tool_schema(), &args).unwrap_err();
        assert!(violation.message.contains("minimum"));
    }

    #[test]
    fn enum_membership_is_enforced() {
        let args = json!({"server": "h1", "command": "x", "mode": "yaml"});
        let violation = validate(&tool_schema(), &args).unwrap_err();
        assert_eq!(violation.path, "mode");
    }

    #[test]
    fn array_items_validate_with_index_paths() {
        let args = json!({"server": "h1", "command": "x", "tags": ["a", 3]});
        let violation = validate(&tool_schema(), &args).unwrap_err();
        assert_eq!(violation.path, "tags/1");
    }

    #[test]
    fn non_object_root_fails_the_type_check() {
        let violation = validate(&tool_schema(), &json!([1, 2])).unwrap_err();
        assert_eq!(violation.path, "");
        assert!(violation.message.contains("expected object"));
    }
}
